pub mod backoff;
pub mod classify;
pub mod config;
pub mod error;
pub mod job;
pub mod record;
pub mod scheduler;
pub mod sink;
pub mod worker;

pub use backoff::*;
pub use classify::*;
pub use config::*;
pub use error::*;
pub use job::*;
pub use record::*;
pub use scheduler::*;
pub use sink::*;
pub use worker::*;
