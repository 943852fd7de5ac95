use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Maximum length of the free-text note, in characters.
pub const MAX_NOTE_LEN: usize = 60;

pub const BIRTH_YEAR_MIN: i32 = 1925;
pub const BIRTH_YEAR_MAX: i32 = 2024;

/// Inclusive zip code bands; a band is picked first, then a code within it.
pub const ZIP_BANDS: [(u32, u32); 7] = [
    (10000, 19999),
    (20000, 29999),
    (30000, 39999),
    (40000, 49999),
    (50000, 59999),
    (60000, 69999),
    (70000, 99999),
];

/// Stride between per-batch seeds so concurrent batches draw uncorrelated streams.
pub const SEED_STRIDE: u64 = 1000;

const FIRST_NAMES: &[&str] = &[
    "John", "Jane", "Michael", "Sarah", "David", "Emily", "James", "Lisa", "Robert", "Mary",
    "William", "Patricia", "Richard", "Jennifer", "Thomas", "Elizabeth", "Charles", "Linda",
    "Daniel", "Barbara", "Christopher", "Susan", "Matthew", "Jessica", "Anthony", "Karen", "Mark",
    "Nancy", "Donald", "Betty", "Steven", "Dorothy", "Paul", "Helen", "Andrew", "Sandra", "Joshua",
    "Donna", "Kenneth", "Carol", "Kevin", "Ruth", "Brian", "Sharon", "George", "Michelle",
    "Timothy", "Laura", "Ronald", "Amy", "Jason", "Kimberly", "Edward", "Deborah", "Jeffrey",
    "Angela", "Ryan", "Brenda", "Jacob", "Emma", "Gary", "Olivia", "Nicholas", "Cynthia", "Eric",
    "Marie", "Jonathan", "Janet", "Stephen", "Frances", "Larry", "Catherine", "Justin", "Samantha",
    "Scott", "Debra", "Brandon", "Rachel", "Benjamin", "Carolyn", "Samuel", "Virginia", "Gregory",
    "Maria", "Alexander", "Heather", "Patrick", "Diane", "Frank", "Julie", "Raymond", "Joyce",
    "Jack", "Victoria", "Dennis", "Kelly", "Jerry", "Christina", "Tyler", "Joan", "Aaron",
    "Evelyn", "Jose", "Judith", "Henry", "Megan", "Adam", "Cheryl", "Douglas", "Andrea", "Nathan",
    "Hannah", "Peter", "Jacqueline", "Zachary", "Martha", "Kyle", "Gloria", "Noah", "Teresa",
    "Alan", "Sara", "Carl", "Janice", "Jordan", "Rose", "Wayne", "Julia", "Ralph", "Alice", "Roy",
    "Jean", "Eugene", "Lois", "Louis", "Louise", "Philip", "Isabella", "Bobby", "Sophia", "Johnny",
    "Amelia", "Mason", "Harper", "Logan", "Elijah", "Abigail", "Oliver", "Ella", "Lucas", "Avery",
    "Ethan", "Sofia", "Sebastian", "Camila", "Owen", "Aria", "Liam", "Scarlett", "Carter",
    "Madison", "Luke", "Luna", "Grayson", "Grace", "Leo", "Chloe", "Lincoln", "Penelope", "Gabriel",
    "Layla", "Isaiah", "Riley", "Maverick", "Zoey", "Hunter", "Nora", "Elias", "Lily", "Connor",
    "Lillian", "Hudson", "Addison", "Caleb", "Aubrey",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Anderson", "Taylor", "Thomas", "Moore", "Jackson", "Martin", "Lee", "Thompson",
    "White", "Harris", "Clark", "Lewis", "Robinson", "Walker", "Perez", "Hall", "Young", "Allen",
    "Sanchez", "Wright", "King", "Scott", "Green", "Baker", "Adams", "Nelson", "Hill", "Ramirez",
    "Campbell", "Mitchell", "Roberts", "Carter", "Phillips", "Evans", "Turner", "Torres", "Parker",
    "Collins", "Edwards", "Stewart", "Morris", "Rogers", "Reed", "Cook", "Morgan", "Bell", "Murphy",
    "Bailey", "Rivera", "Cooper", "Richardson", "Cox", "Howard", "Ward", "Peterson", "Gray",
    "James", "Watson", "Brooks", "Kelly", "Sanders", "Price", "Bennett", "Wood", "Barnes", "Ross",
    "Henderson", "Coleman", "Jenkins", "Perry", "Powell", "Long", "Patterson", "Hughes", "Flores",
    "Washington", "Butler", "Simmons", "Foster", "Gonzales", "Bryant", "Alexander", "Russell",
    "Griffin", "Diaz", "Hayes", "Myers", "Ford", "Hamilton", "Graham", "Sullivan", "Wallace",
    "Woods", "Cole", "West", "Jordan", "Owens", "Reynolds", "Fisher", "Ellis", "Harrison", "Gibson",
    "McDonald", "Cruz", "Marshall", "Ortiz", "Gomez", "Murray", "Freeman", "Wells", "Webb",
    "Simpson", "Stevens", "Tucker", "Porter", "Hunter", "Hicks", "Crawford", "Henry", "Boyd",
    "Mason", "Morales", "Kennedy", "Warren", "Dixon", "Ramos", "Reyes", "Burns", "Gordon", "Shaw",
    "Holmes", "Rice", "Robertson", "Hunt", "Black", "Daniels", "Palmer", "Mills", "Nichols",
];

const CONDITIONS: &[&str] = &[
    "HTN", "DM2", "Asthma", "Arthritis", "CAD", "Migraine", "Allergies", "Back Pain", "Depression",
    "Anxiety", "Cholesterol", "Obesity", "Sleep Apnea", "GERD", "Osteoporosis", "Fibromyalgia",
    "CKD", "Thyroid", "COPD", "Psoriasis", "Bipolar", "Celiac", "Crohn's", "MS", "Epilepsy",
    "Lupus", "Parkinson's", "Dementia", "Stroke Hx", "Cancer Hx", "DM1", "Pneumonia", "Bronchitis",
    "Sinusitis", "Tinnitus", "Glaucoma", "Cataracts", "AMD", "Hearing Loss", "CTS", "Tendonitis",
    "Bursitis", "Sciatica", "Disc Herniation", "Scoliosis", "OA", "RA", "Gout", "Anemia",
    "Iron Def", "B12 Def", "Thyroid Nodules", "Gallstones", "Kidney Stones", "UTI Hx", "IBS",
    "Lactose Int", "Food Allergy", "Drug Allergy", "Skin Allergy", "Eczema", "Dermatitis", "Acne",
    "Rosacea", "Varicose", "DVT", "AFib", "Murmur", "Pacemaker", "Stent", "CABG", "Appendectomy",
    "Hernia", "Cholecystectomy", "Cataract Sx", "Knee Replace", "Hip Replace",
];

const SINGLE_TEMPLATES: &[&str] = &[
    "Patient has {0} condition",
    "{0} currently being treated",
    "History of {0} documented",
    "Active {0} requiring monitoring",
    "Chronic {0} with stable symptoms",
    "Mild {0} with good prognosis",
    "Severe {0} needs close follow-up",
    "Recent diagnosis of {0}",
    "Family history of {0}",
    "Stable {0} on current treatment",
    "Ongoing {0} management plan",
    "{0} responding well to therapy",
];

const DUAL_TEMPLATES: &[&str] = &[
    "{0} and {1} co-occurring",
    "{0} with secondary {1}",
    "Primary {0}, also has {1}",
    "{0} plus {1} complications",
    "Managing {0} and {1}",
    "{0} stable, {1} improving",
    "Both {0} and {1} active",
    "{0} controlled, new {1}",
    "Chronic {0} with acute {1}",
    "{0} treated, monitoring {1}",
];

/// A synthetic patient record, serialized the way the ingestion endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub zip_code: String,
    pub national_id: String,
    pub phone_number: String,
    pub notes: String,
}

/// Deterministic record generator: output is a pure function of `(count, seed)`.
pub struct RecordGenerator;

impl RecordGenerator {
    pub fn generate(count: usize, seed: u64) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| Self::next_record(&mut rng)).collect()
    }

    /// Seed for batch `batch_index` derived from the run's base seed.
    pub fn batch_seed(base_seed: u64, batch_index: u64) -> u64 {
        base_seed.wrapping_add(batch_index.wrapping_mul(SEED_STRIDE))
    }

    fn next_record<R: Rng>(rng: &mut R) -> Record {
        let first_name = pick(rng, FIRST_NAMES);
        let last_name = pick(rng, LAST_NAMES);
        let condition1 = pick(rng, CONDITIONS);
        let condition2 = pick(rng, CONDITIONS);

        let year = rng.gen_range(BIRTH_YEAR_MIN..=BIRTH_YEAR_MAX);
        let month = rng.gen_range(1..=12u32);
        let day = rng.gen_range(1..=28u32);
        let date_of_birth =
            NaiveDate::from_ymd_opt(year, month, day).expect("day <= 28 is valid in every month");

        let (zip_lo, zip_hi) = ZIP_BANDS[rng.gen_range(0..ZIP_BANDS.len())];
        let zip_code = rng.gen_range(zip_lo..=zip_hi).to_string();

        let gender_digit = rng.gen_range(1..=4u32);
        let serial = rng.gen_range(1_000_000..10_000_000u32);
        let national_id = format!(
            "{:02}{:02}{:02}-{}{:06}",
            year % 100,
            month,
            day,
            gender_digit,
            serial
        );

        let phone_number = format!(
            "010-{:04}-{:04}",
            rng.gen_range(1000..10000u32),
            rng.gen_range(1000..10000u32)
        );

        // Short-circuit keeps the 1-in-3 draw out of the stream when both conditions match.
        let notes = if condition1 == condition2 || rng.gen_range(0..3) == 0 {
            pick(rng, SINGLE_TEMPLATES).replace("{0}", condition1)
        } else {
            pick(rng, DUAL_TEMPLATES)
                .replace("{0}", condition1)
                .replace("{1}", condition2)
        };

        Record {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            date_of_birth,
            zip_code,
            national_id,
            phone_number,
            notes: truncate_note(notes),
        }
    }
}

fn pick<'a, R: Rng>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items[rng.gen_range(0..items.len())]
}

fn truncate_note(note: String) -> String {
    if note.chars().count() <= MAX_NOTE_LEN {
        return note;
    }
    let mut truncated: String = note.chars().take(MAX_NOTE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_generate_is_deterministic() {
        let a = RecordGenerator::generate(500, 42);
        let b = RecordGenerator::generate(500, 42);
        assert_eq!(a, b);

        let c = RecordGenerator::generate(500, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generate_count() {
        assert_eq!(RecordGenerator::generate(0, 1).len(), 0);
        assert_eq!(RecordGenerator::generate(1000, 1).len(), 1000);
    }

    #[test]
    fn test_record_field_ranges() {
        for record in RecordGenerator::generate(5000, 7) {
            assert!(record.notes.chars().count() <= MAX_NOTE_LEN, "{}", record.notes);

            let year = record.date_of_birth.year();
            assert!((BIRTH_YEAR_MIN..=BIRTH_YEAR_MAX).contains(&year), "year {}", year);

            let zip: u32 = record.zip_code.parse().unwrap();
            assert!(
                ZIP_BANDS.iter().any(|(lo, hi)| (*lo..=*hi).contains(&zip)),
                "zip {}",
                zip
            );

            assert!(record.phone_number.starts_with("010-"));
            assert_eq!(record.phone_number.len(), 13);

            let expected_prefix = format!(
                "{:02}{:02}{:02}-",
                year % 100,
                record.date_of_birth.month(),
                record.date_of_birth.day()
            );
            assert!(record.national_id.starts_with(&expected_prefix));
        }
    }

    #[test]
    fn test_truncate_note() {
        let short = "Managing HTN and CAD".to_string();
        assert_eq!(truncate_note(short.clone()), short);

        let long = "x".repeat(80);
        let truncated = truncate_note(long);
        assert_eq!(truncated.chars().count(), MAX_NOTE_LEN);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_batch_seed_spacing() {
        assert_eq!(RecordGenerator::batch_seed(10, 0), 10);
        assert_eq!(RecordGenerator::batch_seed(10, 3), 3010);
        assert_eq!(RecordGenerator::batch_seed(u64::MAX, 1), SEED_STRIDE - 1);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = RecordGenerator::generate(1, 5).remove(0);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("firstName").is_some());
        assert!(json.get("dateOfBirth").unwrap().as_str().unwrap().len() == 10);
        assert!(json.get("nationalId").is_some());
    }
}
