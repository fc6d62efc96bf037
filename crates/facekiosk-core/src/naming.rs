//! Upload filenames for captured stills.
//!
//! Format: `{index}{YYYYMMDDHHMMSS}{NNNN}.jpeg`, digits only before the
//! extension, with a random four-digit suffix so stills taken within the
//! same second stay distinct.

use chrono::NaiveDateTime;
use rand::Rng;

pub fn still_file_name<R: Rng + ?Sized>(index: usize, now: &NaiveDateTime, rng: &mut R) -> String {
    let suffix: u16 = rng.gen_range(1000..=9999);
    format!("{index}{}{suffix}.jpeg", now.format("%Y%m%d%H%M%S"))
}

/// Filename for the still at `index`, using the local clock.
pub fn generate_still_name(index: usize) -> String {
    let now = chrono::Local::now().naive_local();
    still_file_name(index, &now, &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap()
    }

    #[test]
    fn test_format() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = still_file_name(2, &at(), &mut rng);
        assert!(name.starts_with("220240307090502"), "{name}");
        assert!(name.ends_with(".jpeg"));
        let stem = name.trim_end_matches(".jpeg");
        assert_eq!(stem.len(), 1 + 14 + 4);
        assert!(stem.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_suffix_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let name = still_file_name(0, &at(), &mut rng);
            let suffix: u32 = name[15..19].parse().unwrap();
            assert!((1000..=9999).contains(&suffix), "{suffix}");
        }
    }

    #[test]
    fn test_generated_names_are_digits() {
        let name = generate_still_name(4);
        assert!(name.starts_with('4'));
        assert!(name.trim_end_matches(".jpeg").chars().all(|c| c.is_ascii_digit()));
    }
}
