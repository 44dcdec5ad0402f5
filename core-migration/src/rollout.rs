//! Stable rollout bucketing.
//!
//! A subject identifier always maps to the same bucket, so a user does not
//! flip between implementations as long as the rollout percentage is
//! unchanged.

use sha2::{Digest, Sha256};

fn hash(subject_id: &str) -> u64 {
    let digest = Sha256::digest(subject_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Percentage bucket in `0..100`.
pub fn percentage_bucket(subject_id: &str) -> u8 {
    (hash(subject_id) % 100) as u8
}

/// Coarse cohort in `0..10`.
pub fn cohort(subject_id: &str) -> u8 {
    (hash(subject_id) % 10) as u8
}

pub fn in_percentage(subject_id: &str, percentage: u8) -> bool {
    percentage_bucket(subject_id) < percentage.min(100)
}

pub fn in_cohort(subject_id: &str, percentage: u8) -> bool {
    cohort(subject_id) < percentage.min(100) / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_stable() {
        assert_eq!(percentage_bucket("user-42"), percentage_bucket("user-42"));
        assert_eq!(cohort("user-42"), cohort("user-42"));
        assert!(percentage_bucket("user-42") < 100);
        assert!(cohort("user-42") < 10);
    }

    #[test]
    fn test_percentage_edges() {
        for i in 0..50 {
            let id = format!("subject-{i}");
            assert!(!in_percentage(&id, 0));
            assert!(in_percentage(&id, 100));
            assert!(!in_cohort(&id, 0));
            assert!(in_cohort(&id, 100));
        }
    }

    #[test]
    fn test_percentage_is_roughly_proportional() {
        let included = (0..2_000)
            .filter(|i| in_percentage(&format!("subject-{i}"), 25))
            .count();
        assert!((350..650).contains(&included), "included {included}");
    }

    #[test]
    fn test_raising_percentage_keeps_included_subjects() {
        for i in 0..200 {
            let id = format!("subject-{i}");
            if in_percentage(&id, 10) {
                assert!(in_percentage(&id, 50));
            }
        }
    }
}
