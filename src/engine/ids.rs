//! Rule id generation.
//!
//! Ids combine a coarse clock component with a random component:
//! `(now_ms % 1_000_000) + rand(0..1000) + 1`, so every id lies in
//! `1..=MAX_RULE_ID`. Uniqueness is probabilistic. Ids already known to be
//! installed are skipped here; the backend may still report a collision,
//! which the sync engine handles by asking for another id.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rules::RuleId;

const CLOCK_MODULUS: u64 = 1_000_000;
const RANDOM_SPAN: u32 = 1_000;

/// Largest id the generator produces.
pub const MAX_RULE_ID: u32 = CLOCK_MODULUS as u32 + RANDOM_SPAN - 1;

/// Source of fresh rule ids.
#[derive(Debug, Clone)]
pub struct RuleIdGenerator {
    rng: fastrand::Rng,
}

impl Default for RuleIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleIdGenerator {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic generator for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Next id not contained in `taken`.
    ///
    /// Returns `None` only if the whole id space is taken.
    pub fn next_id(&mut self, taken: &BTreeSet<RuleId>) -> Option<RuleId> {
        if taken.len() >= MAX_RULE_ID as usize {
            return None;
        }
        let clock = (now_millis() % CLOCK_MODULUS) as u32;
        let mut candidate = clock + self.rng.u32(0..RANDOM_SPAN) + 1;
        // Linear probe from the random start; bounded by the size of `taken`.
        while taken.contains(&RuleId(candidate)) {
            candidate = if candidate >= MAX_RULE_ID { 1 } else { candidate + 1 };
        }
        Some(RuleId(candidate))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_in_range() {
        let mut generator = RuleIdGenerator::with_seed(7);
        for _ in 0..1000 {
            let id = generator.next_id(&BTreeSet::new()).unwrap();
            assert!(id.0 >= 1 && id.0 <= MAX_RULE_ID);
        }
    }

    #[test]
    fn test_skips_taken_ids() {
        let mut generator = RuleIdGenerator::with_seed(1);
        let first = generator.next_id(&BTreeSet::new()).unwrap();

        // Take a wide band around the clock component so the probe must move.
        let clock = (now_millis() % CLOCK_MODULUS) as u32;
        let taken: BTreeSet<RuleId> = (clock.saturating_sub(10)..clock + 2_000)
            .map(RuleId)
            .collect();
        let id = generator.next_id(&taken).unwrap();
        assert!(!taken.contains(&id));
        assert!(first.0 >= 1);
    }
}
