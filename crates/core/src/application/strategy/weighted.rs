// Weighted random choice among eligible lanes

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::domain::QueueWithScores;

/// Cap on the age term of the weight
pub const MAX_AGE_WEIGHT: f64 = 4.0;

/// Cap on the size term of the weight
pub const MAX_SIZE_WEIGHT: f64 = 1.0;

/// Weight of one eligible lane:
///
/// `1 + min(age / avg_age, 4.0) + min(size / avg_size, 1.0)`
///
/// Terms whose average is zero contribute nothing. Age dominates and is capped so a very
/// old lane cannot monopolize the consumer; size adds at most one so a deep backlog
/// cannot starve small tenants once they have waited a while.
pub fn queue_weight(queue: &QueueWithScores, avg_age: f64, avg_size: f64) -> f64 {
    let age_term = if avg_age > 0.0 {
        (queue.age as f64 / avg_age).min(MAX_AGE_WEIGHT)
    } else {
        0.0
    };
    let size_term = if avg_size > 0.0 {
        (queue.size as f64 / avg_size).min(MAX_SIZE_WEIGHT)
    } else {
        0.0
    };
    1.0 + age_term + size_term
}

/// Random weighted choice with a seedable RNG
pub struct WeightedChoice {
    rng: Mutex<StdRng>,
}

impl WeightedChoice {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Pick one of `eligible` (which must all have headroom)
    pub fn choose<'a>(&self, eligible: &[&'a QueueWithScores]) -> Option<&'a QueueWithScores> {
        if eligible.is_empty() {
            return None;
        }

        let n = eligible.len() as f64;
        let avg_age = eligible.iter().map(|q| q.age as f64).sum::<f64>() / n;
        let avg_size = eligible.iter().map(|q| q.size as f64).sum::<f64>() / n;

        let weights: Vec<f64> = eligible
            .iter()
            .map(|q| queue_weight(q, avg_age, avg_size))
            .collect();
        let total: f64 = weights.iter().sum();

        // Poisoned lock still holds a usable RNG
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut roll = rng.gen_range(0.0..total);

        for (queue, weight) in eligible.iter().zip(weights.iter()) {
            if roll < *weight {
                return Some(*queue);
            }
            roll -= weight;
        }

        // Floating point leftovers land on the last lane
        eligible.last().copied()
    }
}

impl std::fmt::Debug for WeightedChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedChoice").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueCapacities, QueueCapacity};
    use std::collections::HashMap;

    fn lane(name: &str, age: u64, size: u64) -> QueueWithScores {
        QueueWithScores {
            queue: name.to_string(),
            capacities: QueueCapacities {
                queue: QueueCapacity::new(0, 10),
                env: QueueCapacity::new(0, 10),
            },
            age,
            size,
        }
    }

    #[test]
    fn test_weight_formula() {
        let q = lane("a", 200, 10);
        // age 2x average, size 2x average (capped at 1)
        assert_eq!(queue_weight(&q, 100.0, 5.0), 1.0 + 2.0 + 1.0);

        // age term capped at 4
        let old = lane("b", 10_000, 1);
        assert_eq!(queue_weight(&old, 100.0, 2.0), 1.0 + 4.0 + 0.5);

        // zero averages contribute nothing
        assert_eq!(queue_weight(&lane("c", 0, 0), 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_older_lane_chosen_more_often() {
        let strategy = WeightedChoice::new(Some(42));
        let old = lane("old", 9_000, 5);
        let young = lane("young", 1_000, 5);
        let eligible = vec![&old, &young];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..2_000 {
            let chosen = strategy.choose(&eligible).unwrap();
            *counts.entry(chosen.queue.clone()).or_default() += 1;
        }

        // avg age 5000: old weighs 1 + 1.8 + 1 = 3.8, young 1 + 0.2 + 1 = 2.2
        let old_count = counts["old"];
        let young_count = counts["young"];
        assert!(
            old_count > young_count,
            "old={} young={}",
            old_count,
            young_count
        );
        // Young still gets served (no starvation)
        assert!(young_count > 400, "young={}", young_count);
    }

    #[test]
    fn test_large_backlog_does_not_starve_small_tenant() {
        let strategy = WeightedChoice::new(Some(7));
        let big = lane("big", 1_000, 10_000);
        let small = lane("small", 1_000, 1);
        let eligible = vec![&big, &small];

        let small_wins = (0..2_000)
            .filter(|_| strategy.choose(&eligible).unwrap().queue == "small")
            .count();

        // big: 1 + 1 + 1 = 3, small: 1 + 1 + ~0 = 2 => small ~40%
        assert!(small_wins > 600, "small={}", small_wins);
    }

    #[test]
    fn test_same_seed_same_choices() {
        let a = WeightedChoice::new(Some(1));
        let b = WeightedChoice::new(Some(1));
        let lanes = [lane("x", 10, 1), lane("y", 20, 2), lane("z", 30, 3)];
        let eligible: Vec<&QueueWithScores> = lanes.iter().collect();

        for _ in 0..50 {
            assert_eq!(
                a.choose(&eligible).unwrap().queue,
                b.choose(&eligible).unwrap().queue
            );
        }
    }

    #[test]
    fn test_empty_eligible_set() {
        let strategy = WeightedChoice::new(Some(1));
        assert!(strategy.choose(&[]).is_none());
    }
}
