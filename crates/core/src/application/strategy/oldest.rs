// Deterministic oldest-first choice

use std::cmp::Ordering;

use crate::domain::QueueWithScores;

/// Highest age wins; ties go to the larger headroom, then the smaller queue key
pub fn choose_oldest<'a>(eligible: &[&'a QueueWithScores]) -> Option<&'a QueueWithScores> {
    eligible.iter().copied().max_by(|a, b| compare(a, b))
}

fn compare(a: &QueueWithScores, b: &QueueWithScores) -> Ordering {
    a.age
        .cmp(&b.age)
        .then_with(|| a.capacities.headroom().cmp(&b.capacities.headroom()))
        .then_with(|| b.queue.cmp(&a.queue))
}
