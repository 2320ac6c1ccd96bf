//! Priority-tier weighted random candidate selection.

use std::collections::BTreeMap;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub weight: i64,
    pub priority: i64,
}

/// Request-local snapshot of the enabled associations. BTreeMap keeps the
/// iteration in id order so tie-breaks are reproducible.
pub type CandidateSet = BTreeMap<i64, Candidate>;

/// Pick one candidate: highest priority tier first, weighted random inside
/// the tier. A zero-weight tier falls back to a uniform pick.
pub fn pick(candidates: &CandidateSet, rng: &mut impl Rng) -> Option<i64> {
    let max_priority = candidates.values().map(|c| c.priority).max()?;
    let tier: Vec<(i64, u64)> = candidates
        .iter()
        .filter(|(_, c)| c.priority == max_priority)
        .map(|(id, c)| (*id, c.weight.max(0) as u64))
        .collect();

    let total: u64 = tier.iter().map(|(_, weight)| *weight).sum();
    if total == 0 {
        let index = rng.random_range(0..tier.len());
        return Some(tier[index].0);
    }

    let mut roll = rng.random_range(0..total);
    for (id, weight) in &tier {
        if roll < *weight {
            return Some(*id);
        }
        roll -= *weight;
    }
    tier.last().map(|(id, _)| *id)
}

/// In-memory 429 penalty: drop a third of the weight, never below 1. The
/// stored weight is untouched; persistence is the feedback engine's job.
pub fn penalize_rate_limited(candidate: &mut Candidate) {
    candidate.weight = (candidate.weight - candidate.weight / 3).max(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn set(entries: &[(i64, i64, i64)]) -> CandidateSet {
        entries
            .iter()
            .map(|(id, weight, priority)| {
                (
                    *id,
                    Candidate {
                        weight: *weight,
                        priority: *priority,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn empty_set_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick(&CandidateSet::new(), &mut rng), None);
    }

    #[test]
    fn priority_dominates_weight() {
        let candidates = set(&[(1, 1, 20), (2, 100, 10)]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert_eq!(pick(&candidates, &mut rng), Some(1));
        }
    }

    #[test]
    fn weights_split_three_to_one() {
        let candidates = set(&[(1, 3, 10), (2, 1, 10)]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut wins = 0;
        for _ in 0..10_000 {
            if pick(&candidates, &mut rng) == Some(1) {
                wins += 1;
            }
        }
        // 3:1 ratio within 2 sigma of 10k draws.
        assert!((7300..=7700).contains(&wins), "wins = {wins}");
    }

    #[test]
    fn zero_weight_tier_uses_uniform_fallback() {
        let candidates = set(&[(1, 0, 10), (2, 0, 10)]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..100 {
            seen.insert(pick(&candidates, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let candidates = set(&[(1, 5, 10), (2, 5, 10), (3, 2, 10)]);
        let picks_a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(99);
            (0..50).map(|_| pick(&candidates, &mut rng)).collect()
        };
        let picks_b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(99);
            (0..50).map(|_| pick(&candidates, &mut rng)).collect()
        };
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn rate_limit_penalty_floors_at_one() {
        let mut candidate = Candidate {
            weight: 12,
            priority: 10,
        };
        penalize_rate_limited(&mut candidate);
        assert_eq!(candidate.weight, 8);

        let mut tiny = Candidate {
            weight: 1,
            priority: 10,
        };
        penalize_rate_limited(&mut tiny);
        assert_eq!(tiny.weight, 1);
    }
}
