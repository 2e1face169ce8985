//! Weighted queue selection.

/// Smooth weighted round-robin over named queues.
///
/// Each call to [`next_order`](Self::next_order) returns every queue, the
/// preferred one first. Over any window of `sum(weights)` calls each queue is
/// preferred exactly `weight` times, interleaved rather than in bursts.
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    slots: Vec<Slot>,
    total: i64,
    /// Slot indices by descending weight, then name.
    fallback: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    weight: i64,
    current: i64,
}

impl WeightedSelector {
    /// Build a selector. Queues with weight 0 are ignored.
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let slots: Vec<Slot> = queues
            .into_iter()
            .filter(|(_, w)| *w > 0)
            .map(|(name, weight)| Slot {
                name: name.into(),
                weight: i64::from(weight),
                current: 0,
            })
            .collect();
        let total = slots.iter().map(|s| s.weight).sum();

        let mut fallback: Vec<usize> = (0..slots.len()).collect();
        fallback.sort_by(|&a, &b| {
            slots[b]
                .weight
                .cmp(&slots[a].weight)
                .then_with(|| slots[a].name.cmp(&slots[b].name))
        });

        Self {
            slots,
            total,
            fallback,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pick the preferred queue for this round.
    pub fn next(&mut self) -> Option<&str> {
        let index = self.advance()?;
        Some(&self.slots[index].name)
    }

    /// The preferred queue followed by every other queue, heaviest first.
    pub fn next_order(&mut self) -> Vec<String> {
        let Some(preferred) = self.advance() else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(self.slots.len());
        order.push(self.slots[preferred].name.clone());
        order.extend(
            self.fallback
                .iter()
                .filter(|&&i| i != preferred)
                .map(|&i| self.slots[i].name.clone()),
        );
        order
    }

    fn advance(&mut self) -> Option<usize> {
        for slot in &mut self.slots {
            slot.current += slot.weight;
        }
        // ties go to the earlier slot
        let index = (0..self.slots.len()).max_by(|&a, &b| {
            self.slots[a]
                .current
                .cmp(&self.slots[b].current)
                .then_with(|| b.cmp(&a))
        })?;
        self.slots[index].current -= self.total;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn counts(selector: &mut WeightedSelector, rounds: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..rounds {
            let name = selector.next().unwrap().to_string();
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_exact_share_per_cycle() {
        let mut selector = WeightedSelector::new([("default", 2), ("high", 6)]);
        for _ in 0..10 {
            let c = counts(&mut selector, 8);
            assert_eq!(c["high"], 6);
            assert_eq!(c["default"], 2);
        }
    }

    #[test]
    fn test_ratio_over_many_cycles() {
        let mut selector = WeightedSelector::new([("high", 6), ("default", 2)]);
        let c = counts(&mut selector, 8_000);
        let ratio = c["high"] as f64 / c["default"] as f64;
        assert!((ratio - 3.0).abs() <= 0.3, "ratio was {}", ratio);
    }

    #[test]
    fn test_interleaves() {
        // never more than 3 high picks in a row for 6:2
        let mut selector = WeightedSelector::new([("high", 6), ("default", 2)]);
        let mut run = 0;
        for _ in 0..800 {
            if selector.next() == Some("high") {
                run += 1;
                assert!(run <= 3);
            } else {
                run = 0;
            }
        }
    }

    #[test]
    fn test_next_order_contains_all_queues() {
        let mut selector = WeightedSelector::new([("a", 1), ("b", 5), ("c", 3)]);
        for _ in 0..9 {
            let order = selector.next_order();
            assert_eq!(order.len(), 3);
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_fallback_heaviest_first() {
        let mut selector = WeightedSelector::new([("a", 1), ("b", 5), ("c", 3)]);
        let order = selector.next_order();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_zero_weight_ignored() {
        let mut selector = WeightedSelector::new([("a", 0)]);
        assert!(selector.is_empty());
        assert!(selector.next().is_none());
        assert!(selector.next_order().is_empty());
    }
}
