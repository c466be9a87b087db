//! The atoms of the constraint problem: `Val`, `Pattern`, and the two
//! validity checks the solver can run a propagation pass under.

use crate::id::{ClassId, PatternId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A candidate value for a node's domain: "this node could be an instance
/// of `class_id`, specifically satisfying `pattern_id`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Val {
    pub class_id: ClassId,
    pub pattern_id: PatternId,
}

impl Val {
    pub const fn new(class_id: ClassId, pattern_id: PatternId) -> Self {
        Self {
            class_id,
            pattern_id,
        }
    }
}

/// A constraint rule: an instance of `class_id` may occur here only if
/// every class in `required_classes` is present among the neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub class_id: ClassId,
    pub required_classes: Vec<ClassId>,
    /// Relative selection weight. Zero is permitted (never chosen).
    pub weight: f32,
}

impl Pattern {
    pub fn new(class_id: ClassId, required_classes: Vec<ClassId>, weight: f32) -> Self {
        Self {
            class_id,
            required_classes,
            weight,
        }
    }

    /// Is this pattern satisfied by the given neighborhood, under `mode`?
    ///
    /// `neighbor_domains` yields, for each neighbor, the set of class ids
    /// still present in its domain and whether that domain is a singleton.
    pub fn valid<'a, I>(&self, mode: ValidityMode, neighborhood: I) -> bool
    where
        I: IntoIterator<Item = NeighborView<'a>>,
    {
        let neighbors: Vec<NeighborView<'a>> = neighborhood.into_iter().collect();
        self.required_classes
            .iter()
            .all(|req| match mode {
                ValidityMode::Correct => neighbors
                    .iter()
                    .any(|n| n.classes.contains(req)),
                ValidityMode::Approximate { domain_size_cutoff } => neighbors.iter().any(|n| {
                    (n.classes.len() == 1 || n.classes.len() <= domain_size_cutoff)
                        && n.classes.contains(req)
                }),
            })
    }
}

/// A read-only view of one neighbor's domain, as seen by `Pattern::valid`.
pub struct NeighborView<'a> {
    pub classes: &'a std::collections::HashSet<ClassId>,
}

/// Selects which `Pattern::valid` rule a propagation pass applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidityMode {
    /// Exact existential coverage per requirement.
    Correct,
    /// Tolerates partially-collapsed domains by only counting neighbors
    /// whose domain is already small (`domain_size_cutoff`), trading
    /// completeness for speed. Repaired later by `reevaluate_validity`.
    Approximate { domain_size_cutoff: usize },
}

impl Default for ValidityMode {
    fn default() -> Self {
        ValidityMode::Approximate {
            domain_size_cutoff: 4,
        }
    }
}

/// `pattern_id -> Pattern`, handed to a fresh `WFCSolver` by
/// `ObjectDatabase::make_pattern_map`.
pub type PatternMap = HashMap<PatternId, Pattern>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn classes(ids: &[i64]) -> HashSet<ClassId> {
        ids.iter().map(|&i| ClassId::new(i)).collect()
    }

    #[test]
    fn correct_validity_requires_every_requirement_present() {
        let pattern = Pattern::new(ClassId::new(1), vec![ClassId::new(2), ClassId::new(3)], 1.0);
        let c2 = classes(&[2]);
        let c3 = classes(&[3]);
        let neighbors = vec![
            NeighborView { classes: &c2 },
            NeighborView { classes: &c3 },
        ];
        assert!(pattern.valid(ValidityMode::Correct, neighbors));

        let only_c2 = classes(&[2]);
        let neighbors_missing = vec![NeighborView { classes: &only_c2 }];
        assert!(!pattern.valid(ValidityMode::Correct, neighbors_missing));
    }

    #[test]
    fn single_neighbor_can_satisfy_multiple_requirements() {
        let pattern = Pattern::new(ClassId::new(1), vec![ClassId::new(2), ClassId::new(3)], 1.0);
        let both = classes(&[2, 3]);
        let neighbors = vec![NeighborView { classes: &both }];
        assert!(pattern.valid(ValidityMode::Correct, neighbors));
    }

    #[test]
    fn approximate_ignores_large_undecided_domains() {
        let pattern = Pattern::new(ClassId::new(1), vec![ClassId::new(2)], 1.0);
        let big = classes(&[2, 3, 4, 5, 6, 7]); // len 6 > cutoff 4
        let neighbors = vec![NeighborView { classes: &big }];
        assert!(!pattern.valid(
            ValidityMode::Approximate {
                domain_size_cutoff: 4
            },
            neighbors
        ));
    }

    #[test]
    fn zero_weight_pattern_is_never_chosen_by_construction() {
        let pattern = Pattern::new(ClassId::new(1), vec![], 0.0);
        assert_eq!(pattern.weight, 0.0);
    }
}
