//! Card Costs
//!
//! Payment checks run against the resources a player tentatively allocated
//! while answering a payment request. The server re-validates every answer;
//! these checks only drive what the UI lets the user submit.

use serde::{Deserialize, Serialize};

use super::state::{Resource, ResourceCounter};

/// Set of resources acceptable for one cost possibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceFilter {
    /// Resources that may be spent.
    pub allowed_resources: Vec<Resource>,
}

impl ResourceFilter {
    /// Whether `resource` passes the filter.
    pub fn allows(&self, resource: Resource) -> bool {
        self.allowed_resources.contains(&resource)
    }
}

/// Alternative ways of paying for a card: any one possibility suffices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardCost {
    /// `(filter, amount)` pairs.
    pub possibilities: Vec<(ResourceFilter, u32)>,
}

impl CardCost {
    /// True if `provided` pays exactly one of the possibilities: the amounts
    /// match and every resource actually provided passes that filter.
    pub fn matches_exact(&self, provided: &ResourceCounter) -> bool {
        let total = counter_total(provided);
        let keys = counter_nonzero_keys(provided);
        self.possibilities
            .iter()
            .any(|(filter, amount)| *amount == total && keys.iter().all(|r| filter.allows(*r)))
    }

    /// True if `resource` could contribute to some non-free possibility.
    pub fn could_accept(&self, resource: Resource) -> bool {
        self.possibilities
            .iter()
            .any(|(filter, amount)| *amount != 0 && filter.allows(resource))
    }

    /// True if some possibility costs nothing.
    pub fn is_free(&self) -> bool {
        self.possibilities.iter().any(|(_, amount)| *amount == 0)
    }
}

/// Sum of all counts, saturating at `u32::MAX`.
pub fn counter_total(counter: &ResourceCounter) -> u32 {
    counter.values().fold(0u32, |acc, n| acc.saturating_add(*n))
}

/// Resources with a non-zero count, in ascending order.
pub fn counter_nonzero_keys(counter: &ResourceCounter) -> Vec<Resource> {
    counter
        .iter()
        .filter(|(_, count)| **count != 0)
        .map(|(resource, _)| *resource)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ids::{BLUE, GREEN, POINTS, RED};

    fn cost(possibilities: &[(&[Resource], u32)]) -> CardCost {
        CardCost {
            possibilities: possibilities
                .iter()
                .map(|(allowed, n)| {
                    (
                        ResourceFilter {
                            allowed_resources: allowed.to_vec(),
                        },
                        *n,
                    )
                })
                .collect(),
        }
    }

    fn counter(entries: &[(Resource, u32)]) -> ResourceCounter {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_counter_helpers() {
        let c = counter(&[(RED, 2), (BLUE, 0), (GREEN, 1)]);
        assert_eq!(counter_total(&c), 3);
        assert_eq!(counter_nonzero_keys(&c), vec![GREEN, RED]);
    }

    #[test]
    fn test_counter_total_saturates() {
        let c = counter(&[(RED, u32::MAX), (BLUE, 5)]);
        assert_eq!(counter_total(&c), u32::MAX);
    }

    #[test]
    fn test_matches_exact() {
        let c = cost(&[(&[RED, BLUE], 2), (&[POINTS], 3)]);

        assert!(c.matches_exact(&counter(&[(RED, 1), (BLUE, 1)])));
        assert!(c.matches_exact(&counter(&[(POINTS, 3)])));
        // Zero entries are ignored.
        assert!(c.matches_exact(&counter(&[(RED, 2), (GREEN, 0)])));
        // Right amount, wrong resource.
        assert!(!c.matches_exact(&counter(&[(RED, 1), (GREEN, 1)])));
        // Allowed resource, wrong amount.
        assert!(!c.matches_exact(&counter(&[(RED, 1)])));
    }

    #[test]
    fn test_free_cost_matches_empty_payment() {
        let c = cost(&[(&[], 0)]);
        assert!(c.is_free());
        assert!(c.matches_exact(&ResourceCounter::new()));
        assert!(!c.could_accept(RED));
    }

    #[test]
    fn test_could_accept() {
        let c = cost(&[(&[RED], 1), (&[BLUE], 0)]);
        assert!(c.could_accept(RED));
        assert!(!c.could_accept(BLUE));
        assert!(!c.could_accept(GREEN));
    }
}
