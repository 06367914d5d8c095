//! Fixed-point membership resolution.
//!
//! Resolution is a pure computation: `(client, seed groups, seed
//! categories) → (final groups, final categories)`. Each pass evaluates
//! all positive predicates, then all negated predicates, against the
//! state the pass started from; the loop exits when a full pass changes
//! nothing.
//!
//! Within the positive phase the delta is computed first and applied
//! afterwards. Category claims are tracked in a pass-local map consulted
//! in document order, so a category claimed by a seed group (or by an
//! earlier predicate in the same pass) deterministically suppresses later
//! claimants. This order-sensitivity is intentional and pinned by tests;
//! downstream rule files depend on it.

use std::collections::{BTreeMap, HashSet};

use tracing::{error, trace};

use crate::registry::GroupRegistry;

/// Result of resolving one client's membership.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Final group set, in first-seen order (seed groups first).
    pub groups: Vec<String>,
    /// Category → owning group.
    pub categories: BTreeMap<String, String>,
}

impl Resolution {
    /// Whether a group is in the resolved set.
    pub fn contains(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Resolve a client's group membership to a fixed point.
///
/// Seed groups claim their declared categories in order before any
/// predicate runs; seed category assignments take precedence over both.
pub fn resolve(
    registry: &GroupRegistry,
    client: &str,
    seed_groups: &[String],
    seed_categories: &BTreeMap<String, String>,
) -> Resolution {
    let mut order: Vec<String> = Vec::new();
    let mut members: HashSet<String> = HashSet::new();
    let mut categories = seed_categories.clone();

    for group in seed_groups {
        if members.contains(group) {
            continue;
        }
        // Seeds claim categories in order; a seed whose category is
        // already held is suppressed like any other claimant.
        if let Some(category) = registry.group(group).and_then(|g| g.category.as_ref()) {
            if let Some(holder) = categories.get(category) {
                if holder != group {
                    registry.note_suppressed(client, group, category, holder);
                    continue;
                }
            }
            let _ = categories.insert(category.clone(), group.clone());
        }
        let _ = members.insert(group.clone());
        order.push(group.clone());
    }

    // Each productive pass grows or shrinks the set, so convergence is
    // bounded by the rule count; the cap only guards a pathological
    // mutually-oscillating rule set.
    let max_passes = registry.len()
        + registry.positive_predicates().len()
        + registry.negated_predicates().len()
        + 2;

    for pass in 0..max_passes {
        let start_members = members.clone();
        let start_categories = categories.clone();

        // Positive phase: compute the delta against the pass-start state,
        // then apply it.
        let mut additions: Vec<String> = Vec::new();
        for predicate in registry.positive_predicates() {
            if members.contains(&predicate.target) || additions.contains(&predicate.target) {
                continue;
            }
            if !predicate.condition_holds(client, &start_members) {
                continue;
            }
            if let Some(category) = &predicate.category {
                if let Some(holder) = categories.get(category) {
                    if holder != &predicate.target {
                        registry.note_suppressed(client, &predicate.target, category, holder);
                        continue;
                    }
                }
                let _ = categories.insert(category.clone(), predicate.target.clone());
            }
            additions.push(predicate.target.clone());
        }
        for group in additions {
            if registry.group(&group).is_none() {
                registry.note_undeclared(&group);
            }
            let _ = members.insert(group.clone());
            order.push(group);
        }

        // Negated phase: evaluated after all positives of this pass.
        let current = members.clone();
        let mut removals: Vec<String> = Vec::new();
        for predicate in registry.negated_predicates() {
            if !members.contains(&predicate.target) {
                continue;
            }
            if predicate.condition_holds(client, &current) {
                removals.push(predicate.target.clone());
            }
        }
        for group in &removals {
            let _ = members.remove(group);
            order.retain(|g| g != group);
            categories.retain(|_, holder| holder != group);
        }

        if members == start_members && categories == start_categories {
            trace!(client, passes = pass + 1, groups = members.len(), "resolution converged");
            break;
        }
        if pass + 1 == max_passes {
            error!(
                client,
                passes = max_passes,
                "membership resolution did not converge; rule set oscillates"
            );
        }
    }

    Resolution {
        groups: order,
        categories,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
