//! Membership predicates.
//!
//! A predicate is the compiled form of one leaf `<Group/>` condition in
//! the groups document: a target group plus the chain of ancestor
//! conditions it sits under, combined by logical AND. A predicate whose
//! leaf carried `negate="true"` removes its target instead of adding it.

use std::collections::HashSet;

/// One ancestor condition in a predicate chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionTerm {
    /// The client is (or, negated, is not) currently in a group.
    InGroup {
        /// Group the membership test names.
        group: String,
        /// Invert the test.
        negate: bool,
    },
    /// The client is (or, negated, is not) a specific host.
    IsClient {
        /// Hostname the identity test names.
        client: String,
        /// Invert the test.
        negate: bool,
    },
}

impl ConditionTerm {
    /// Evaluate this term against a client and its current group set.
    pub fn holds(&self, client: &str, groups: &HashSet<String>) -> bool {
        match self {
            Self::InGroup { group, negate } => groups.contains(group) != *negate,
            Self::IsClient { client: name, negate } => (client == name) != *negate,
        }
    }
}

/// A compiled positive or negated membership rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipPredicate {
    /// The group this predicate adds or removes.
    pub target: String,
    /// Ancestor conditions, all of which must hold.
    pub terms: Vec<ConditionTerm>,
    /// The target group's category, when declared. Carried here so the
    /// resolver can enforce category exclusivity at add time.
    pub category: Option<String>,
}

impl MembershipPredicate {
    /// Whether every condition term holds for the client's current state.
    ///
    /// The category-exclusivity check is separate; this is only the
    /// ancestor-condition chain.
    pub fn condition_holds(&self, client: &str, groups: &HashSet<String>) -> bool {
        self.terms.iter().all(|t| t.holds(client, groups))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
