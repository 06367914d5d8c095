//! # confab-metadata
//!
//! The metadata half of the confab engine: turning the declarative group
//! and client rule documents into, per client, a fully resolved set of
//! groups, bundles, and category assignments.
//!
//! - [`registry`] compiles a groups document into declared [`Group`]s and
//!   positive/negated [`MembershipPredicate`] tables (two-phase walk)
//! - [`resolver`] runs the predicates to a fixed point with category
//!   exclusivity enforced deterministically
//! - [`clients`] owns per-client static facts, address resolution with a
//!   TTL cache, and check-in authentication
//! - [`metadata`] is the read-only [`ResolvedMetadata`] snapshot handed
//!   to fragment backends, with a query handle back into the registry

#![deny(unsafe_code)]

pub mod clients;
pub mod group;
pub mod metadata;
pub mod predicate;
pub mod registry;
pub mod resolver;

pub use clients::{ClientDirectory, ClientRecord, NameResolver, NoReverseLookup};
pub use group::Group;
pub use metadata::{MetadataQuery, ResolvedMetadata};
pub use predicate::{ConditionTerm, MembershipPredicate};
pub use registry::GroupRegistry;
pub use resolver::{Resolution, resolve};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let registry = GroupRegistry::default();
        assert!(registry.default_group().is_none());
        let _resolver: NoReverseLookup = NoReverseLookup;
    }
}
