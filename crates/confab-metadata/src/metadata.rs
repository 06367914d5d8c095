//! Resolved client metadata.
//!
//! [`ResolvedMetadata`] is the snapshot handed to fragment backends: the
//! client's identity facts plus the fully resolved group, bundle, and
//! category state. It is built fresh per resolution request; caching and
//! invalidation are the caller's concern (keyed off the engine's
//! generation signal).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::clients::ClientRecord;
use crate::registry::GroupRegistry;
use crate::resolver::{Resolution, resolve};

/// Read-only lookups back into the registry that produced a metadata
/// snapshot.
#[derive(Clone, Debug, Default)]
pub struct MetadataQuery {
    registry: Arc<GroupRegistry>,
}

impl MetadataQuery {
    /// Wrap a registry handle.
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    /// Names of all profile groups, sorted.
    pub fn profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .groups()
            .filter(|g| g.is_profile)
            .map(|g| g.name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Whether a group may be asserted as a profile by clients.
    pub fn is_public(&self, group: &str) -> bool {
        self.registry.group(group).is_some_and(|g| g.is_public)
    }

    /// Declared groups carrying a category, sorted.
    pub fn groups_in_category(&self, category: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .groups_in_category(category)
            .map(|g| g.name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// The registry this snapshot was resolved against.
    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }
}

/// A client's fully resolved configuration identity.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedMetadata {
    /// Canonical lowercase hostname.
    pub hostname: String,
    /// The profile group anchoring this client, if any.
    pub profile: Option<String>,
    /// Resolved group set in first-seen order.
    pub groups: Vec<String>,
    /// Union of bundles conferred by the resolved groups.
    pub bundles: BTreeSet<String>,
    /// Category → owning group; at most one group per category.
    pub categories: BTreeMap<String, String>,
    /// Alternate names.
    pub aliases: BTreeSet<String>,
    /// Known addresses.
    pub addresses: BTreeSet<String>,
    /// Per-client secret, if declared.
    pub password: Option<String>,
    /// Stable client identifier.
    pub uuid: Option<Uuid>,
    /// Last reported agent version.
    pub version: Option<String>,
    /// Registry lookups for fragment backends.
    #[serde(skip)]
    pub query: MetadataQuery,
}

impl ResolvedMetadata {
    /// Resolve metadata for a client record against a registry.
    ///
    /// The seed set is the declared profile group; everything else comes
    /// out of the fixed-point iteration.
    pub fn build(record: &ClientRecord, registry: &Arc<GroupRegistry>) -> Self {
        let seeds: Vec<String> = record.profile.iter().cloned().collect();
        let resolution = resolve(registry, &record.hostname, &seeds, &BTreeMap::new());
        Self::from_resolution(record, registry, resolution)
    }

    fn from_resolution(
        record: &ClientRecord,
        registry: &Arc<GroupRegistry>,
        resolution: Resolution,
    ) -> Self {
        let bundles = bundle_union(registry, &resolution.groups);
        Self {
            hostname: record.hostname.clone(),
            profile: record.profile.clone(),
            groups: resolution.groups,
            bundles,
            categories: resolution.categories,
            aliases: record.aliases.clone(),
            addresses: record.addresses.clone(),
            password: record.password.clone(),
            uuid: record.uuid,
            version: record.version.clone(),
            query: MetadataQuery::new(Arc::clone(registry)),
        }
    }

    /// Whether the client is in a group.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Additively merge one more group into this metadata.
    ///
    /// Re-runs resolution with the current set plus `group` as the seed,
    /// so anything the new group implies (or suppresses) is applied too.
    /// Merging a group already present is a no-op.
    #[must_use]
    pub fn merge_group(&self, registry: &Arc<GroupRegistry>, group: &str) -> Self {
        if self.in_group(group) {
            return self.clone();
        }
        let mut seeds = self.groups.clone();
        seeds.push(group.to_string());
        let resolution = resolve(registry, &self.hostname, &seeds, &self.categories);

        let mut merged = self.clone();
        merged.bundles = bundle_union(registry, &resolution.groups);
        merged.groups = resolution.groups;
        merged.categories = resolution.categories;
        merged.query = MetadataQuery::new(Arc::clone(registry));
        merged
    }
}

fn bundle_union(registry: &GroupRegistry, groups: &[String]) -> BTreeSet<String> {
    groups
        .iter()
        .filter_map(|name| registry.group(name))
        .flat_map(|g| g.bundles.iter().cloned())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use confab_rules::parse_document;

    use super::*;

    fn registry(source: &str) -> Arc<GroupRegistry> {
        let root = parse_document(std::path::Path::new("groups.xml"), source).unwrap();
        Arc::new(GroupRegistry::compile(&root))
    }

    fn record(hostname: &str, profile: &str) -> ClientRecord {
        ClientRecord {
            hostname: hostname.to_string(),
            profile: Some(profile.to_string()),
            aliases: BTreeSet::new(),
            addresses: BTreeSet::new(),
            uuid: None,
            password: None,
            floating: false,
            secure: false,
            auth: None,
            version: None,
        }
    }

    const GROUPS: &str = r#"<Groups>
        <Group name="web" profile="true" category="role">
          <Bundle name="nginx"/>
          <Group name="monitored"/>
        </Group>
        <Group name="monitored" public="true">
          <Bundle name="node-exporter"/>
        </Group>
        <Group name="db" profile="true" category="role">
          <Bundle name="postgres"/>
        </Group>
      </Groups>"#;

    #[test]
    fn build_resolves_groups_bundles_categories() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(&record("host1", "web"), &registry);

        assert_eq!(metadata.groups, vec!["web", "monitored"]);
        assert_eq!(
            metadata.bundles,
            ["nginx", "node-exporter"]
                .iter()
                .map(|s| (*s).to_string())
                .collect()
        );
        assert_eq!(
            metadata.categories.get("role").map(String::as_str),
            Some("web")
        );
    }

    #[test]
    fn category_invariant_holds() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(&record("host1", "web"), &registry);

        for (category, owner) in &metadata.categories {
            let holders: Vec<_> = metadata
                .groups
                .iter()
                .filter(|g| {
                    registry
                        .group(g)
                        .is_some_and(|d| d.category.as_deref() == Some(category))
                })
                .collect();
            assert_eq!(holders, vec![owner]);
        }
    }

    #[test]
    fn merge_present_group_is_noop() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(&record("host1", "web"), &registry);
        let merged = metadata.merge_group(&registry, "monitored");
        assert_eq!(merged.groups, metadata.groups);
        assert_eq!(merged.categories, metadata.categories);
        assert_eq!(merged.bundles, metadata.bundles);
    }

    #[test]
    fn merge_new_group_pulls_its_bundles() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(
            &record("host1", "db"),
            &registry,
        );
        assert!(!metadata.in_group("monitored"));

        let merged = metadata.merge_group(&registry, "monitored");
        assert!(merged.in_group("monitored"));
        assert!(merged.bundles.contains("node-exporter"));
        // The original profile's category claim survives the merge.
        assert_eq!(merged.categories.get("role").map(String::as_str), Some("db"));
    }

    #[test]
    fn merge_respects_category_exclusivity() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(&record("host1", "db"), &registry);
        // web shares category "role" with db; the existing claim wins
        // and the conflicting group is suppressed entirely.
        let merged = metadata.merge_group(&registry, "web");
        assert!(!merged.in_group("web"));
        assert_eq!(merged.categories.get("role").map(String::as_str), Some("db"));
    }

    #[test]
    fn query_reaches_back_into_registry() {
        let registry = registry(GROUPS);
        let metadata = ResolvedMetadata::build(&record("host1", "web"), &registry);
        assert_eq!(metadata.query.profiles(), vec!["db", "web"]);
        assert!(metadata.query.is_public("monitored"));
        assert_eq!(metadata.query.groups_in_category("role"), vec!["db", "web"]);
    }

    #[test]
    fn resolving_twice_yields_identical_metadata() {
        let registry = registry(GROUPS);
        let first = ResolvedMetadata::build(&record("host1", "web"), &registry);
        let second = ResolvedMetadata::build(&record("host1", "web"), &registry);
        assert_eq!(first.groups, second.groups);
        assert_eq!(first.categories, second.categories);
        assert_eq!(first.bundles, second.bundles);
    }
}
