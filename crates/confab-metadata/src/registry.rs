//! The group registry: compiled form of a groups rule document.
//!
//! Compilation is a two-phase walk over the expanded document tree:
//!
//! 1. Collect every `<Group>` element that carries an explicit
//!    declaration (profile/public/category/default attributes, or any
//!    children) into the [`Group`] table. The first group marked
//!    `default` becomes the registry default; later `default` markings
//!    are warned about and ignored.
//! 2. Collect every leaf `<Group>` element nested under at least one
//!    Group/Client ancestor into the positive or negated predicate
//!    table, with the ancestor chain compiled to condition terms.
//!
//! A predicate may target a group never declared in phase 1 — probed and
//! dynamically asserted groups are legal — so that is a resolution-time
//! warning, not a compile failure. Registries are built fresh on every
//! reload and published wholesale; nothing here mutates after compile.

use std::collections::{HashMap, HashSet};

use confab_rules::Element;
use parking_lot::Mutex;
use tracing::warn;

use crate::group::Group;
use crate::predicate::{ConditionTerm, MembershipPredicate};

/// Compiled groups and membership predicates for one document generation.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Group>,
    default_group: Option<String>,
    positive: Vec<MembershipPredicate>,
    negated: Vec<MembershipPredicate>,
    /// Predicate targets never declared; warned once each at resolution.
    undeclared_warned: Mutex<HashSet<String>>,
    /// (client, group) pairs whose category suppression was already
    /// logged, to keep a converging resolver from flooding the log.
    suppression_logged: Mutex<HashSet<(String, String)>>,
}

impl GroupRegistry {
    /// Compile an expanded groups document.
    pub fn compile(root: &Element) -> Self {
        let mut registry = Self::default();
        registry.collect_declarations(root);
        let mut chain: Vec<ConditionTerm> = Vec::new();
        registry.collect_predicates(root, &mut chain);
        registry
    }

    // ── Phase 1: declarations ───────────────────────────────────────

    fn collect_declarations(&mut self, element: &Element) {
        for child in &element.children {
            if child.name == "Group" && Group::is_declaration(child) {
                if let Some(group) = Group::from_element(child) {
                    if group.is_default {
                        match &self.default_group {
                            None => self.default_group = Some(group.name.clone()),
                            Some(existing) if *existing != group.name => {
                                warn!(
                                    kept = %existing,
                                    ignored = %group.name,
                                    "multiple default groups declared, keeping the first"
                                );
                            }
                            Some(_) => {}
                        }
                    }
                    if let Some(existing) = self.groups.get(&group.name) {
                        if *existing != group {
                            warn!(group = %group.name, "group declared twice, keeping the first");
                        }
                    } else {
                        let _ = self.groups.insert(group.name.clone(), group);
                    }
                }
            }
            self.collect_declarations(child);
        }
    }

    // ── Phase 2: predicates ─────────────────────────────────────────

    fn collect_predicates(&mut self, element: &Element, chain: &mut Vec<ConditionTerm>) {
        for child in &element.children {
            match child.name.as_str() {
                "Group" => {
                    let Some(name) = child.name_attr() else { continue };
                    if child.children.iter().any(|c| matches!(c.name.as_str(), "Group" | "Client")) {
                        // Interior node: a condition for everything below it.
                        chain.push(ConditionTerm::InGroup {
                            group: name.to_string(),
                            negate: child.flag("negate"),
                        });
                        self.collect_predicates(child, chain);
                        let _ = chain.pop();
                    } else if !chain.is_empty() {
                        // Leaf under at least one qualifier: a predicate.
                        let predicate = MembershipPredicate {
                            target: name.to_string(),
                            terms: chain.clone(),
                            category: self
                                .groups
                                .get(name)
                                .and_then(|g| g.category.clone()),
                        };
                        if child.flag("negate") {
                            self.negated.push(predicate);
                        } else {
                            self.positive.push(predicate);
                        }
                    }
                    // A top-level childless <Group/> is declaration-only.
                }
                "Client" => {
                    let Some(name) = child.name_attr() else { continue };
                    chain.push(ConditionTerm::IsClient {
                        client: name.to_lowercase(),
                        negate: child.flag("negate"),
                    });
                    self.collect_predicates(child, chain);
                    let _ = chain.pop();
                }
                _ => {}
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Look up a declared group.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// All declared groups, unordered.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Number of declared groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups are declared.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The bootstrap group for unknown clients, if one is declared.
    pub fn default_group(&self) -> Option<&Group> {
        self.default_group.as_deref().and_then(|n| self.groups.get(n))
    }

    /// Positive predicates in document order.
    pub fn positive_predicates(&self) -> &[MembershipPredicate] {
        &self.positive
    }

    /// Negated predicates in document order.
    pub fn negated_predicates(&self) -> &[MembershipPredicate] {
        &self.negated
    }

    /// Declared groups carrying a given category.
    pub fn groups_in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Group> {
        self.groups
            .values()
            .filter(move |g| g.category.as_deref() == Some(category))
    }

    // ── Resolution-time diagnostics ─────────────────────────────────

    /// Warn once that a predicate targets an undeclared group.
    pub fn note_undeclared(&self, target: &str) {
        if self.undeclared_warned.lock().insert(target.to_string()) {
            warn!(group = %target, "predicate targets a group never declared (probed group?)");
        }
    }

    /// Log once per (client, group) that a category claim was blocked.
    pub fn note_suppressed(&self, client: &str, target: &str, category: &str, holder: &str) {
        let key = (client.to_string(), target.to_string());
        if self.suppression_logged.lock().insert(key) {
            warn!(
                client,
                group = target,
                category,
                held_by = holder,
                "group suppressed: category already assigned"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use confab_rules::parse_document;

    use super::*;

    fn compile(source: &str) -> GroupRegistry {
        let root = parse_document(std::path::Path::new("groups.xml"), source).unwrap();
        GroupRegistry::compile(&root)
    }

    #[test]
    fn phase_one_collects_declared_groups() {
        let registry = compile(
            r#"<Groups>
                 <Group name="web" profile="true" category="role">
                   <Bundle name="nginx"/>
                 </Group>
                 <Group name="db" public="true"/>
                 <Group name="bare"/>
               </Groups>"#,
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.group("web").unwrap().is_profile);
        assert_eq!(registry.group("web").unwrap().bundles, vec!["nginx"]);
        assert!(registry.group("db").unwrap().is_public);
        // A bare reference with no attributes or children declares nothing.
        assert!(registry.group("bare").is_none());
    }

    #[test]
    fn first_default_wins() {
        let registry = compile(
            r#"<Groups>
                 <Group name="one" profile="true" default="true"/>
                 <Group name="two" profile="true" default="true"/>
               </Groups>"#,
        );
        assert_eq!(registry.default_group().unwrap().name, "one");
    }

    #[test]
    fn nested_leaf_becomes_positive_predicate() {
        let registry = compile(
            r#"<Groups>
                 <Group name="outer" profile="true">
                   <Group name="inner"/>
                 </Group>
               </Groups>"#,
        );
        let predicates = registry.positive_predicates();
        assert_eq!(predicates.len(), 1);
        assert_eq!(predicates[0].target, "inner");
        assert_eq!(
            predicates[0].terms,
            vec![ConditionTerm::InGroup {
                group: "outer".to_string(),
                negate: false,
            }]
        );
    }

    #[test]
    fn negate_on_leaf_goes_to_negated_table() {
        let registry = compile(
            r#"<Groups>
                 <Client name="client9">
                   <Group name="group11"/>
                   <Group name="group9" negate="true"/>
                 </Client>
               </Groups>"#,
        );
        assert_eq!(registry.positive_predicates().len(), 1);
        assert_eq!(registry.positive_predicates()[0].target, "group11");
        assert_eq!(registry.negated_predicates().len(), 1);
        assert_eq!(registry.negated_predicates()[0].target, "group9");
        assert_eq!(
            registry.negated_predicates()[0].terms,
            vec![ConditionTerm::IsClient {
                client: "client9".to_string(),
                negate: false,
            }]
        );
    }

    #[test]
    fn deep_nesting_builds_full_chain() {
        let registry = compile(
            r#"<Groups>
                 <Group name="a" profile="true">
                   <Client name="h1" negate="true">
                     <Group name="target"/>
                   </Client>
                 </Group>
               </Groups>"#,
        );
        let predicate = &registry.positive_predicates()[0];
        assert_eq!(predicate.target, "target");
        assert_eq!(predicate.terms.len(), 2);
        assert_eq!(
            predicate.terms[1],
            ConditionTerm::IsClient {
                client: "h1".to_string(),
                negate: true,
            }
        );
    }

    #[test]
    fn category_attached_to_predicate_of_declared_target() {
        let registry = compile(
            r#"<Groups>
                 <Group name="env-prod" category="env"/>
                 <Group name="anchor" profile="true">
                   <Group name="env-prod"/>
                 </Group>
               </Groups>"#,
        );
        let predicate = &registry.positive_predicates()[0];
        assert_eq!(predicate.target, "env-prod");
        assert_eq!(predicate.category.as_deref(), Some("env"));
    }

    #[test]
    fn top_level_bare_group_creates_no_predicate() {
        let registry = compile(r#"<Groups><Group name="solo"/></Groups>"#);
        assert!(registry.positive_predicates().is_empty());
        assert!(registry.negated_predicates().is_empty());
    }

    #[test]
    fn interior_group_declared_via_children_still_conditions() {
        // "anchor" both declares (has children) and conditions its subtree.
        let registry = compile(
            r#"<Groups>
                 <Group name="anchor" category="env" profile="true">
                   <Group name="pulled"/>
                 </Group>
               </Groups>"#,
        );
        assert!(registry.group("anchor").is_some());
        assert_eq!(registry.positive_predicates()[0].target, "pulled");
    }
}
