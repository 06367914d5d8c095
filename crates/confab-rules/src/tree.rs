//! Document tree model.
//!
//! [`Element`] is a plain attribute-bearing tree node. Rule compilation
//! and fragment matching never mutate a live tree in place; they read an
//! immutable input and build fresh output structures.

use std::collections::BTreeMap;

/// One node of a rule-document tree.
///
/// Attributes are kept in a `BTreeMap` so serialization order is stable;
/// children preserve document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    /// Tag name, e.g. `Group`, `Client`, `Bundle`, `Include`.
    pub name: String,
    /// Attribute map.
    pub attributes: BTreeMap<String, String>,
    /// Child elements in document order.
    pub children: Vec<Element>,
    /// Concatenated character data directly under this element, trimmed.
    pub text: String,
}

impl Element {
    /// Create an element with no attributes, children, or text.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder-style child appender.
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Attribute value by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute interpreted as a boolean flag.
    ///
    /// `true`/`yes`/`1` (case-insensitive) are true; anything else,
    /// including an absent attribute, is false.
    pub fn flag(&self, key: &str) -> bool {
        self.attr(key).is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
        })
    }

    /// The `name` attribute, which nearly every rule element carries.
    pub fn name_attr(&self) -> Option<&str> {
        self.attr("name")
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.attributes.insert(key.into(), value.into());
    }

    /// Remove an attribute if present.
    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    /// Iterate over children with a given tag name.
    ///
    /// The yielded references borrow from `self` only; `name` may be a
    /// shorter-lived borrow.
    pub fn children_named<'s>(&'s self, name: &str) -> impl Iterator<Item = &'s Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First child with a given tag name and `name` attribute value.
    pub fn find_child(&self, name: &str, name_attr: &str) -> Option<&Element> {
        self.children_named(name)
            .find(|c| c.name_attr() == Some(name_attr))
    }

    /// Mutable counterpart of [`Element::find_child`].
    pub fn find_child_mut(&mut self, name: &str, name_attr: &str) -> Option<&mut Element> {
        self.children
            .iter_mut()
            .filter(|c| c.name == name)
            .find(|c| c.attr("name") == Some(name_attr))
    }

    /// Remove every child with the given tag and `name` attribute.
    ///
    /// Returns how many children were removed.
    pub fn remove_children(&mut self, name: &str, name_attr: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|c| !(c.name == name && c.name_attr() == Some(name_attr)));
        before - self.children.len()
    }

    /// Depth-first pre-order traversal over the whole subtree.
    pub fn walk(&self, visit: &mut dyn FnMut(&Element)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::new("Groups")
            .with_child(
                Element::new("Group")
                    .with_attr("name", "web")
                    .with_attr("profile", "true")
                    .with_child(Element::new("Bundle").with_attr("name", "nginx")),
            )
            .with_child(Element::new("Group").with_attr("name", "db"))
    }

    #[test]
    fn attr_lookup() {
        let root = sample();
        let web = root.find_child("Group", "web").unwrap();
        assert_eq!(web.attr("profile"), Some("true"));
        assert!(web.flag("profile"));
        assert!(!web.flag("public"));
    }

    #[test]
    fn flag_accepts_yes_and_one() {
        let elem = Element::new("Client")
            .with_attr("floating", "Yes")
            .with_attr("secure", "1")
            .with_attr("other", "nope");
        assert!(elem.flag("floating"));
        assert!(elem.flag("secure"));
        assert!(!elem.flag("other"));
    }

    #[test]
    fn find_and_remove_children() {
        let mut root = sample();
        assert!(root.find_child("Group", "db").is_some());
        assert_eq!(root.remove_children("Group", "db"), 1);
        assert!(root.find_child("Group", "db").is_none());
        assert_eq!(root.remove_children("Group", "db"), 0);
    }

    #[test]
    fn walk_visits_all_nodes() {
        let mut names = Vec::new();
        sample().walk(&mut |e| names.push(e.name.clone()));
        assert_eq!(names, vec!["Groups", "Group", "Bundle", "Group"]);
    }

    #[test]
    fn found_child_outlives_the_name_argument() {
        // The returned borrow is tied to the tree, not to the lookup key.
        let root = sample();
        let web = {
            let tag = String::from("Group");
            let name = String::from("web");
            root.find_child(&tag, &name)
        };
        assert_eq!(web.and_then(Element::name_attr), Some("web"));
    }

    #[test]
    fn children_named_preserves_order() {
        let root = sample();
        let names: Vec<_> = root
            .children_named("Group")
            .filter_map(Element::name_attr)
            .collect();
        assert_eq!(names, vec!["web", "db"]);
    }
}
