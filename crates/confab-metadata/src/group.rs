//! Declared groups.

use confab_rules::Element;
use serde::Serialize;

/// A declared group from the groups rule document.
///
/// Immutable for the lifetime of one registry generation; a reload
/// replaces the whole registry rather than editing groups in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Group {
    /// Unique group name.
    pub name: String,
    /// Mutual-exclusion domain, if any. A client holds at most one
    /// group per category.
    pub category: Option<String>,
    /// Bundles conferred by membership, in declaration order.
    pub bundles: Vec<String>,
    /// Whether this group can anchor a client's configuration identity.
    pub is_profile: bool,
    /// Whether clients may assert this group as their profile.
    pub is_public: bool,
    /// Whether this group bootstraps unknown clients.
    pub is_default: bool,
}

impl Group {
    /// Build a group from its declaring element.
    ///
    /// `public` defaults to the `profile` flag when absent: a profile
    /// group is assignable unless explicitly made non-public.
    pub fn from_element(element: &Element) -> Option<Self> {
        let name = element.name_attr()?.to_string();
        let is_profile = element.flag("profile");
        let is_public = match element.attr("public") {
            Some(_) => element.flag("public"),
            None => is_profile,
        };
        Some(Self {
            name,
            category: element.attr("category").map(str::to_string),
            bundles: element
                .children_named("Bundle")
                .filter_map(Element::name_attr)
                .map(str::to_string)
                .collect(),
            is_profile,
            is_public,
            is_default: element.flag("default"),
        })
    }

    /// Whether the element carries an explicit group declaration: any of
    /// the declaration attributes, or any children.
    pub fn is_declaration(element: &Element) -> bool {
        element.attr("profile").is_some()
            || element.attr("public").is_some()
            || element.attr("category").is_some()
            || element.attr("default").is_some()
            || !element.children.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
