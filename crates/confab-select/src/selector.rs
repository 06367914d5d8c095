//! Candidate pools across fragment documents.
//!
//! A [`FragmentSelector`] aggregates many fragment documents, keeping one
//! candidate pool per entry key. Each document's pool is re-derived in
//! full whenever that document reloads, so a reload can never leave stale
//! candidates behind. Binding an entry runs [`best_match`] over the
//! union of every loaded document's pool for that key and merges the
//! winning payload onto the caller's element.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use confab_core::errors::ConsistencyError;
use confab_metadata::ResolvedMetadata;
use confab_rules::Element;
use tracing::{debug, warn};

use crate::specificity::{CandidateFragment, QualifierTerm, SpecificityTag, best_match};

/// Pool key: tag name plus `name` attribute.
///
/// Ties are detected within one key only; two documents may both declare
/// `Path /etc/a` and `Path /etc/b` at equal priority without conflict.
type EntryKey = (String, String);

/// Candidates derived from one source document.
struct DocumentPool {
    priority: i32,
    entries: HashMap<EntryKey, Vec<CandidateFragment>>,
}

/// Priority-ordered, specificity-ranked fragment directory.
#[derive(Default)]
pub struct FragmentSelector {
    documents: HashMap<PathBuf, DocumentPool>,
}

impl FragmentSelector {
    /// Create an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive the candidate pool for one source document.
    ///
    /// Replaces any pool previously registered under `path`. The
    /// document root's `priority` attribute supplies the priority for
    /// group-tagged candidates; a missing or unparsable value counts as
    /// zero with a warning.
    pub fn reload_document(&mut self, path: &Path, root: &Element) {
        let priority = match root.attr("priority") {
            None => 0,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(path = %path.display(), value = raw, "unparsable document priority, using 0");
                0
            }),
        };
        let mut pool = DocumentPool {
            priority,
            entries: HashMap::new(),
        };
        for child in &root.children {
            collect_candidates(child, &mut Vec::new(), &mut pool, path);
        }
        debug!(
            path = %path.display(),
            priority,
            entries = pool.entries.len(),
            "fragment document pool rebuilt"
        );
        let _ = self.documents.insert(path.to_path_buf(), pool);
    }

    /// Drop a document's pool, e.g. when its file is deleted.
    pub fn remove_document(&mut self, path: &Path) {
        if self.documents.remove(path).is_some() {
            debug!(path = %path.display(), "fragment document pool dropped");
        }
    }

    /// Whether any candidate is registered for the entry shape of `out`.
    pub fn covers(&self, out: &Element) -> bool {
        let key = entry_key(out);
        self.documents
            .values()
            .any(|d| d.entries.contains_key(&key))
    }

    /// Bind the best-matching candidate for `out` onto `out`.
    ///
    /// Attributes already present on `out` are preserved; only missing
    /// ones are filled in from the winner. The winner's children are
    /// appended. Fails when no candidate matches or the top candidates
    /// tie.
    pub fn bind(
        &self,
        out: &mut Element,
        metadata: &ResolvedMetadata,
    ) -> Result<(), ConsistencyError> {
        let key = entry_key(out);
        let label = format!("{}:{}", key.0, key.1);
        let candidates = self
            .documents
            .values()
            .flat_map(|d| d.entries.get(&key).into_iter().flatten());
        let winner = best_match(&label, candidates, metadata)?;
        for (attr, value) in &winner.payload.attributes {
            if !out.attributes.contains_key(attr) {
                let _ = out
                    .attributes
                    .insert(attr.clone(), value.clone());
            }
        }
        out.children.extend(winner.payload.children.iter().cloned());
        debug!(
            entry = label,
            client = metadata.hostname,
            origin = %winner.origin.display(),
            "entry bound"
        );
        Ok(())
    }
}

fn entry_key(out: &Element) -> EntryKey {
    (
        out.name.clone(),
        out.name_attr().unwrap_or_default().to_string(),
    )
}

/// Walk one subtree, accumulating qualifier terms on the way down.
///
/// `Group` and `Client` elements qualify their children; anything else
/// is a concrete entry. The innermost non-negated qualifier supplies the
/// specificity tag; negated qualifiers only constrain matching.
fn collect_candidates(
    element: &Element,
    chain: &mut Vec<QualifierTerm>,
    pool: &mut DocumentPool,
    origin: &Path,
) {
    match element.name.as_str() {
        "Group" | "Client" => {
            let Some(name) = element.name_attr() else {
                warn!(
                    path = %origin.display(),
                    tag = element.name,
                    "qualifier without a name attribute ignored"
                );
                return;
            };
            let negate = element.flag("negate");
            let term = if element.name == "Group" {
                QualifierTerm::Group {
                    name: name.to_string(),
                    negate,
                }
            } else {
                QualifierTerm::Host {
                    name: name.to_ascii_lowercase(),
                    negate,
                }
            };
            chain.push(term);
            for child in &element.children {
                collect_candidates(child, chain, pool, origin);
            }
            let _ = chain.pop();
        }
        _ => {
            let key = entry_key(element);
            let candidate = CandidateFragment {
                payload: element.clone(),
                tag: tag_for(chain, pool.priority),
                qualifiers: chain.clone(),
                origin: origin.to_path_buf(),
            };
            pool.entries.entry(key).or_default().push(candidate);
        }
    }
}

/// Specificity tag for a candidate under the given qualifier chain.
fn tag_for(chain: &[QualifierTerm], priority: i32) -> SpecificityTag {
    for term in chain.iter().rev() {
        match term {
            QualifierTerm::Host { name, negate: false } => {
                return SpecificityTag::Host(name.clone());
            }
            QualifierTerm::Group { name, negate: false } => {
                return SpecificityTag::Group {
                    name: name.clone(),
                    priority,
                };
            }
            _ => {}
        }
    }
    SpecificityTag::AllClients
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
