//! The `RuleDocument`: one rule file plus its transcluded includes.
//!
//! A document keeps its raw **base** tree (exactly what the primary file
//! contains) separate from the **expanded** tree (base with includes
//! spliced in). Compilation reads the expanded tree; mutation and
//! persistence operate on the base tree only, so includes are never
//! flattened back into the primary file on write.
//!
//! Reload policy: a parse failure logs and leaves the previous in-memory
//! state untouched. A stale-but-valid document beats a crashed resolver.

use std::path::{Path, PathBuf};

use confab_core::errors::{EngineError, ParseError, WriteError};
use tracing::{debug, warn};

use crate::includes::{expand_includes, pattern_matches};
use crate::parser::parse_document;
use crate::tree::Element;
use crate::writer::{WriteRetry, write_atomic};

/// An in-memory rule file with include expansion and atomic persistence.
#[derive(Clone, Debug)]
pub struct RuleDocument {
    path: PathBuf,
    retry: WriteRetry,
    base: Option<Element>,
    expanded: Option<Element>,
    included: Vec<PathBuf>,
    patterns: Vec<PathBuf>,
    unmatched: Vec<PathBuf>,
}

impl RuleDocument {
    /// Create an unloaded document for `path`.
    pub fn new(path: impl Into<PathBuf>, retry: WriteRetry) -> Self {
        Self {
            path: path.into(),
            retry,
            base: None,
            expanded: None,
            included: Vec::new(),
            patterns: Vec::new(),
            unmatched: Vec::new(),
        }
    }

    /// Primary file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether at least one load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.base.is_some()
    }

    /// The raw base tree, if loaded.
    pub fn base(&self) -> Option<&Element> {
        self.base.as_ref()
    }

    /// The fully transcluded tree, if loaded.
    pub fn expanded(&self) -> Option<&Element> {
        self.expanded.as_ref()
    }

    /// Concrete include files pulled into the expanded tree.
    pub fn included_files(&self) -> &[PathBuf] {
        &self.included
    }

    /// Include patterns that matched nothing; monitor these so a
    /// later-created file triggers a reload.
    pub fn unmatched_patterns(&self) -> &[PathBuf] {
        &self.unmatched
    }

    /// Every path whose change should reload this document.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.path.clone()];
        paths.extend(self.included.iter().cloned());
        paths.extend(self.unmatched.iter().cloned());
        paths
    }

    /// Whether a change-notification path belongs to this document.
    ///
    /// Besides the primary file and already-included files, this claims
    /// any path an include directive's pattern matches, so a file
    /// created after the last expansion still triggers a reload.
    pub fn covers(&self, path: &Path) -> bool {
        self.path == path
            || self.included.iter().any(|p| p == path)
            || self.patterns.iter().any(|p| pattern_matches(p, path))
    }

    /// Parse the primary file and re-expand includes.
    ///
    /// On failure the previous base/expanded trees are retained.
    pub fn load(&mut self) -> Result<(), ParseError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ParseError::Io {
            path: self.path.clone(),
            source,
        })?;
        let base = parse_document(&self.path, &content)?;
        let expansion = expand_includes(&self.path, &base)?;

        self.base = Some(base);
        self.expanded = Some(expansion.root);
        self.included = expansion.included;
        self.patterns = expansion.patterns;
        self.unmatched = expansion.unmatched;
        debug!(
            path = %self.path.display(),
            includes = self.included.len(),
            "rule document loaded"
        );
        Ok(())
    }

    /// [`RuleDocument::load`], but a failure only logs.
    ///
    /// Used on change notifications: one malformed file must not take
    /// down resolution for documents that are still valid.
    pub fn reload_lenient(&mut self) -> bool {
        match self.load() {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "reload failed, keeping previous state");
                false
            }
        }
    }

    /// Apply a mutation to the base tree, persisting before committing.
    ///
    /// The closure edits a copy of the base tree; the copy is written to
    /// disk atomically and only then installed in memory (and
    /// re-expanded). A write failure leaves both layers at the
    /// pre-mutation state.
    pub fn mutate<F>(&mut self, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Element),
    {
        let mut draft = self
            .base
            .clone()
            .ok_or(confab_core::errors::RuntimeError::NotReady)?;
        f(&mut draft);

        self.write_tree(&draft)?;

        let expansion = expand_includes(&self.path, &draft)?;
        self.base = Some(draft);
        self.expanded = Some(expansion.root);
        self.included = expansion.included;
        self.patterns = expansion.patterns;
        self.unmatched = expansion.unmatched;
        Ok(())
    }

    /// Serialize the current base tree back to the primary file.
    pub fn write(&self) -> Result<(), WriteError> {
        match &self.base {
            Some(base) => self.write_tree(base),
            None => Err(WriteError::Stage {
                path: self.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "document was never loaded",
                ),
            }),
        }
    }

    fn write_tree(&self, tree: &Element) -> Result<(), WriteError> {
        write_atomic(&self.path, tree, self.retry)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn doc_with(content: &str) -> (tempfile::TempDir, RuleDocument) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.xml");
        std::fs::write(&path, content).unwrap();
        let mut doc = RuleDocument::new(&path, WriteRetry::default());
        doc.load().unwrap();
        (dir, doc)
    }

    #[test]
    fn load_populates_both_trees() {
        let (_dir, doc) = doc_with("<Groups><Group name=\"web\"/></Groups>");
        assert!(doc.is_loaded());
        assert_eq!(doc.base().unwrap().children.len(), 1);
        assert_eq!(doc.expanded().unwrap().children.len(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_state() {
        let (dir, mut doc) = doc_with("<Groups><Group name=\"web\"/></Groups>");
        std::fs::write(dir.path().join("groups.xml"), "<Groups><broken").unwrap();

        assert!(!doc.reload_lenient());
        // Old tree still live.
        assert_eq!(doc.expanded().unwrap().children.len(), 1);
    }

    #[test]
    fn includes_kept_out_of_base_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("extra.xml"),
            "<Groups><Group name=\"db\"/></Groups>",
        )
        .unwrap();
        let path = dir.path().join("groups.xml");
        std::fs::write(
            &path,
            "<Groups><Group name=\"web\"/><Include href=\"extra.xml\"/></Groups>",
        )
        .unwrap();

        let mut doc = RuleDocument::new(&path, WriteRetry::default());
        doc.load().unwrap();

        assert_eq!(doc.expanded().unwrap().children.len(), 2);
        // Base keeps the directive, not the spliced content.
        let base_tags: Vec<_> = doc
            .base()
            .unwrap()
            .children
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(base_tags, vec!["Group", "Include"]);
        assert!(doc.covers(&dir.path().join("extra.xml")));
    }

    #[test]
    fn covers_files_matching_an_include_glob_before_they_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.xml");
        std::fs::write(
            &path,
            "<Groups><Include href=\"groups.d/*.xml\" fallback=\"true\"/></Groups>",
        )
        .unwrap();

        let mut doc = RuleDocument::new(&path, WriteRetry::default());
        doc.load().unwrap();

        // Nothing matched yet, but a later-created file in the glob's
        // directory still belongs to this document.
        assert!(doc.included_files().is_empty());
        assert!(doc.covers(&dir.path().join("groups.d").join("extra.xml")));
        assert!(!doc.covers(&dir.path().join("groups.d").join("extra.txt")));
        assert!(!doc.covers(&dir.path().join("extra.xml")));
    }

    #[test]
    fn mutate_persists_before_committing() {
        let (dir, mut doc) = doc_with("<Groups><Group name=\"web\"/></Groups>");
        doc.mutate(|base| {
            base.children
                .push(Element::new("Group").with_attr("name", "db"));
        })
        .unwrap();

        // In-memory and on-disk agree.
        assert_eq!(doc.base().unwrap().children.len(), 2);
        let on_disk = std::fs::read_to_string(dir.path().join("groups.xml")).unwrap();
        assert!(on_disk.contains("name=\"db\""));
    }

    #[test]
    fn mutate_on_unloaded_document_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = RuleDocument::new(dir.path().join("groups.xml"), WriteRetry::default());
        let err = doc.mutate(|_| {}).unwrap_err();
        assert_matches!(err, EngineError::Runtime(_));
    }

    #[test]
    fn write_round_trips_semantically() {
        let (dir, mut doc) = doc_with(
            "<Groups><Group name=\"web\" profile=\"true\"><Bundle name=\"nginx\"/></Group></Groups>",
        );
        let before = doc.base().unwrap().clone();
        doc.write().unwrap();

        let mut reloaded = RuleDocument::new(dir.path().join("groups.xml"), WriteRetry::default());
        reloaded.load().unwrap();
        assert_eq!(reloaded.base().unwrap(), &before);
    }

    #[test]
    fn missing_file_is_io_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = RuleDocument::new(dir.path().join("absent.xml"), WriteRetry::default());
        let err = doc.load().unwrap_err();
        assert_matches!(err, ParseError::Io { .. });
        assert!(!doc.is_loaded());
    }
}
