//! Include-directive expansion.
//!
//! An `<Include href="..."/>` child anywhere in a document is replaced by
//! the children of the referenced document's root element. The `href` may
//! be a glob pattern relative to the including file's directory; a pattern
//! expands to zero or more files in name order.
//!
//! A pattern matching nothing is not fatal: the literal pattern is
//! reported back so the caller can register a monitor and pick the file
//! up once it appears. The diagnostic is debug-level when the directive
//! declares `fallback="true"`, error-level otherwise.
//!
//! A file transitively including itself is a hard parse failure.

use std::path::{Path, PathBuf};

use confab_core::errors::ParseError;
use globset::Glob;
use tracing::{debug, error};

use crate::parser::parse_document;
use crate::tree::Element;

/// Tag name of the inclusion directive.
pub const INCLUDE_TAG: &str = "Include";

/// Result of expanding a document's include directives.
#[derive(Clone, Debug)]
pub struct IncludeExpansion {
    /// The fully transcluded tree.
    pub root: Element,
    /// Concrete files pulled in, in splice order.
    pub included: Vec<PathBuf>,
    /// Every directive's absolute pattern, matched or not. A change
    /// notification for a path one of these matches belongs to this
    /// document even when the file did not exist at expansion time.
    pub patterns: Vec<PathBuf>,
    /// Patterns that matched nothing; monitor these for later creation.
    pub unmatched: Vec<PathBuf>,
}

/// Expand every include directive under `base`, recursively.
pub fn expand_includes(path: &Path, base: &Element) -> Result<IncludeExpansion, ParseError> {
    let mut visiting = vec![canonical(path)];
    let mut expansion = IncludeExpansion {
        root: Element::new(&base.name),
        included: Vec::new(),
        patterns: Vec::new(),
        unmatched: Vec::new(),
    };
    expansion.root = expand_element(path, base, &mut visiting, &mut expansion)?;
    Ok(expansion)
}

fn expand_element(
    doc_path: &Path,
    element: &Element,
    visiting: &mut Vec<PathBuf>,
    expansion: &mut IncludeExpansion,
) -> Result<Element, ParseError> {
    let mut out = Element::new(&element.name);
    out.attributes = element.attributes.clone();
    out.text = element.text.clone();

    for child in &element.children {
        if child.name == INCLUDE_TAG {
            splice_include(doc_path, child, &mut out, visiting, expansion)?;
        } else {
            out.children
                .push(expand_element(doc_path, child, visiting, expansion)?);
        }
    }
    Ok(out)
}

fn splice_include(
    doc_path: &Path,
    directive: &Element,
    out: &mut Element,
    visiting: &mut Vec<PathBuf>,
    expansion: &mut IncludeExpansion,
) -> Result<(), ParseError> {
    let Some(href) = directive.attr("href") else {
        error!(path = %doc_path.display(), "Include directive without href, skipping");
        return Ok(());
    };

    let dir = doc_path.parent().unwrap_or_else(|| Path::new("."));
    let pattern = dir.join(href);
    expansion.patterns.push(pattern.clone());
    let matches = expand_pattern(&pattern);

    if matches.is_empty() {
        if directive.flag("fallback") {
            debug!(pattern = %pattern.display(), "include pattern matched nothing (fallback declared)");
        } else {
            error!(pattern = %pattern.display(), "include pattern matched nothing");
        }
        expansion.unmatched.push(pattern);
        return Ok(());
    }

    for file in matches {
        let canon = canonical(&file);
        if visiting.contains(&canon) {
            return Err(ParseError::InclusionCycle { path: file });
        }

        let content = std::fs::read_to_string(&file).map_err(|source| ParseError::Io {
            path: file.clone(),
            source,
        })?;
        let sub_root = parse_document(&file, &content)?;

        visiting.push(canon);
        let expanded = expand_element(&file, &sub_root, visiting, expansion)?;
        let _ = visiting.pop();

        expansion.included.push(file);
        out.children.extend(expanded.children);
    }
    Ok(())
}

/// Whether an include pattern matches a concrete path.
///
/// A literal pattern matches by equality; a glob pattern matches a file
/// in the same directory whose name satisfies the glob. Used to claim
/// change notifications for files that did not exist at expansion time.
pub fn pattern_matches(pattern: &Path, path: &Path) -> bool {
    let name = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !name.contains(['*', '?', '[']) {
        return pattern == path;
    }
    if pattern.parent() != path.parent() {
        return false;
    }
    let Ok(glob) = Glob::new(&name) else {
        return false;
    };
    path.file_name()
        .is_some_and(|n| glob.compile_matcher().is_match(n.to_string_lossy().as_ref()))
}

/// Expand a possibly-glob path into concrete files, sorted by name.
///
/// A path without glob metacharacters is treated as a literal file that
/// either exists or does not.
fn expand_pattern(pattern: &Path) -> Vec<PathBuf> {
    let name = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !name.contains(['*', '?', '[']) {
        return if pattern.is_file() {
            vec![pattern.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let Some(dir) = pattern.parent() else {
        return Vec::new();
    };
    let Ok(glob) = Glob::new(&name) else {
        error!(pattern = %pattern.display(), "invalid include glob");
        return Vec::new();
    };
    let matcher = glob.compile_matcher();

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .is_some_and(|n| matcher.is_match(n.to_string_lossy().as_ref()))
        })
        .collect();
    files.sort();
    files
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn literal_include_splices_children() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "extra.xml", "<Groups><Group name=\"db\"/></Groups>");
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Group name=\"web\"/><Include href=\"extra.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();

        let names: Vec<_> = expansion
            .root
            .children
            .iter()
            .filter_map(Element::name_attr)
            .collect();
        assert_eq!(names, vec!["web", "db"]);
        assert_eq!(expansion.included.len(), 1);
        assert!(expansion.unmatched.is_empty());
    }

    #[test]
    fn glob_include_expands_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "b-frag.xml", "<Groups><Group name=\"beta\"/></Groups>");
        let _ = write(dir.path(), "a-frag.xml", "<Groups><Group name=\"alpha\"/></Groups>");
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"*-frag.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();

        let names: Vec<_> = expansion
            .root
            .children
            .iter()
            .filter_map(Element::name_attr)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(expansion.included.len(), 2);
    }

    #[test]
    fn unmatched_pattern_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"missing-*.xml\" fallback=\"true\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();

        assert!(expansion.root.children.is_empty());
        assert_eq!(expansion.unmatched.len(), 1);
        assert!(
            expansion.unmatched[0]
                .to_string_lossy()
                .contains("missing-*.xml")
        );
    }

    #[test]
    fn every_directive_pattern_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "a-frag.xml", "<Groups><Group name=\"alpha\"/></Groups>");
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"*-frag.xml\"/><Include href=\"missing-*.xml\" fallback=\"true\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();

        assert_eq!(expansion.patterns.len(), 2);
        assert_eq!(expansion.unmatched.len(), 1);
        assert!(expansion.patterns.contains(&dir.path().join("*-frag.xml")));
        assert!(expansion.patterns.contains(&dir.path().join("missing-*.xml")));
    }

    #[test]
    fn pattern_matching_covers_files_created_later() {
        let base = Path::new("/repo/groups.d");
        assert!(pattern_matches(&base.join("*.xml"), &base.join("new.xml")));
        assert!(!pattern_matches(&base.join("*.xml"), &base.join("new.txt")));
        assert!(!pattern_matches(
            &base.join("*.xml"),
            Path::new("/elsewhere/new.xml")
        ));
        // Literal patterns match by equality only.
        assert!(pattern_matches(&base.join("one.xml"), &base.join("one.xml")));
        assert!(!pattern_matches(&base.join("one.xml"), &base.join("two.xml")));
    }

    #[test]
    fn direct_self_include_is_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"groups.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let err = expand_includes(&main, &base).unwrap_err();
        assert_matches!(err, ParseError::InclusionCycle { .. });
    }

    #[test]
    fn transitive_cycle_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(
            dir.path(),
            "a.xml",
            "<Groups><Include href=\"b.xml\"/></Groups>",
        );
        let _ = write(
            dir.path(),
            "b.xml",
            "<Groups><Include href=\"a.xml\"/></Groups>",
        );
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"a.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let err = expand_includes(&main, &base).unwrap_err();
        assert_matches!(err, ParseError::InclusionCycle { .. });
    }

    #[test]
    fn nested_includes_expand() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "leaf.xml", "<Groups><Group name=\"leaf\"/></Groups>");
        let _ = write(
            dir.path(),
            "mid.xml",
            "<Groups><Group name=\"mid\"/><Include href=\"leaf.xml\"/></Groups>",
        );
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"mid.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();

        let names: Vec<_> = expansion
            .root
            .children
            .iter()
            .filter_map(Element::name_attr)
            .collect();
        assert_eq!(names, vec!["mid", "leaf"]);
        assert_eq!(expansion.included.len(), 2);
    }

    #[test]
    fn malformed_included_file_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "bad.xml", "<Groups><Unclosed></Groups>");
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"bad.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let err = expand_includes(&main, &base).unwrap_err();
        assert_matches!(err, ParseError::Malformed { .. });
    }

    #[test]
    fn same_file_included_twice_without_cycle_is_allowed() {
        // A diamond (two directives pulling the same leaf) is not a cycle.
        let dir = tempfile::tempdir().unwrap();
        let _ = write(dir.path(), "leaf.xml", "<Groups><Group name=\"leaf\"/></Groups>");
        let main = write(
            dir.path(),
            "groups.xml",
            "<Groups><Include href=\"leaf.xml\"/><Include href=\"leaf.xml\"/></Groups>",
        );

        let base = parse_document(&main, &std::fs::read_to_string(&main).unwrap()).unwrap();
        let expansion = expand_includes(&main, &base).unwrap();
        assert_eq!(expansion.included.len(), 2);
    }
}
