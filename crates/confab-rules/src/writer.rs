//! Document serialization and atomic persistence.
//!
//! Writes go through a temp-file + atomic-rename protocol: serialize to a
//! staging file next to the target, flush it to disk, then rename over the
//! target. A crash mid-write leaves the old file intact. The target is
//! canonicalized first so a symlinked rule file is replaced at its link
//! target rather than the link itself being overwritten.
//!
//! Staging-path contention (another writer mid-flight) retries after a
//! short delay within a configured budget.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use confab_core::errors::WriteError;
use tracing::{debug, warn};

use crate::tree::Element;

/// Serialize a document tree to markup text with a declaration line.
pub fn serialize_document(root: &Element) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n");
    write_element(&mut out, root, 0);
    out
}

fn write_element(out: &mut String, element: &Element, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value, true));
        out.push('"');
    }

    if element.children.is_empty() && element.text.is_empty() {
        out.push_str("/>\n");
        return;
    }

    out.push('>');
    if !element.text.is_empty() {
        out.push_str(&escape(&element.text, false));
    }
    if !element.children.is_empty() {
        out.push('\n');
        for child in &element.children {
            write_element(out, child, depth + 1);
        }
        out.push_str(&indent);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push_str(">\n");
}

fn escape(value: &str, in_attribute: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if in_attribute => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Retry policy for contended writes.
#[derive(Clone, Copy, Debug)]
pub struct WriteRetry {
    /// Total attempts before giving up.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for WriteRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Atomically replace `path` with the serialized form of `root`.
///
/// The staging file is `<path>.new` in the same directory, so the final
/// rename never crosses a filesystem boundary. If the staging path already
/// exists, another writer is mid-flight; we wait and retry within the
/// budget rather than clobbering its work.
pub fn write_atomic(path: &Path, root: &Element, retry: WriteRetry) -> Result<(), WriteError> {
    // Write through a symlink, not over it.
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let staging = staging_path(&target);

    let mut attempt = 0;
    while staging.exists() {
        attempt += 1;
        if attempt >= retry.attempts {
            return Err(WriteError::Contention {
                path: target,
                attempts: retry.attempts,
            });
        }
        debug!(path = %staging.display(), attempt, "staging path busy, retrying");
        std::thread::sleep(retry.delay);
    }

    let result = write_staged(&target, &staging, root);
    if result.is_err() {
        // Never leave a stale staging file blocking future writers.
        if let Err(e) = std::fs::remove_file(&staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to clean staging file");
            }
        }
    }
    result
}

fn write_staged(target: &Path, staging: &Path, root: &Element) -> Result<(), WriteError> {
    let stage = |source| WriteError::Stage {
        path: target.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::create(staging).map_err(stage)?;
    file.write_all(serialize_document(root).as_bytes())
        .map_err(stage)?;
    file.sync_all().map_err(stage)?;
    drop(file);

    std::fs::rename(staging, target).map_err(|source| WriteError::Replace {
        path: target.to_path_buf(),
        source,
    })
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(|| "document".into(), std::ffi::OsStr::to_os_string);
    name.push(".new");
    target.with_file_name(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
