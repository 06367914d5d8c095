//! # confab-rules
//!
//! Rule-document handling for the confab engine.
//!
//! A rule document is an XML-subset tree (`<Groups>`, `<Clients>`, or a
//! priority-tagged fragment document) that may transclude other files via
//! `<Include href="..."/>` directives, where `href` accepts glob patterns.
//!
//! The crate keeps two trees per document:
//! - the **base** tree — exactly what was parsed from the primary file;
//!   all mutation and persistence goes through it
//! - the **expanded** tree — the base with every include directive spliced
//!   in; all rule compilation reads it
//!
//! Persistence uses a temp-file + atomic-rename protocol with a bounded
//! retry budget for concurrent-writer contention, writing through symlinks
//! rather than over them.

#![deny(unsafe_code)]

pub mod document;
pub mod includes;
pub mod monitor;
pub mod parser;
pub mod tree;
pub mod writer;

pub use document::RuleDocument;
pub use monitor::{ChangeKind, FileMonitor, MonitorEvent, NotifyMonitor};
pub use parser::parse_document;
pub use tree::Element;
pub use writer::serialize_document;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
