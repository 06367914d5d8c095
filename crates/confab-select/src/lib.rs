//! # confab-select
//!
//! The fragment-selection half of the confab engine: given many source
//! documents full of specificity-qualified configuration fragments, pick
//! exactly one candidate per entry for a client and bind it.
//!
//! - [`specificity`] defines the tag ordering (host > group-by-priority >
//!   all-clients) and the single-winner selection with loud tie detection
//! - [`selector`] maintains per-entry candidate pools across documents
//!   and fills caller-provided entries from the winning candidate

#![deny(unsafe_code)]

pub mod selector;
pub mod specificity;

pub use selector::FragmentSelector;
pub use specificity::{CandidateFragment, QualifierTerm, SpecificityTag, best_match};
