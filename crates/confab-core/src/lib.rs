//! # confab-core
//!
//! Foundation crate for the confab configuration-management engine.
//!
//! Provides:
//! - [`errors`] — the four-way error taxonomy shared by every layer
//!   (parse / consistency / runtime / write)
//! - [`config`] — the explicit [`EngineConfig`] struct passed into every
//!   component constructor (no global mutable option state)
//! - [`generation`] — the reload-generation counter and the
//!   cache-invalidation subscription signal

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod generation;

pub use config::{AuthMode, EngineConfig, load_config_from_path};
pub use errors::{
    ConsistencyError, EngineError, ParseError, Result, RuntimeError, WriteError,
};
pub use generation::GenerationSignal;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
