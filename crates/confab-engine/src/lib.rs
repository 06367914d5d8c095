//! # confab-engine
//!
//! The top-level facade of the confab configuration-management engine.
//!
//! An [`Engine`] owns the groups and clients rule documents plus any
//! registered fragment documents, compiles them into an atomically
//! swappable snapshot, and exposes:
//!
//! - `resolve_client` — full metadata resolution with default-profile
//!   bootstrap for unknown hosts
//! - `bind` — specificity-ranked fragment binding
//! - persisted mutations (clients, groups, bundles) that write to disk
//!   before touching in-memory state
//! - file-monitor event routing and a reload-generation signal for
//!   downstream cache invalidation

#![deny(unsafe_code)]

pub mod engine;
pub mod logging;

pub use engine::Engine;
pub use logging::init_subscriber;
