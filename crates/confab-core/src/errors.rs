//! Error taxonomy for the confab engine.
//!
//! Four error families, each with a distinct recovery policy:
//!
//! - [`ParseError`] — malformed rule document. Recovered locally: the
//!   previous in-memory state is retained and the reload is aborted for
//!   that document only.
//! - [`ConsistencyError`] — well-formed but semantically invalid request
//!   or rule set. Always propagated to the immediate caller; never
//!   silently swallowed, because proceeding would mis-configure a host.
//! - [`RuntimeError`] — engine used before initialization completed.
//!   Fatal to the calling request only.
//! - [`WriteError`] — persistence failure. In-memory state is never
//!   mutated until the on-disk write has succeeded, so both layers stay
//!   consistent with the pre-mutation state.
//!
//! [`EngineError`] is the top-level enum covering all four.

use std::path::PathBuf;

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// EngineError — top-level error enum
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the confab engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed rule document.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Semantically invalid request or rule set.
    #[error("{0}")]
    Consistency(#[from] ConsistencyError),

    /// Engine used before initialization completed.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// Persistence failure.
    #[error("{0}")]
    Write(#[from] WriteError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// ParseError
// ─────────────────────────────────────────────────────────────────────────────

/// A rule document failed to parse.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to read the document from disk.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the document being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Document markup is malformed.
    #[error("malformed document {path} at line {line}, column {column}: {message}")]
    Malformed {
        /// Path of the offending document.
        path: PathBuf,
        /// 1-based line of the error.
        line: usize,
        /// 1-based column of the error.
        column: usize,
        /// What went wrong.
        message: String,
    },

    /// A file transitively includes itself.
    #[error("inclusion cycle: {path} is included by its own include chain")]
    InclusionCycle {
        /// The file that closes the cycle.
        path: PathBuf,
    },
}

impl ParseError {
    /// Construct a `Malformed` error at a parser position.
    pub fn malformed(
        path: impl Into<PathBuf>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            path: path.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsistencyError
// ─────────────────────────────────────────────────────────────────────────────

/// A well-formed but semantically invalid request or rule set.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// A referenced group is not declared anywhere.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// A referenced client is not known to the directory.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A client was added twice in database-backed mode.
    #[error("duplicate client: {0}")]
    DuplicateClient(String),

    /// A profile assignment named a group that is not public.
    #[error("group {0} is not a public group")]
    NotPublic(String),

    /// An address maps to more than one known client.
    #[error("address {address} is ambiguous: matches {first} and {second}")]
    AmbiguousAddress {
        /// The address being resolved.
        address: String,
        /// First matching client.
        first: String,
        /// Second matching client.
        second: String,
    },

    /// No candidate fragment matched the client at all.
    #[error("no matching source for entry {entry} (client {client})")]
    NoMatchingSource {
        /// The entry being bound.
        entry: String,
        /// The client being configured.
        client: String,
    },

    /// Two matching candidates ranked equal; the rule set is ambiguous.
    #[error(
        "ambiguous candidates for entry {entry}: {first_origin} and \
         {second_origin} both match at priority {priority}"
    )]
    PriorityTie {
        /// The entry being bound.
        entry: String,
        /// Origin document of the first candidate.
        first_origin: PathBuf,
        /// Origin document of the second candidate.
        second_origin: PathBuf,
        /// The shared priority value.
        priority: i32,
    },

    /// An unknown client was resolved but no default profile group exists.
    #[error("client {0} is unknown and no default profile group is configured")]
    NoDefaultProfile(String),

    /// A client identity could not be established during authentication.
    #[error("unresolvable identity for address {0}")]
    UnresolvableIdentity(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// RuntimeError
// ─────────────────────────────────────────────────────────────────────────────

/// The engine was used before it finished initializing.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Resolution was requested before the first successful load.
    #[error("metadata resolution requested before initial load completed")]
    NotReady,
}

// ─────────────────────────────────────────────────────────────────────────────
// WriteError
// ─────────────────────────────────────────────────────────────────────────────

/// Persisting a rule document failed.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Could not create or write the temporary file.
    #[error("failed to stage write for {path}: {source}")]
    Stage {
        /// Target document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The atomic rename onto the target path failed.
    #[error("failed to replace {path}: {source}")]
    Replace {
        /// Target document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Another writer held the staging path for longer than the retry budget.
    #[error("write lock contention on {path}: retry budget of {attempts} exhausted")]
    Contention {
        /// Target document path.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
