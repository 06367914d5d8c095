//! Specificity tags and single-winner selection.
//!
//! Every candidate fragment carries a [`SpecificityTag`]: all-clients,
//! group-qualified (with the owning document's numeric priority), or
//! host-qualified. Ranking is host > group > all-clients, with group ties
//! broken by priority, higher first. Two matching candidates that rank
//! equal are a configuration authoring bug and selection fails loudly,
//! naming both origin documents; the engine never silently picks one.
//!
//! Matching is flat: the client's resolved group set already reflects the
//! group hierarchy, so no transitive expansion happens here. A candidate
//! may additionally carry its full qualifier chain (from recursive
//! Group/Client containment in the source document); every term of the
//! chain must match, while only the innermost qualifier determines rank.

use std::path::PathBuf;

use confab_core::errors::ConsistencyError;
use confab_metadata::ResolvedMetadata;
use confab_rules::Element;

/// The match qualifier a candidate fragment was declared under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecificityTag {
    /// Matches every client.
    AllClients,
    /// Matches clients in a group; ranked by the document's priority.
    Group {
        /// Qualifying group name.
        name: String,
        /// Owning document's declared priority.
        priority: i32,
    },
    /// Matches one specific host.
    Host(String),
}

impl SpecificityTag {
    /// Rank for ordering: host > group (by priority) > all-clients.
    fn rank(&self) -> (u8, i32) {
        match self {
            Self::AllClients => (0, 0),
            Self::Group { priority, .. } => (1, *priority),
            Self::Host(_) => (2, 0),
        }
    }
}

/// One term of a candidate's full qualifier chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QualifierTerm {
    /// Declared under a `<Group>` qualifier.
    Group {
        /// Group name.
        name: String,
        /// Inverted qualifier.
        negate: bool,
    },
    /// Declared under a `<Client>` qualifier.
    Host {
        /// Hostname.
        name: String,
        /// Inverted qualifier.
        negate: bool,
    },
}

impl QualifierTerm {
    fn holds(&self, metadata: &ResolvedMetadata) -> bool {
        match self {
            Self::Group { name, negate } => metadata.in_group(name) != *negate,
            Self::Host { name, negate } => (metadata.hostname == *name) != *negate,
        }
    }
}

/// A selectable configuration fragment.
///
/// The payload is opaque to the selection logic; only the tag and the
/// qualifier chain participate in matching.
#[derive(Clone, Debug)]
pub struct CandidateFragment {
    /// The fragment subtree to bind on a win.
    pub payload: Element,
    /// Ranking tag (the innermost qualifier).
    pub tag: SpecificityTag,
    /// Full qualifier chain; all terms must hold to match.
    pub qualifiers: Vec<QualifierTerm>,
    /// Source document, for tie reporting.
    pub origin: PathBuf,
}

impl CandidateFragment {
    /// Whether this candidate applies to a client.
    pub fn matches(&self, metadata: &ResolvedMetadata) -> bool {
        self.qualifiers.iter().all(|q| q.holds(metadata))
    }
}

/// Select the single best-matching candidate for one entry.
pub fn best_match<'a>(
    entry: &str,
    candidates: impl IntoIterator<Item = &'a CandidateFragment>,
    metadata: &ResolvedMetadata,
) -> Result<&'a CandidateFragment, ConsistencyError> {
    let mut matching = candidates.into_iter().filter(|c| c.matches(metadata));

    let Some(mut winner) = matching.next() else {
        return Err(ConsistencyError::NoMatchingSource {
            entry: entry.to_string(),
            client: metadata.hostname.clone(),
        });
    };
    // Track one runner-up at the winning rank; a later strictly better
    // candidate clears it.
    let mut tied: Option<&CandidateFragment> = None;
    for candidate in matching {
        match candidate.tag.rank().cmp(&winner.tag.rank()) {
            std::cmp::Ordering::Greater => {
                winner = candidate;
                tied = None;
            }
            std::cmp::Ordering::Equal => {
                if tied.is_none() {
                    tied = Some(candidate);
                }
            }
            std::cmp::Ordering::Less => {}
        }
    }
    if let Some(runner_up) = tied {
        return Err(ConsistencyError::PriorityTie {
            entry: entry.to_string(),
            first_origin: winner.origin.clone(),
            second_origin: runner_up.origin.clone(),
            priority: winner.tag.rank().1,
        });
    }
    Ok(winner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
