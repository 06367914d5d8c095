//! The engine facade.
//!
//! [`Engine`] composes the rule documents, the compiled group registry,
//! the client directory, and the fragment selector behind one handle.
//! Resolution reads never lock more than an atomic snapshot pointer;
//! reloads and mutations build a complete replacement snapshot and then
//! swap it in, so a concurrent reader sees either the old state or the
//! new one, never a half-updated registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use confab_core::errors::{ConsistencyError, EngineError, Result, RuntimeError};
use confab_core::{AuthMode, EngineConfig, GenerationSignal};
use confab_metadata::clients::{
    add_client_to_tree, remove_client_from_tree, set_auth_in_tree, set_profile_in_tree,
    set_secure_in_tree, set_version_in_tree,
};
use confab_metadata::{
    ClientDirectory, GroupRegistry, MetadataQuery, NameResolver, ResolvedMetadata,
};
use confab_rules::writer::WriteRetry;
use confab_rules::{ChangeKind, Element, MonitorEvent, RuleDocument};
use confab_select::FragmentSelector;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One fully-built generation of compiled state.
///
/// Immutable once published; readers hold an `Arc` and keep using it
/// even while a newer generation is being built.
struct Snapshot {
    registry: Arc<GroupRegistry>,
    directory: ClientDirectory,
}

/// The metadata and fragment-selection engine.
pub struct Engine {
    config: EngineConfig,
    groups_doc: Mutex<RuleDocument>,
    clients_doc: Mutex<RuleDocument>,
    fragment_docs: Mutex<HashMap<PathBuf, RuleDocument>>,
    selector: RwLock<FragmentSelector>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    generation: GenerationSignal,
}

impl Engine {
    /// Create an engine over a repository; call [`Engine::load`] next.
    pub fn new(config: EngineConfig) -> Self {
        let retry = WriteRetry {
            attempts: config.write_retries,
            delay: Duration::from_millis(config.write_retry_delay_ms),
        };
        Self {
            groups_doc: Mutex::new(RuleDocument::new(config.groups_path(), retry)),
            clients_doc: Mutex::new(RuleDocument::new(config.clients_path(), retry)),
            fragment_docs: Mutex::new(HashMap::new()),
            selector: RwLock::new(FragmentSelector::new()),
            snapshot: RwLock::new(None),
            generation: GenerationSignal::new(),
            config,
        }
    }

    /// Load the groups and clients documents and publish the first
    /// snapshot. Errors here are hard: the engine refuses to serve from
    /// an unparsable repository at startup.
    pub fn load(&self) -> Result<()> {
        self.groups_doc.lock().load()?;
        self.clients_doc.lock().load()?;
        self.publish()?;
        info!(repository = %self.config.repository.display(), "engine loaded");
        Ok(())
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current reload generation. Zero before the first load.
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// The generation signal, for cache-invalidation subscribers.
    pub fn generation_signal(&self) -> &GenerationSignal {
        &self.generation
    }

    /// Every path the engine wants change notifications for.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.groups_doc.lock().watch_paths();
        paths.extend(self.clients_doc.lock().watch_paths());
        for doc in self.fragment_docs.lock().values() {
            paths.extend(doc.watch_paths());
        }
        paths
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// Resolve a client's full metadata.
    ///
    /// An unknown hostname bootstraps a persisted client record when a
    /// default profile group is declared; without one it is an error.
    pub fn resolve_client(&self, hostname: &str) -> Result<ResolvedMetadata> {
        let hostname = hostname.to_lowercase();
        let snapshot = self.snapshot()?;
        if let Some(record) = snapshot.directory.get(&hostname) {
            return Ok(ResolvedMetadata::build(record, &snapshot.registry));
        }

        let Some(default) = snapshot.registry.default_group() else {
            return Err(ConsistencyError::NoDefaultProfile(hostname).into());
        };
        let default = default.name.clone();
        drop(snapshot);
        info!(client = %hostname, profile = %default, "bootstrapping unknown client");
        self.add_client(&hostname, Some(&default))?;

        let snapshot = self.snapshot()?;
        let record = snapshot
            .directory
            .get(&hostname)
            .ok_or(ConsistencyError::UnknownClient(hostname))?;
        Ok(ResolvedMetadata::build(record, &snapshot.registry))
    }

    /// Query handle over the current registry generation.
    pub fn metadata_query(&self) -> Result<MetadataQuery> {
        Ok(MetadataQuery::new(Arc::clone(&self.snapshot()?.registry)))
    }

    /// Map a peer address to a canonical hostname.
    pub fn resolve_address(&self, address: &str, resolver: &dyn NameResolver) -> Result<String> {
        Ok(self.snapshot()?.directory.resolve_by_address(address, resolver)?)
    }

    /// Authenticate a check-in against the current client directory.
    pub fn authenticate(
        &self,
        cert_common_name: Option<&str>,
        user: &str,
        password: Option<&str>,
        address: &str,
        resolver: &dyn NameResolver,
    ) -> Result<bool> {
        Ok(self.snapshot()?.directory.authenticate(
            cert_common_name,
            user,
            password,
            address,
            resolver,
        )?)
    }

    // ── Fragment binding ────────────────────────────────────────────

    /// Register a fragment document with the selector.
    pub fn register_fragment_document(&self, path: &Path) -> Result<()> {
        let retry = WriteRetry {
            attempts: self.config.write_retries,
            delay: Duration::from_millis(self.config.write_retry_delay_ms),
        };
        let mut doc = RuleDocument::new(path, retry);
        doc.load()?;
        if let Some(root) = doc.expanded() {
            self.selector.write().reload_document(doc.path(), root);
        }
        let _ = self.fragment_docs.lock().insert(path.to_path_buf(), doc);
        Ok(())
    }

    /// Bind the best-matching fragment for `out` onto `out`.
    ///
    /// Attributes already present on `out` are kept; the winner fills in
    /// the rest and contributes its children.
    pub fn bind(&self, out: &mut Element, metadata: &ResolvedMetadata) -> Result<()> {
        if self.snapshot.read().is_none() {
            return Err(RuntimeError::NotReady.into());
        }
        Ok(self.selector.read().bind(out, metadata)?)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Add a client, optionally with an explicit profile.
    pub fn add_client(&self, hostname: &str, profile: Option<&str>) -> Result<()> {
        let database_backed = self.config.database_backed;
        self.mutate_clients(|root| add_client_to_tree(root, hostname, profile, database_backed))
    }

    /// Assert a profile for a client.
    ///
    /// The profile must name a declared public group.
    pub fn set_profile(&self, hostname: &str, profile: &str) -> Result<()> {
        {
            let snapshot = self.snapshot()?;
            let group = snapshot
                .registry
                .group(profile)
                .ok_or_else(|| ConsistencyError::UnknownGroup(profile.to_string()))?;
            if !group.is_public {
                return Err(ConsistencyError::NotPublic(profile.to_string()).into());
            }
        }
        self.mutate_clients(|root| {
            set_profile_in_tree(root, hostname, profile);
            Ok(())
        })
    }

    /// Record the version string a client reported.
    pub fn set_version(&self, hostname: &str, version: &str) -> Result<()> {
        self.mutate_clients(|root| {
            set_version_in_tree(root, hostname, version);
            Ok(())
        })
    }

    /// Require (or stop requiring) a per-client secret for a client.
    pub fn set_secure(&self, hostname: &str, secure: bool) -> Result<()> {
        self.mutate_clients(|root| set_secure_in_tree(root, hostname, secure))
    }

    /// Set a client's authentication mode.
    pub fn set_auth_mode(&self, hostname: &str, mode: AuthMode) -> Result<()> {
        self.mutate_clients(|root| set_auth_in_tree(root, hostname, mode))
    }

    /// Remove a client record. Removal is explicit, never implied.
    pub fn remove_client(&self, hostname: &str) -> Result<()> {
        self.mutate_clients(|root| remove_client_from_tree(root, hostname))
    }

    /// Declare a group at the top level of the groups document.
    ///
    /// Re-declaring an existing group is a no-op.
    pub fn add_group(&self, name: &str, profile: bool) -> Result<()> {
        self.mutate_groups(|root| {
            if root.find_child("Group", name).is_some() {
                debug!(group = name, "group already declared, add is a no-op");
                return Ok(());
            }
            root.children.push(
                Element::new("Group")
                    .with_attr("name", name)
                    .with_attr("profile", if profile { "true" } else { "false" }),
            );
            Ok(())
        })
    }

    /// Remove a top-level group declaration.
    pub fn remove_group(&self, name: &str) -> Result<()> {
        self.mutate_groups(|root| {
            if root.remove_children("Group", name) == 0 {
                return Err(ConsistencyError::UnknownGroup(name.to_string()));
            }
            Ok(())
        })
    }

    /// Attach a bundle to a declared group.
    pub fn add_bundle(&self, group: &str, bundle: &str) -> Result<()> {
        self.mutate_groups(|root| {
            let target = root
                .find_child_mut("Group", group)
                .ok_or_else(|| ConsistencyError::UnknownGroup(group.to_string()))?;
            if target.find_child("Bundle", bundle).is_some() {
                debug!(group, bundle, "bundle already attached, add is a no-op");
                return Ok(());
            }
            target
                .children
                .push(Element::new("Bundle").with_attr("name", bundle));
            Ok(())
        })
    }

    /// Detach a bundle from a declared group.
    pub fn remove_bundle(&self, group: &str, bundle: &str) -> Result<()> {
        self.mutate_groups(|root| {
            let target = root
                .find_child_mut("Group", group)
                .ok_or_else(|| ConsistencyError::UnknownGroup(group.to_string()))?;
            if target.remove_children("Bundle", bundle) == 0 {
                debug!(group, bundle, "bundle was not attached, remove is a no-op");
            }
            Ok(())
        })
    }

    // ── Change notifications ────────────────────────────────────────

    /// Route a file-monitor event to the owning document.
    ///
    /// Directory-level subscriptions deliver events for paths the engine
    /// never asked about; those are ignored. A failed per-document
    /// reload leaves that document's previous state active.
    pub fn handle_event(&self, event: &MonitorEvent) {
        if event.kind == ChangeKind::EndExist {
            return;
        }

        let mut reloaded = false;
        {
            let mut doc = self.groups_doc.lock();
            if doc.covers(&event.path) {
                reloaded = doc.reload_lenient();
            }
        }
        {
            let mut doc = self.clients_doc.lock();
            if doc.covers(&event.path) {
                reloaded = doc.reload_lenient() || reloaded;
            }
        }
        if reloaded {
            if let Err(e) = self.publish() {
                warn!(error = %e, "snapshot rebuild after reload failed");
            }
        }

        let mut fragment_hit = false;
        let mut docs = self.fragment_docs.lock();
        for doc in docs.values_mut() {
            if !doc.covers(&event.path) {
                continue;
            }
            fragment_hit = true;
            if event.kind == ChangeKind::Deleted && doc.path() == event.path {
                self.selector.write().remove_document(doc.path());
                debug!(path = %event.path.display(), "fragment document deleted");
            } else if doc.reload_lenient() {
                if let Some(root) = doc.expanded() {
                    self.selector.write().reload_document(doc.path(), root);
                }
            }
        }
        drop(docs);

        if !reloaded && !fragment_hit {
            debug!(path = %event.path.display(), kind = ?event.kind, "event for an unwatched path ignored");
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.snapshot
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| RuntimeError::NotReady.into())
    }

    /// Rebuild the compiled snapshot from the current document trees
    /// and swap it in, bumping the generation.
    fn publish(&self) -> Result<()> {
        let registry = {
            let doc = self.groups_doc.lock();
            let root = doc.expanded().ok_or(RuntimeError::NotReady)?;
            Arc::new(GroupRegistry::compile(root))
        };
        let directory = {
            let doc = self.clients_doc.lock();
            let root = doc.expanded().ok_or(RuntimeError::NotReady)?;
            ClientDirectory::from_document(root, &self.config)
        };
        *self.snapshot.write() = Some(Arc::new(Snapshot {
            registry,
            directory,
        }));
        let generation = self.generation.bump();
        debug!(generation, "snapshot published");
        Ok(())
    }

    fn mutate_clients<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Element) -> std::result::Result<(), ConsistencyError>,
    {
        {
            let mut doc = self.clients_doc.lock();
            mutate_checked(&mut doc, f)?;
        }
        self.publish()
    }

    fn mutate_groups<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Element) -> std::result::Result<(), ConsistencyError>,
    {
        {
            let mut doc = self.groups_doc.lock();
            mutate_checked(&mut doc, f)?;
        }
        self.publish()
    }
}

/// Edit a draft of the document's base tree, persisting only when the
/// edit succeeds. A rejected edit touches neither disk nor memory.
fn mutate_checked<F>(doc: &mut RuleDocument, f: F) -> Result<()>
where
    F: FnOnce(&mut Element) -> std::result::Result<(), ConsistencyError>,
{
    let mut draft = doc.base().cloned().ok_or(RuntimeError::NotReady)?;
    f(&mut draft).map_err(EngineError::from)?;
    doc.mutate(move |root| *root = draft)
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("repository", &self.config.repository)
            .field("generation", &self.generation.current())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
