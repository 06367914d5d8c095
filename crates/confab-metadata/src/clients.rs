//! The client directory: per-client static facts and identification.
//!
//! Built from the clients rule document. The directory is a read-only
//! snapshot (rebuilt wholesale on reload, like the registry); the only
//! interior mutability is the address-resolution cache. Mutations to the
//! client set go through tree-editing helpers applied to the clients
//! document, which the engine persists before rebuilding the snapshot.
//!
//! Address resolution: address → exactly one client (directly or via an
//! alias address), ambiguous mappings are a consistency error, unmapped
//! addresses fall back to reverse name resolution through the
//! [`NameResolver`] collaborator seam. Successful resolutions are cached
//! with a fixed TTL; stale entries for an address are pruned whenever
//! that address is looked up, so no background sweep is needed.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use confab_core::config::{AuthMode, EngineConfig};
use confab_core::errors::ConsistencyError;
use confab_rules::Element;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Static facts for one managed host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    /// Canonical lowercase hostname.
    pub hostname: String,
    /// Declared profile group, if any.
    pub profile: Option<String>,
    /// Alternate names this host answers to.
    pub aliases: BTreeSet<String>,
    /// Known network addresses (the host's own plus alias addresses).
    pub addresses: BTreeSet<String>,
    /// Stable identifier used by the session-id authentication path.
    pub uuid: Option<Uuid>,
    /// Per-client shared secret.
    pub password: Option<String>,
    /// The client's address may vary run to run; skip address checks.
    pub floating: bool,
    /// Per-client secret required; the global secret is never accepted.
    pub secure: bool,
    /// Authentication mode override; `None` uses the engine default.
    pub auth: Option<AuthMode>,
    /// Last agent version the client reported.
    pub version: Option<String>,
}

impl ClientRecord {
    fn from_element(element: &Element) -> Option<Self> {
        let hostname = element.name_attr()?.to_lowercase();
        let mut aliases = BTreeSet::new();
        let mut addresses = BTreeSet::new();
        if let Some(address) = element.attr("address") {
            let _ = addresses.insert(address.to_string());
        }
        for child in &element.children {
            match child.name.as_str() {
                "Alias" => {
                    if let Some(name) = child.name_attr() {
                        let _ = aliases.insert(name.to_lowercase());
                    }
                    if let Some(address) = child.attr("address") {
                        let _ = addresses.insert(address.to_string());
                    }
                }
                "Address" => {
                    if let Some(address) = child.attr("address") {
                        let _ = addresses.insert(address.to_string());
                    }
                }
                _ => {}
            }
        }
        Some(Self {
            hostname,
            profile: element.attr("profile").map(str::to_string),
            aliases,
            addresses,
            uuid: element.attr("uuid").and_then(|u| Uuid::parse_str(u).ok()),
            password: element.attr("password").map(str::to_string),
            floating: element.flag("floating"),
            secure: element.flag("secure"),
            auth: element.attr("auth").and_then(parse_auth_mode),
            version: element.attr("version").map(str::to_string),
        })
    }
}

fn parse_auth_mode(value: &str) -> Option<AuthMode> {
    match value {
        "cert" => Some(AuthMode::Cert),
        "cert+password" => Some(AuthMode::CertPlusPassword),
        "password" => Some(AuthMode::Password),
        other => {
            warn!(auth = other, "unknown auth mode, using engine default");
            None
        }
    }
}

/// Reverse name resolution, an external collaborator.
pub trait NameResolver: Send + Sync {
    /// Best-effort reverse lookup of an address to a hostname.
    fn reverse_lookup(&self, address: &str) -> Option<String>;
}

/// A resolver that never resolves; the default collaborator.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReverseLookup;

impl NameResolver for NoReverseLookup {
    fn reverse_lookup(&self, _address: &str) -> Option<String> {
        None
    }
}

/// All known clients for one document generation.
#[derive(Debug)]
pub struct ClientDirectory {
    clients: HashMap<String, ClientRecord>,
    aliases: HashMap<String, String>,
    addresses: HashMap<String, Vec<String>>,
    uuids: HashMap<String, String>,
    cache: Mutex<HashMap<String, (Instant, String)>>,
    cache_ttl: Duration,
    global_password: Option<String>,
    default_auth: AuthMode,
}

impl ClientDirectory {
    /// Build a directory from an expanded clients document.
    pub fn from_document(root: &Element, config: &EngineConfig) -> Self {
        let mut clients = HashMap::new();
        let mut aliases = HashMap::new();
        let mut addresses: HashMap<String, Vec<String>> = HashMap::new();
        let mut uuids = HashMap::new();

        for element in root.children_named("Client") {
            let Some(record) = ClientRecord::from_element(element) else {
                continue;
            };
            if clients.contains_key(&record.hostname) {
                warn!(client = %record.hostname, "client declared twice, keeping the first");
                continue;
            }
            for alias in &record.aliases {
                let _ = aliases.insert(alias.clone(), record.hostname.clone());
            }
            for address in &record.addresses {
                addresses
                    .entry(address.clone())
                    .or_default()
                    .push(record.hostname.clone());
            }
            if let Some(uuid) = &record.uuid {
                let _ = uuids.insert(uuid.to_string(), record.hostname.clone());
            }
            let _ = clients.insert(record.hostname.clone(), record);
        }

        Self {
            clients,
            aliases,
            addresses,
            uuids,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(config.address_cache_ttl_secs),
            global_password: config.password.clone(),
            default_auth: config.auth_mode,
        }
    }

    // ── Lookup ──────────────────────────────────────────────────────

    /// Look up a client by canonical hostname (case-insensitive).
    pub fn get(&self, hostname: &str) -> Option<&ClientRecord> {
        self.clients.get(&hostname.to_lowercase())
    }

    /// Whether the directory knows a hostname.
    pub fn contains(&self, hostname: &str) -> bool {
        self.clients.contains_key(&hostname.to_lowercase())
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All known hostnames, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Canonical hostname for a name that may be an alias.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        if let Some((key, _)) = self.clients.get_key_value(&lower) {
            return Some(key.as_str());
        }
        self.aliases.get(&lower).map(String::as_str)
    }

    // ── Address resolution ──────────────────────────────────────────

    /// Resolve a network address to exactly one known client.
    pub fn resolve_by_address(
        &self,
        address: &str,
        resolver: &dyn NameResolver,
    ) -> Result<String, ConsistencyError> {
        if let Some(hit) = self.cache_lookup(address) {
            return Ok(hit);
        }

        match self.addresses.get(address).map(Vec::as_slice) {
            Some([single]) => {
                self.cache_store(address, single);
                return Ok(single.clone());
            }
            Some([first, second, ..]) => {
                return Err(ConsistencyError::AmbiguousAddress {
                    address: address.to_string(),
                    first: first.clone(),
                    second: second.clone(),
                });
            }
            Some([]) | None => {}
        }

        // Unmapped address: fall back to reverse resolution and run the
        // result through the alias table.
        if let Some(resolved) = resolver.reverse_lookup(address) {
            if let Some(canonical) = self.canonical(&resolved) {
                let canonical = canonical.to_string();
                self.cache_store(address, &canonical);
                return Ok(canonical);
            }
            debug!(address, resolved, "reverse lookup names an unknown client");
        }
        Err(ConsistencyError::UnresolvableIdentity(address.to_string()))
    }

    fn cache_lookup(&self, address: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        match cache.get(address) {
            Some((stored, name)) if stored.elapsed() < self.cache_ttl => Some(name.clone()),
            Some(_) => {
                // Expired: prune on access rather than with a sweeper.
                let _ = cache.remove(address);
                None
            }
            None => None,
        }
    }

    fn cache_store(&self, address: &str, hostname: &str) {
        let _ = self
            .cache
            .lock()
            .insert(address.to_string(), (Instant::now(), hostname.to_string()));
    }

    // ── Authentication ──────────────────────────────────────────────

    /// Authenticate a check-in.
    ///
    /// Identity comes from one of three paths: the certificate common
    /// name, the literal user `root` plus address resolution, or an
    /// opaque session identifier mapped through the UUID table. Normal
    /// auth failure returns `Ok(false)`; only an unresolvable identity
    /// is an error.
    pub fn authenticate(
        &self,
        cert_common_name: Option<&str>,
        user: &str,
        password: Option<&str>,
        address: &str,
        resolver: &dyn NameResolver,
    ) -> Result<bool, ConsistencyError> {
        let hostname = if let Some(common_name) = cert_common_name {
            common_name.to_lowercase()
        } else if user == "root" {
            self.resolve_by_address(address, resolver)?
        } else {
            match self.uuids.get(user) {
                Some(hostname) => hostname.clone(),
                None => {
                    return Err(ConsistencyError::UnresolvableIdentity(format!(
                        "session id {user} from {address}"
                    )));
                }
            }
        };

        let Some(record) = self.clients.get(&hostname) else {
            warn!(client = %hostname, address, "authentication for unknown client");
            return Ok(false);
        };

        if !record.floating && !record.addresses.contains(address) {
            warn!(client = %hostname, address, "address not declared for non-floating client");
            return Ok(false);
        }

        let mode = record.auth.unwrap_or(self.default_auth);
        match mode {
            AuthMode::Cert => Ok(cert_common_name.is_some()),
            AuthMode::CertPlusPassword => {
                Ok(cert_common_name.is_some() && self.password_matches(record, password))
            }
            AuthMode::Password => Ok(self.password_matches(record, password)),
        }
    }

    fn password_matches(&self, record: &ClientRecord, supplied: Option<&str>) -> bool {
        let Some(supplied) = supplied else {
            return false;
        };
        match (&record.password, record.secure) {
            (Some(secret), _) => secret == supplied,
            // Secure mode never falls back to the global secret.
            (None, true) => {
                warn!(client = %record.hostname, "secure client has no per-client secret");
                false
            }
            (None, false) => self
                .global_password
                .as_deref()
                .is_some_and(|global| global == supplied),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Clients-document tree edits
// ─────────────────────────────────────────────────────────────────────────────

/// Add a client element to the clients document base tree.
///
/// Re-adding an existing name is idempotent in file-backed mode and a
/// hard error in database-backed mode; the two backends differ and the
/// caller is told which is active via `database_backed`.
pub fn add_client_to_tree(
    root: &mut Element,
    hostname: &str,
    profile: Option<&str>,
    database_backed: bool,
) -> Result<(), ConsistencyError> {
    let hostname = hostname.to_lowercase();
    if root.find_child("Client", &hostname).is_some() {
        if database_backed {
            return Err(ConsistencyError::DuplicateClient(hostname));
        }
        debug!(client = %hostname, "client already present, re-add is a no-op");
        return Ok(());
    }
    let mut client = Element::new("Client").with_attr("name", &hostname);
    if let Some(profile) = profile {
        client.set_attr("profile", profile);
    }
    root.children.push(client);
    Ok(())
}

/// Set (or replace) a client's profile in the clients document base
/// tree, creating the client if unknown.
pub fn set_profile_in_tree(root: &mut Element, hostname: &str, profile: &str) {
    let hostname = hostname.to_lowercase();
    match root.find_child_mut("Client", &hostname) {
        Some(client) => client.set_attr("profile", profile),
        None => {
            root.children.push(
                Element::new("Client")
                    .with_attr("name", &hostname)
                    .with_attr("profile", profile),
            );
        }
    }
}

/// Record the agent version a client reported.
pub fn set_version_in_tree(root: &mut Element, hostname: &str, version: &str) {
    if let Some(client) = root.find_child_mut("Client", &hostname.to_lowercase()) {
        client.set_attr("version", version);
    }
}

/// Mark a client as requiring its own per-client secret.
///
/// Unknown clients are an error; a security posture change must not be
/// silently dropped.
pub fn set_secure_in_tree(
    root: &mut Element,
    hostname: &str,
    secure: bool,
) -> Result<(), ConsistencyError> {
    let hostname = hostname.to_lowercase();
    let client = root
        .find_child_mut("Client", &hostname)
        .ok_or(ConsistencyError::UnknownClient(hostname))?;
    if secure {
        client.set_attr("secure", "true");
    } else {
        let _ = client.remove_attr("secure");
    }
    Ok(())
}

/// Set a client's authentication mode.
pub fn set_auth_in_tree(
    root: &mut Element,
    hostname: &str,
    mode: AuthMode,
) -> Result<(), ConsistencyError> {
    let hostname = hostname.to_lowercase();
    let client = root
        .find_child_mut("Client", &hostname)
        .ok_or(ConsistencyError::UnknownClient(hostname))?;
    client.set_attr("auth", auth_mode_token(mode));
    Ok(())
}

fn auth_mode_token(mode: AuthMode) -> &'static str {
    match mode {
        AuthMode::Cert => "cert",
        AuthMode::CertPlusPassword => "cert+password",
        AuthMode::Password => "password",
    }
}

/// Remove a client element. Removal is always explicit, never implied.
pub fn remove_client_from_tree(
    root: &mut Element,
    hostname: &str,
) -> Result<(), ConsistencyError> {
    let hostname = hostname.to_lowercase();
    if root.remove_children("Client", &hostname) == 0 {
        return Err(ConsistencyError::UnknownClient(hostname));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
