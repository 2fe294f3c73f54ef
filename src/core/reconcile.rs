//! Reconciliation of managed host entries against the active workspace set.
//!
//! One pass runs these stages in order, stopping at the first failure:
//!
//! 1. write (or verify) the private key
//! 2. back up the current config
//! 3. load and parse the config
//! 4. append entries for active workspaces that have none
//! 5. drop managed entries whose workspace is no longer active
//! 6. write the result back
//!
//! Entries are created before stale ones are pruned, so a port is never
//! handed out while the same port string still appears in the document.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::{
    active::ActiveWorkspaceSet,
    document::{HostBlock, KeyMatch, SshConfigDocument},
    ownership::{IdentityFileClassifier, OwnershipClassifier},
    ports::{DEFAULT_BASE_PORT, PortAllocator, PortUsage},
    render::render_entry,
};

/// Storage the reconciler reads from and writes to.
pub trait SshStore {
    /// Current config text. A missing file should read as empty.
    fn read_config(&self) -> Result<String>;

    /// Replace the config file contents.
    fn write_config(&self, text: &str) -> Result<()>;

    /// Keep at least one copy of the current config before it is mutated.
    fn create_backup(&self) -> Result<()>;

    /// Write key material to [`SshStore::private_key_path`].
    fn write_private_key(&self, pem: &str) -> Result<()>;

    /// Called instead of `write_private_key` when no key material is given.
    fn verify_private_key(&self) -> Result<()> {
        Ok(())
    }

    /// Path string written into (and matched against) `IdentityFile`.
    fn private_key_path(&self) -> String;
}

/// Stage a sync failure came from. Attached to errors as anyhow context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncStage {
    #[error("writing private key failed")]
    KeyWrite,
    #[error("backing up ssh config failed")]
    Backup,
    #[error("loading ssh config failed")]
    Load,
    #[error("writing ssh config failed")]
    Persist,
}

/// Stage annotation of an error returned by [`Reconciler`], if any.
pub fn failed_stage(err: &anyhow::Error) -> Option<SyncStage> {
    err.downcast_ref::<SyncStage>().copied()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no managed ssh entry with a Port for host '{0}'")]
    NotFound(String),
}

/// Fields of a managed host block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedEntry {
    pub alias: String,
    pub port: Option<String>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub identity_file: String,
}

impl ManagedEntry {
    fn from_block(block: &HostBlock) -> Self {
        Self {
            alias: block.alias().to_string(),
            port: block.port().map(str::to_string),
            hostname: block
                .directive("Hostname", KeyMatch::IgnoreAsciiCase)
                .map(str::to_string),
            user: block
                .directive("User", KeyMatch::IgnoreAsciiCase)
                .map(str::to_string),
            identity_file: block.identity_file().unwrap_or_default().to_string(),
        }
    }
}

/// Read-only view of the managed blocks in a document.
pub struct ManagedHosts<'a> {
    document: &'a SshConfigDocument,
    classifier: &'a dyn OwnershipClassifier,
}

impl<'a> ManagedHosts<'a> {
    pub fn new(document: &'a SshConfigDocument, classifier: &'a dyn OwnershipClassifier) -> Self {
        Self {
            document,
            classifier,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &'a HostBlock> + '_ {
        self.document
            .hosts()
            .filter(move |block| self.classifier.is_managed(block))
    }

    pub fn entries(&self) -> Vec<ManagedEntry> {
        self.blocks().map(ManagedEntry::from_block).collect()
    }

    /// Aliases of managed blocks (blocks without an alias are left out).
    pub fn aliases(&self) -> HashSet<&'a str> {
        self.blocks()
            .filter_map(|block| self.classifier.alias(block))
            .collect()
    }

    /// Ports of all managed blocks that declare one.
    pub fn port_usage(&self) -> PortUsage {
        self.blocks()
            .filter_map(HostBlock::port)
            .map(str::to_string)
            .collect()
    }

    /// Port of the first managed block for `alias` that declares one.
    pub fn lookup_port(&self, alias: &str) -> Result<String, LookupError> {
        self.blocks()
            .filter(|block| self.classifier.alias(block) == Some(alias))
            .find_map(HostBlock::port)
            .map(str::to_string)
            .ok_or_else(|| LookupError::NotFound(alias.to_string()))
    }
}

/// Inputs of the pure create/prune stages.
pub struct ReconcileParams<'a> {
    pub classifier: &'a dyn OwnershipClassifier,
    /// Written as `IdentityFile` of new entries.
    pub identity_file: &'a str,
    pub base_port: u16,
}

/// Result of the create and prune stages.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub document: SshConfigDocument,
    pub created: Vec<ManagedEntry>,
    pub pruned: Vec<ManagedEntry>,
}

/// Create missing entries, then prune stale ones. Touches nothing on disk.
pub fn reconcile(
    mut document: SshConfigDocument,
    active: &ActiveWorkspaceSet,
    params: &ReconcileParams<'_>,
) -> Reconciled {
    let classifier = params.classifier;

    // Create: allocation is seeded with every managed port, including ports of
    // entries about to be pruned below.
    let (present, usage) = {
        let managed = ManagedHosts::new(&document, classifier);
        let present: HashSet<String> = managed.aliases().into_iter().map(str::to_string).collect();
        (present, managed.port_usage())
    };
    let mut ports = PortAllocator::new(params.base_port, usage);
    let mut created = Vec::new();

    for id in active.iter().filter(|id| !present.contains(*id)) {
        let port = ports.next_port();
        let block = HostBlock::from_raw(render_entry(id, &port, params.identity_file));
        debug!(alias = id, port = %port, "adding managed entry");
        created.push(ManagedEntry::from_block(&block));
        document.push_host(block);
    }

    // Prune: foreign blocks and alias-less managed blocks are left alone.
    let mut pruned = Vec::new();
    document.retain_hosts(|block| {
        if !classifier.is_managed(block) {
            return true;
        }
        match classifier.alias(block) {
            None => true,
            Some(alias) if active.contains(alias) => true,
            Some(alias) => {
                debug!(alias, "removing stale managed entry");
                pruned.push(ManagedEntry::from_block(block));
                false
            }
        }
    });

    Reconciled {
        document,
        created,
        pruned,
    }
}

/// Outcome of a sync or preview.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Config text as loaded.
    pub original: String,
    pub reconciled: Reconciled,
    /// Whether the reconciled text differs from what was loaded.
    pub changed: bool,
    /// Whether the config file was written.
    pub persisted: bool,
    key_path: String,
}

impl SyncReport {
    pub fn rendered(&self) -> String {
        self.reconciled.document.to_string()
    }

    /// Managed entries left in the reconciled document.
    pub fn managed(&self) -> Vec<ManagedEntry> {
        let classifier = IdentityFileClassifier::new(self.key_path.as_str());
        ManagedHosts::new(&self.reconciled.document, &classifier).entries()
    }

    /// Port of a managed entry in the reconciled document.
    pub fn lookup_port(&self, alias: &str) -> Result<String, LookupError> {
        let classifier = IdentityFileClassifier::new(self.key_path.as_str());
        ManagedHosts::new(&self.reconciled.document, &classifier).lookup_port(alias)
    }
}

/// Drives a full reconciliation pass against an [`SshStore`].
pub struct Reconciler<'s, S: SshStore + ?Sized> {
    store: &'s S,
    base_port: u16,
}

impl<'s, S: SshStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            base_port: DEFAULT_BASE_PORT,
        }
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    /// Run every stage and persist the result.
    ///
    /// `private_key` is written before anything else; when `None` the store
    /// only verifies that a key is already in place.
    #[instrument(skip_all, fields(active = active.len()))]
    pub fn sync(&self, active: &ActiveWorkspaceSet, private_key: Option<&str>) -> Result<SyncReport> {
        let key_written = match private_key {
            Some(pem) => self.store.write_private_key(pem),
            None => self.store.verify_private_key(),
        };
        key_written.context(SyncStage::KeyWrite)?;

        // Ownership is decided against the key path actually in use
        let key_path = self.store.private_key_path();

        self.store.create_backup().context(SyncStage::Backup)?;

        let mut report = self.load_and_reconcile(active, key_path)?;

        if report.changed {
            self.store
                .write_config(&report.rendered())
                .context(SyncStage::Persist)?;
            report.persisted = true;
        } else {
            debug!("ssh config already up to date");
        }

        info!(
            created = report.reconciled.created.len(),
            pruned = report.reconciled.pruned.len(),
            persisted = report.persisted,
            "ssh config reconciled"
        );
        Ok(report)
    }

    /// Load and reconcile without writing the key, backing up, or persisting.
    #[instrument(skip_all, fields(active = active.len()))]
    pub fn preview(&self, active: &ActiveWorkspaceSet) -> Result<SyncReport> {
        self.load_and_reconcile(active, self.store.private_key_path())
    }

    /// Port of the managed entry for `alias` in the current config.
    pub fn lookup_port(&self, alias: &str) -> Result<String> {
        let text = self.store.read_config().context(SyncStage::Load)?;
        let document = SshConfigDocument::parse(&text);
        let classifier = IdentityFileClassifier::new(self.store.private_key_path());
        Ok(ManagedHosts::new(&document, &classifier).lookup_port(alias)?)
    }

    /// Managed entries in the current config.
    pub fn managed_entries(&self) -> Result<Vec<ManagedEntry>> {
        let text = self.store.read_config().context(SyncStage::Load)?;
        let document = SshConfigDocument::parse(&text);
        let classifier = IdentityFileClassifier::new(self.store.private_key_path());
        Ok(ManagedHosts::new(&document, &classifier).entries())
    }

    fn load_and_reconcile(&self, active: &ActiveWorkspaceSet, key_path: String) -> Result<SyncReport> {
        let original = self.store.read_config().context(SyncStage::Load)?;
        let document = SshConfigDocument::parse(&original);

        let classifier = IdentityFileClassifier::new(key_path.as_str());
        let params = ReconcileParams {
            classifier: &classifier,
            identity_file: &key_path,
            base_port: self.base_port,
        };
        let reconciled = reconcile(document, active, &params);
        let changed = reconciled.document.to_string() != original;

        Ok(SyncReport {
            original,
            reconciled,
            changed,
            persisted: false,
            key_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::bail;

    use super::*;

    const KEY: &str = "/home/dev/.brev/brev.pem";

    /// In-memory store recording the order of collaborator calls.
    #[derive(Default)]
    struct MemoryStore {
        config: RefCell<String>,
        key: RefCell<Option<String>>,
        calls: RefCell<Vec<&'static str>>,
        fail_on: Option<&'static str>,
    }

    impl MemoryStore {
        fn with_config(text: &str) -> Self {
            Self {
                config: RefCell::new(text.to_string()),
                ..Default::default()
            }
        }

        fn failing(text: &str, call: &'static str) -> Self {
            Self {
                fail_on: Some(call),
                ..Self::with_config(text)
            }
        }

        fn record(&self, call: &'static str) -> Result<()> {
            self.calls.borrow_mut().push(call);
            if self.fail_on == Some(call) {
                bail!("{call} exploded");
            }
            Ok(())
        }

        fn config(&self) -> String {
            self.config.borrow().clone()
        }
    }

    impl SshStore for MemoryStore {
        fn read_config(&self) -> Result<String> {
            self.record("read")?;
            Ok(self.config())
        }

        fn write_config(&self, text: &str) -> Result<()> {
            self.record("write")?;
            *self.config.borrow_mut() = text.to_string();
            Ok(())
        }

        fn create_backup(&self) -> Result<()> {
            self.record("backup")
        }

        fn write_private_key(&self, pem: &str) -> Result<()> {
            self.record("key")?;
            *self.key.borrow_mut() = Some(pem.to_string());
            Ok(())
        }

        fn private_key_path(&self) -> String {
            KEY.to_string()
        }
    }

    fn managed(alias: &str, port: &str) -> String {
        render_entry(alias, port, KEY)
    }

    fn ports(store: &MemoryStore) -> Vec<(String, Option<String>)> {
        let doc = SshConfigDocument::parse(&store.config());
        let classifier = IdentityFileClassifier::new(KEY);
        ManagedHosts::new(&doc, &classifier)
            .entries()
            .into_iter()
            .map(|e| (e.alias, e.port))
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, Option<String>)> {
        items
            .iter()
            .map(|(a, p)| (a.to_string(), Some(p.to_string())))
            .collect()
    }

    fn sync(store: &MemoryStore, ids: &[&str]) -> Result<SyncReport> {
        Reconciler::new(store).sync(&ActiveWorkspaceSet::new(ids), Some("PEM"))
    }

    #[test]
    fn stages_run_in_order() {
        let store = MemoryStore::default();
        sync(&store, &["a"]).unwrap();
        assert_eq!(*store.calls.borrow(), ["key", "backup", "read", "write"]);
        assert_eq!(store.key.borrow().as_deref(), Some("PEM"));
    }

    #[test]
    fn scenario_empty_config_gets_sequential_ports() {
        let store = MemoryStore::default();
        let report = sync(&store, &["a", "b"]).unwrap();

        assert_eq!(ports(&store), pairs(&[("a", "2222"), ("b", "2223")]));
        assert_eq!(report.reconciled.created.len(), 2);
        assert!(report.persisted);
        assert_eq!(report.lookup_port("b").unwrap(), "2223");
    }

    #[test]
    fn scenario_create_before_prune_skips_still_present_port() {
        let store = MemoryStore::with_config(&(managed("a", "2222") + &managed("b", "2223")));
        let report = sync(&store, &["a", "c"]).unwrap();

        assert_eq!(ports(&store), pairs(&[("a", "2222"), ("c", "2224")]));
        let pruned: Vec<_> = report.reconciled.pruned.iter().map(|e| e.alias.as_str()).collect();
        assert_eq!(pruned, ["b"]);
    }

    #[test]
    fn scenario_foreign_block_with_same_alias_is_left_alone() {
        let foreign = "Host a\n  HostName a.example.com\n  IdentityFile ~/.ssh/id_rsa\n\n";
        let store = MemoryStore::with_config(foreign);
        sync(&store, &["a"]).unwrap();

        let text = store.config();
        assert!(text.starts_with(foreign));
        assert_eq!(&text[foreign.len()..], managed("a", "2222"));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let store = MemoryStore::with_config("Host other\n  User me\n");
        sync(&store, &["x", "y"]).unwrap();
        let first = store.config();

        let report = sync(&store, &["y", "x"]).unwrap();
        assert!(!report.changed);
        assert!(!report.persisted);
        assert_eq!(store.config(), first);
    }

    #[test]
    fn retained_entries_keep_their_port() {
        let store = MemoryStore::with_config(&managed("keep", "2300"));
        sync(&store, &["keep", "new"]).unwrap();
        sync(&store, &["keep"]).unwrap();
        assert_eq!(ports(&store), pairs(&[("keep", "2300")]));
    }

    #[test]
    fn foreign_blocks_survive_even_when_inactive() {
        let text = "# mine\nHost box\n  IdentityFile /home/dev/.brev/brev.pem.bak\n  Port 2222\n";
        let store = MemoryStore::with_config(text);
        let report = sync(&store, &[]).unwrap();
        assert!(!report.changed);
        assert_eq!(store.config(), text);
    }

    #[test]
    fn quoted_key_path_block_is_foreign() {
        let text = format!("Host mybox\n  IdentityFile \"{KEY}\"\n  Port 2222\n");
        let store = MemoryStore::with_config(&text);
        let report = sync(&store, &[]).unwrap();
        assert!(report.reconciled.pruned.is_empty());
        assert_eq!(store.config(), text);
    }

    #[test]
    fn match_section_after_stale_entry_survives_prune() {
        let text = managed("old", "2222") + "Match host *.corp\n  User corpuser\n";
        let store = MemoryStore::with_config(&text);
        let report = sync(&store, &[]).unwrap();

        assert_eq!(report.reconciled.pruned.len(), 1);
        assert_eq!(store.config(), "Match host *.corp\n  User corpuser\n");
    }

    #[test]
    fn key_path_with_space_is_recognized_on_next_run() {
        let key = "/Users/some one/.brev/brev.pem";
        let classifier = IdentityFileClassifier::new(key);
        let params = ReconcileParams {
            classifier: &classifier,
            identity_file: key,
            base_port: DEFAULT_BASE_PORT,
        };
        let active = ActiveWorkspaceSet::new(["a"]);

        let first = reconcile(SshConfigDocument::parse(""), &active, &params);
        assert!(first.document.to_string().contains("IdentityFile \"/Users/some one/.brev/brev.pem\"\n"));

        let second = reconcile(first.document.clone(), &active, &params);
        assert!(second.created.is_empty());
        assert!(second.pruned.is_empty());
        assert_eq!(second.document, first.document);
    }

    #[test]
    fn foreign_ports_do_not_block_allocation() {
        let store = MemoryStore::with_config("Host box\n  Port 2222\n");
        sync(&store, &["a"]).unwrap();
        assert_eq!(ports(&store), pairs(&[("a", "2222")]));
    }

    #[test]
    fn alias_less_managed_block_is_kept() {
        let text = format!("Host\n  IdentityFile {KEY}\n  Port 2222\n");
        let store = MemoryStore::with_config(&text);
        sync(&store, &["a"]).unwrap();

        let out = store.config();
        assert!(out.starts_with(&text));
        // its port still counts as used
        assert!(out.ends_with(&managed("a", "2223")));
    }

    #[test]
    fn prune_preserves_relative_order() {
        let text = format!(
            "Host f1\n  User x\n{}Host f2\n  User y\n{}",
            managed("gone", "2222"),
            managed("stay", "2223")
        );
        let store = MemoryStore::with_config(&text);
        sync(&store, &["stay"]).unwrap();
        assert_eq!(
            store.config(),
            format!("Host f1\n  User x\nHost f2\n  User y\n{}", managed("stay", "2223"))
        );
    }

    #[test]
    fn backup_failure_stops_before_load_and_write() {
        let store = MemoryStore::failing(&managed("a", "2222"), "backup");
        let err = sync(&store, &[]).unwrap_err();

        assert_eq!(failed_stage(&err), Some(SyncStage::Backup));
        assert_eq!(*store.calls.borrow(), ["key", "backup"]);
        assert_eq!(store.config(), managed("a", "2222"));
    }

    #[test]
    fn key_failure_stops_everything() {
        let store = MemoryStore::failing("", "key");
        let err = sync(&store, &["a"]).unwrap_err();
        assert_eq!(failed_stage(&err), Some(SyncStage::KeyWrite));
        assert_eq!(*store.calls.borrow(), ["key"]);
    }

    #[test]
    fn persist_failure_is_annotated() {
        let store = MemoryStore::failing("", "write");
        let err = sync(&store, &["a"]).unwrap_err();
        assert_eq!(failed_stage(&err), Some(SyncStage::Persist));
        assert_eq!(store.config(), "");
    }

    #[test]
    fn load_failure_is_annotated() {
        let store = MemoryStore::failing("", "read");
        let err = sync(&store, &["a"]).unwrap_err();
        assert_eq!(failed_stage(&err), Some(SyncStage::Load));
    }

    #[test]
    fn preview_touches_nothing() {
        let store = MemoryStore::with_config(&managed("old", "2222"));
        let report = Reconciler::new(&store)
            .preview(&ActiveWorkspaceSet::new(["new"]))
            .unwrap();

        assert_eq!(*store.calls.borrow(), ["read"]);
        assert!(report.changed);
        assert_eq!(report.rendered(), managed("new", "2223"));
        assert_eq!(store.config(), managed("old", "2222"));
    }

    #[test]
    fn base_port_is_configurable() {
        let store = MemoryStore::default();
        Reconciler::new(&store)
            .with_base_port(4000)
            .sync(&ActiveWorkspaceSet::new(["a"]), Some("PEM"))
            .unwrap();
        assert_eq!(ports(&store), pairs(&[("a", "4000")]));
    }

    #[test]
    fn lookup_port_requires_managed_entry_with_port() {
        let text = format!(
            "Host foreign\n  Port 9000\nHost noport\n  IdentityFile {KEY}\n{}",
            managed("ws", "2222")
        );
        let store = MemoryStore::with_config(&text);
        let reconciler = Reconciler::new(&store);

        assert_eq!(reconciler.lookup_port("ws").unwrap(), "2222");
        for alias in ["foreign", "noport", "missing"] {
            let err = reconciler.lookup_port(alias).unwrap_err();
            assert_eq!(
                err.downcast_ref::<LookupError>(),
                Some(&LookupError::NotFound(alias.to_string()))
            );
        }
    }
}
