//! **brevsync** - keeps `~/.ssh/config` host entries in step with active brev workspaces
//!
//! Managed entries are recognized by their `IdentityFile`, get a unique local
//! port, and are created or removed without touching anything else in the file.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core reconciliation - parsing, ownership, ports and backups
pub mod core {
    /// Lossless ssh config document model
    pub mod document;
    pub use document::{Block, HostBlock, KeyMatch, SshConfigDocument};

    /// Which host blocks brevsync owns
    pub mod ownership;
    pub use ownership::{IdentityFileClassifier, OwnershipClassifier};

    /// Port allocation for new entries
    pub mod ports;
    pub use ports::{DEFAULT_BASE_PORT, PortAllocator};

    /// Managed entry template
    pub mod render;
    pub use render::{identity_file_token, render_entry};

    /// Active workspace identifiers
    pub mod active;
    pub use active::ActiveWorkspaceSet;

    /// Create/prune pipeline and the store seam
    pub mod reconcile;
    pub use reconcile::{
        LookupError, ManagedEntry, Reconciler, SshStore, SyncReport, SyncStage, failed_stage,
        reconcile,
    };

    /// Crash-safe backup sessions
    pub mod backup;

    /// Listing, restore and cleanup of backup sessions
    pub mod backup_ops;
}

/// Infrastructure - configuration, file I/O, stores and logging
pub mod infra {
    /// Layered configuration with TOML support
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Atomic writes and tolerant reads
    pub mod io;

    /// File-backed ssh store
    pub mod store;
    pub use store::FileSshStore;

    /// Workspace list loading
    pub mod workspaces;

    /// tracing subscriber setup
    pub mod logging;
}

/// Subcommand handlers
pub mod cli_ext {
    pub mod backup_cmd;
    pub mod style;
    pub mod sync_cmd;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use cli_ext::backup_cmd::run as backup_run;
pub use cli_ext::sync_cmd::{run_list as list_run, run_port as port_run, run_sync as sync_run};
pub use infra::{Config, FileSshStore, load_config};
