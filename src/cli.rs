use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "brevsync")]
#[command(about = "Keep ~/.ssh/config host entries in step with your active brev workspaces")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Read configuration from this file instead of the default locations
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl Cli {
    pub fn context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile managed ssh entries with the active workspaces
    Sync(SyncArgs),

    /// Print the forwarded port of a managed host
    Port(PortArgs),

    /// List managed ssh entries
    List(ListArgs),

    /// Inspect, restore, or clean up ssh config backups
    Backup(BackupArgs),

    /// Initialize a brevsync.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Active workspace identifiers
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// Read identifiers from a file ('-' for stdin)
    #[arg(long, value_name = "FILE")]
    pub workspaces_file: Option<PathBuf>,

    /// Private key to install before syncing
    #[arg(long, value_name = "PEM", conflicts_with = "key_stdin")]
    pub key_file: Option<PathBuf>,

    /// Read the private key from stdin
    #[arg(long)]
    pub key_stdin: bool,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PortArgs {
    /// Host alias of the managed entry
    pub alias: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    /// List backup sessions with optional filtering
    List(BackupListArgs),

    /// Show detailed information about a backup session
    Show(BackupShowArgs),

    /// Restore the ssh config from a backup session
    Restore(BackupRestoreArgs),

    /// Clean up old backup sessions
    Cleanup(BackupCleanupArgs),
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Parser, Debug)]
pub struct BackupListArgs {
    /// Filter: only successful sessions
    #[arg(long)]
    pub successful: bool,

    /// Filter by operation (sync, restore)
    #[arg(long)]
    pub operation: Option<String>,

    /// Filter by relative time (e.g., "7d", "24h")
    #[arg(long, value_name = "SPAN")]
    pub since: Option<String>,

    /// Limit result count
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Sort order
    #[arg(long, value_enum, default_value_t = SortOrder::Desc)]
    pub sort: SortOrder,

    /// Machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct BackupShowArgs {
    /// Session identifier (full, short, date prefix, latest, last-successful)
    pub id: String,

    /// Include file-level details
    #[arg(long)]
    pub verbose: bool,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Session ID or alias (e.g., 'latest')
    pub session: String,

    /// Overwrite even if current content differs
    #[arg(long)]
    pub force: bool,

    /// Show unified diff between current and backed-up content
    #[arg(long)]
    pub show_diff: bool,

    /// Validate backed-up content against manifest checksums
    #[arg(long)]
    pub verify_checksum: bool,

    /// Back up current files before overwriting
    #[arg(long)]
    pub backup_current: bool,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupCleanupArgs {
    /// RFC3339 or relative span: 7d, 24h, 90m, 45s, 2w
    #[arg(long)]
    pub older_than: Option<String>,

    /// Keep N newest sessions; remove the rest
    #[arg(long)]
    pub keep_latest: Option<usize>,

    /// Include sessions without DONE marker
    #[arg(long)]
    pub include_incomplete: bool,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
