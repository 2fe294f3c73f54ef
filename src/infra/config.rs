use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::ports::DEFAULT_BASE_PORT;

/// File name written by `brevsync init`
pub const CONFIG_FILE_NAME: &str = "brevsync.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// SSH client config that holds the managed entries
    pub ssh_config_path: String,

    /// Private key written before each sync; also the ownership marker
    pub private_key_path: String,

    /// Root of the backup sessions
    pub backup_dir: String,

    /// First port handed out to new entries
    pub base_port: u16,

    /// Backup retention settings
    pub backup: BackupConfig,

    /// Workspace list settings
    pub workspaces: WorkspacesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig
{
    /// Completed sessions kept after each sync (0 keeps all)
    pub keep_latest: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspacesConfig
{
    pub identifier: IdentifierField,
}

/// Field of a workspace object used as the host alias
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierField
{
    #[default]
    Dns,
    Name,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            ssh_config_path: "~/.ssh/config".to_string(),
            private_key_path: "~/.brev/brev.pem".to_string(),
            backup_dir: "~/.brev/backups".to_string(),
            base_port: DEFAULT_BASE_PORT,
            backup: BackupConfig::default(),
            workspaces: WorkspacesConfig::default(),
        }
    }
}

impl Default for BackupConfig
{
    fn default() -> Self
    {
        Self { keep_latest: 10 }
    }
}

impl Default for WorkspacesConfig
{
    fn default() -> Self
    {
        Self { identifier: IdentifierField::Dns }
    }
}

impl Config
{
    pub fn ssh_config_file(&self) -> Result<PathBuf>
    {
        expand_path(&self.ssh_config_path)
    }

    /// Expanded key path as written into `IdentityFile`
    pub fn private_key_file(&self) -> Result<String>
    {
        expand(&self.private_key_path)
    }

    pub fn backup_root(&self) -> Result<PathBuf>
    {
        expand_path(&self.backup_dir)
    }
}

/// Expand `~` and `$VAR` in a user-supplied path.
pub fn expand(raw: &str) -> Result<String>
{
    let expanded = shellexpand::full(raw).with_context(|| format!("Failed to expand path '{raw}'"))?;
    Ok(expanded.into_owned())
}

fn expand_path(raw: &str) -> Result<PathBuf>
{
    expand(raw).map(PathBuf::from)
}

/// Load layered configuration: defaults, one config file, then `BREVSYNC_*`.
///
/// An explicit path must exist; otherwise the first existing file among
/// `brevsync.toml`, `.brevsync.toml` and `~/.config/brevsync/config.toml`
/// is used.
pub fn load_config(explicit: Option<&Path>) -> Result<Config>
{
    let defaults = config::Config::try_from(&Config::default())
        .context("Failed to build default configuration")?;
    let mut builder = config::Config::builder().add_source(defaults);

    if let Some(path) = explicit
    {
        if !path.exists()
        {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        builder = builder.add_source(config::File::from(path));
    }
    else
    {
        // Load from config files in priority order
        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME), PathBuf::from(".brevsync.toml")];
        if let Ok(user) = expand_path("~/.config/brevsync/config.toml")
        {
            candidates.push(user);
        }

        for path in &candidates
        {
            if path.exists()
            {
                builder = builder.add_source(config::File::from(path.as_path()));
                break;
            }
        }
    }

    // Add environment variables with BREVSYNC_ prefix
    builder = builder.add_source(
        config::Environment::with_prefix("BREVSYNC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILE_NAME);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    if ctx.dry_run
    {
        if !ctx.quiet
        {
            println!("Would create config file at {}", config_path.display());
        }
        return Ok(());
    }

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
