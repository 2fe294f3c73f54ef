//! Handlers for `sync`, `port` and `list`.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::json;
use similar::TextDiff;
use tabled::{Table, Tabled};
use tracing::{debug, instrument};

use crate::cli::{AppContext, ListArgs, PortArgs, SyncArgs};
use crate::cli_ext::style::{Tone, paint, paint_diff};
use crate::core::reconcile::{ManagedEntry, Reconciler, SyncReport};
use crate::infra::config::Config;
use crate::infra::store::FileSshStore;
use crate::infra::workspaces::load_active_set;

#[derive(Debug, Serialize)]
struct SyncSummary<'a> {
    dry_run: bool,
    changed: bool,
    persisted: bool,
    created: &'a [ManagedEntry],
    pruned: &'a [ManagedEntry],
    managed: Vec<ManagedEntry>,
}

#[instrument(skip_all, fields(dry_run = ctx.dry_run))]
pub fn run_sync(args: SyncArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let reads_stdin = args.workspaces_file.as_deref() == Some(Path::new("-"));
    if args.key_stdin && reads_stdin {
        bail!("--key-stdin and --workspaces-file - cannot both read stdin");
    }

    let active = load_active_set(
        &args.ids,
        args.workspaces_file.as_deref(),
        cfg.workspaces.identifier,
    )?;
    debug!(active = active.len(), "active workspaces loaded");

    let store = FileSshStore::from_config(cfg)?;
    let reconciler = Reconciler::new(&store).with_base_port(cfg.base_port);

    let report = if ctx.dry_run {
        reconciler.preview(&active)?
    } else {
        let key = read_key_material(&args)?;
        reconciler.sync(&active, key.as_deref())?
    };

    if args.json {
        let summary = SyncSummary {
            dry_run: ctx.dry_run,
            changed: report.changed,
            persisted: report.persisted,
            created: &report.reconciled.created,
            pruned: &report.reconciled.pruned,
            managed: report.managed(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if ctx.dry_run {
        print_preview(&report, store.config_path(), ctx);
    } else if !ctx.quiet {
        print_changes(&report, ctx);
    }
    Ok(())
}

fn read_key_material(args: &SyncArgs) -> Result<Option<String>> {
    if let Some(path) = &args.key_file {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("read key file {}", path.display()))?;
        return Ok(Some(pem));
    }
    if args.key_stdin {
        let mut pem = String::new();
        std::io::stdin()
            .read_to_string(&mut pem)
            .context("read private key from stdin")?;
        if pem.trim().is_empty() {
            bail!("no private key received on stdin");
        }
        return Ok(Some(pem));
    }
    Ok(None)
}

fn print_changes(report: &SyncReport, ctx: &AppContext) {
    for entry in &report.reconciled.created {
        println!(
            "{} {} (port {})",
            paint(ctx, "+", Tone::Good),
            entry.alias,
            entry.port.as_deref().unwrap_or("-")
        );
    }
    for entry in &report.reconciled.pruned {
        println!("{} {}", paint(ctx, "-", Tone::Bad), entry.alias);
    }
    if report.persisted {
        println!(
            "{} {} added, {} removed",
            paint(ctx, "Updated ssh config:", Tone::Good),
            report.reconciled.created.len(),
            report.reconciled.pruned.len()
        );
    } else {
        println!("{}", paint(ctx, "ssh config already up to date", Tone::Accent));
    }
}

fn print_preview(report: &SyncReport, config_path: &Path, ctx: &AppContext) {
    if !report.changed {
        if !ctx.quiet {
            println!("{}", paint(ctx, "DRY RUN: ssh config already up to date", Tone::Warn));
        }
        return;
    }

    let rendered = report.rendered();
    let label = config_path.display().to_string();
    let diff = TextDiff::from_lines(&report.original, &rendered)
        .unified_diff()
        .context_radius(3)
        .header(&label, &label)
        .to_string();

    if !ctx.quiet {
        println!("{}", paint(ctx, "DRY RUN: would write:", Tone::Warn));
    }
    print!("{}", paint_diff(ctx, &diff));
    if !ctx.quiet {
        println!(
            "{} added, {} removed",
            report.reconciled.created.len(),
            report.reconciled.pruned.len()
        );
    }
}

pub fn run_port(args: PortArgs, cfg: &Config) -> Result<()> {
    let store = FileSshStore::from_config(cfg)?;
    let port = Reconciler::new(&store).lookup_port(&args.alias)?;
    println!("{port}");
    Ok(())
}

#[derive(Tabled)]
struct EntryRow {
    alias: String,
    port: String,
    hostname: String,
    user: String,
}

impl From<ManagedEntry> for EntryRow {
    fn from(e: ManagedEntry) -> Self {
        let dash = || "-".to_string();
        Self {
            alias: e.alias,
            port: e.port.unwrap_or_else(dash),
            hostname: e.hostname.unwrap_or_else(dash),
            user: e.user.unwrap_or_else(dash),
        }
    }
}

pub fn run_list(args: ListArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let store = FileSshStore::from_config(cfg)?;
    let entries = Reconciler::new(&store).managed_entries()?;

    if args.json {
        let out = json!({
            "config": store.config_path(),
            "identity_file": cfg.private_key_file()?,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if entries.is_empty() {
        if !ctx.quiet {
            println!("No managed entries in {}", store.config_path().display());
        }
        return Ok(());
    }

    let rows: Vec<EntryRow> = entries.into_iter().map(EntryRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}
