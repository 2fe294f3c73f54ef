//! Handlers for `backup list|show|restore|cleanup`.

use std::path::Path;

use anyhow::Result;
use tabled::{Table, Tabled};

use crate::cli::{
    AppContext, BackupArgs, BackupCleanupArgs, BackupListArgs, BackupRestoreArgs, BackupShowArgs,
    BackupSubcommand, SortOrder,
};
use crate::cli_ext::style::{Tone, paint, paint_diff};
use crate::core::backup_ops::{
    CleanupRequest, ListRequest, RestoreRequest, ShowRequest, cleanup_sessions,
    list_sessions_filtered, restore_session, show_session,
};
use crate::infra::config::Config;

pub fn run(args: BackupArgs, cfg: &Config, ctx: &AppContext) -> Result<()> {
    let backup_dir = cfg.backup_root()?;
    match args.command {
        BackupSubcommand::List(a) => list(&backup_dir, a, ctx),
        BackupSubcommand::Show(a) => show(&backup_dir, a, ctx),
        BackupSubcommand::Restore(a) => restore(&backup_dir, a, ctx),
        BackupSubcommand::Cleanup(a) => cleanup(&backup_dir, a, ctx),
    }
}

#[derive(Tabled)]
struct SessionRow {
    id: String,
    timestamp: String,
    operation: String,
    status: String,
    files: usize,
}

fn list(backup_dir: &Path, args: BackupListArgs, ctx: &AppContext) -> Result<()> {
    let sessions = list_sessions_filtered(
        backup_dir,
        ListRequest {
            successful: args.successful,
            operation: args.operation,
            since: args.since,
            limit: args.limit,
            sort_desc: matches!(args.sort, SortOrder::Desc),
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        if !ctx.quiet {
            println!("No backup sessions in {}", backup_dir.display());
        }
        return Ok(());
    }

    let rows: Vec<SessionRow> = sessions
        .into_iter()
        .map(|s| SessionRow {
            id: s.id,
            timestamp: s.timestamp,
            operation: s.operation,
            status: if s.success { "ok" } else { "failed" }.to_string(),
            files: s.files,
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn show(backup_dir: &Path, args: BackupShowArgs, ctx: &AppContext) -> Result<()> {
    let resp = show_session(
        backup_dir,
        ShowRequest {
            id: args.id,
            verbose: args.verbose,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let m = &resp.manifest;
    let status = if m.success {
        paint(ctx, "success", Tone::Good)
    } else {
        paint(ctx, "failed", Tone::Bad)
    };
    println!("Session:   {}", paint(ctx, &m.id, Tone::Accent));
    println!("Created:   {}", m.timestamp);
    println!("Operation: {}", m.operation);
    println!("Status:    {status}");
    println!("Location:  {}", resp.session_path.display());
    if let Some(total) = resp.total_size {
        println!("Size:      {total} bytes");
    }
    println!("Files:     {}", m.files.len());
    for f in &m.files {
        if args.verbose {
            println!(
                "  {} ({} bytes, {})",
                f.original_path.display(),
                f.size_bytes,
                f.checksum.as_deref().unwrap_or("no checksum")
            );
        } else {
            println!("  {}", f.original_path.display());
        }
    }
    Ok(())
}

fn restore(backup_dir: &Path, args: BackupRestoreArgs, ctx: &AppContext) -> Result<()> {
    let result = restore_session(
        backup_dir,
        RestoreRequest {
            session_id: args.session,
            dry_run: ctx.dry_run,
            show_diff: args.show_diff,
            force: args.force,
            verify_checksum: args.verify_checksum,
            backup_current: args.backup_current,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if let Some(diffs) = &result.diffs {
            for d in diffs {
                print!("{}", paint_diff(ctx, &d.unified));
            }
        }
        if !ctx.quiet {
            for p in &result.restored {
                println!("{} {}", paint(ctx, "restored", Tone::Good), p.display());
            }
            for p in &result.unchanged {
                println!("{} {}", paint(ctx, "unchanged", Tone::Accent), p.display());
            }
            for p in &result.conflicts {
                println!("{} {}", paint(ctx, "conflict", Tone::Bad), p.display());
            }
            if let Some(id) = &result.backup_session_id {
                println!("Current files saved in session {id}");
            }
            if ctx.dry_run && !result.conflicts.is_empty() {
                println!("{}", paint(ctx, "DRY RUN: nothing written", Tone::Warn));
            }
        }
    }

    if !result.conflicts.is_empty() && !ctx.dry_run {
        anyhow::bail!(
            "{} file(s) differ from session {}; rerun with --force to overwrite",
            result.conflicts.len(),
            result.session_id
        );
    }
    Ok(())
}

fn cleanup(backup_dir: &Path, args: BackupCleanupArgs, ctx: &AppContext) -> Result<()> {
    if args.older_than.is_none() && args.keep_latest.is_none() {
        anyhow::bail!("Specify --older-than and/or --keep-latest");
    }

    let result = cleanup_sessions(
        backup_dir,
        CleanupRequest {
            older_than: args.older_than,
            keep_latest: args.keep_latest,
            dry_run: ctx.dry_run,
            include_incomplete: args.include_incomplete,
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !ctx.quiet {
        let verb = if ctx.dry_run { "Would remove" } else { "Removed" };
        println!(
            "{} {} session(s), {} bytes",
            verb,
            result.sessions_removed.len(),
            result.bytes_freed
        );
        for id in &result.sessions_removed {
            println!("  {id}");
        }
        for e in &result.errors {
            eprintln!("{} {e}", paint(ctx, "error:", Tone::Bad));
        }
    }

    if !result.errors.is_empty() {
        anyhow::bail!("{} session(s) could not be removed", result.errors.len());
    }
    Ok(())
}
