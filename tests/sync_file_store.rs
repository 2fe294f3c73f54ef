//! Reconciliation against the real file-backed store.

use std::fs;

use anyhow::Result;
use brevsync::core::backup::list_sessions;
use brevsync::core::{ActiveWorkspaceSet, Reconciler, SshConfigDocument, SshStore, SyncStage, failed_stage};
use brevsync::infra::FileSshStore;
use proptest::prelude::*;
use tempfile::TempDir;

fn store(tmp: &TempDir) -> FileSshStore {
    FileSshStore::new(
        tmp.path().join(".ssh/config"),
        tmp.path().join(".brev/brev.pem").display().to_string(),
        tmp.path().join(".brev/backups"),
    )
}

#[test]
fn fresh_home_gets_config_key_and_backup() -> Result<()> {
    let tmp = TempDir::new()?;
    let s = store(&tmp);

    let report = Reconciler::new(&s).sync(&ActiveWorkspaceSet::new(["ws-a"]), Some("PEM"))?;
    assert!(report.persisted);
    assert_eq!(report.lookup_port("ws-a")?, "2222");

    let text = fs::read_to_string(tmp.path().join(".ssh/config"))?;
    insta::assert_snapshot!(text.replace(&s.private_key_path(), "<KEY>").trim_end(), @r"
    Host ws-a
      Hostname 0.0.0.0
      IdentityFile <KEY>
      User brev
      Port 2222
    ");

    // A backup session exists even though there was no config yet
    let sessions = list_sessions(s.backup_dir())?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].files, 0);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(tmp.path().join(".ssh"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
    Ok(())
}

#[test]
fn unchanged_config_is_not_rewritten() -> Result<()> {
    let tmp = TempDir::new()?;
    let s = store(&tmp);
    let active = ActiveWorkspaceSet::new(["a", "b"]);

    Reconciler::new(&s).sync(&active, Some("PEM"))?;
    let before = fs::metadata(s.config_path())?.modified()?;

    let report = Reconciler::new(&s).sync(&active, None)?;
    assert!(!report.changed);
    assert!(!report.persisted);
    assert_eq!(fs::metadata(s.config_path())?.modified()?, before);
    Ok(())
}

#[test]
fn unreadable_backup_dir_stops_before_writing() -> Result<()> {
    let tmp = TempDir::new()?;
    // A regular file where the backup directory should be
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, "x")?;
    let s = FileSshStore::new(
        tmp.path().join(".ssh/config"),
        tmp.path().join(".brev/brev.pem").display().to_string(),
        blocker,
    );
    fs::create_dir_all(tmp.path().join(".ssh"))?;
    fs::write(s.config_path(), "Host keep\n")?;

    let err = Reconciler::new(&s)
        .sync(&ActiveWorkspaceSet::new(["a"]), Some("PEM"))
        .unwrap_err();
    assert_eq!(failed_stage(&err), Some(SyncStage::Backup));
    assert_eq!(fs::read_to_string(s.config_path())?, "Host keep\n");
    Ok(())
}

#[test]
fn user_sections_survive_pruning_on_disk() -> Result<()> {
    let tmp = TempDir::new()?;
    let s = store(&tmp);
    Reconciler::new(&s).sync(&ActiveWorkspaceSet::new(["old"]), Some("PEM"))?;

    let user = format!(
        "Match host *.corp\n  User corpuser\nHost mybox\n  IdentityFile \"{}\"\n",
        s.private_key_path()
    );
    let mut text = fs::read_to_string(s.config_path())?;
    text.push_str(&user);
    fs::write(s.config_path(), &text)?;

    let report = Reconciler::new(&s).sync(&ActiveWorkspaceSet::new(Vec::<String>::new()), None)?;
    let pruned: Vec<_> = report.reconciled.pruned.iter().map(|e| e.alias.as_str()).collect();
    assert_eq!(pruned, ["old"]);
    assert_eq!(fs::read_to_string(s.config_path())?, user);
    Ok(())
}

fn config_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Host a\n".to_string()),
        Just("host b c\n".to_string()),
        Just("Host=eq\n".to_string()),
        Just("  HostName example.com\n".to_string()),
        Just("  Port 22\n".to_string()),
        Just("# comment\n".to_string()),
        Just("\n".to_string()),
        Just("Match all\r\n".to_string()),
        "[ -~]{0,20}\n",
    ]
}

proptest! {
    #[test]
    fn parse_then_print_is_lossless(lines in prop::collection::vec(config_line(), 0..20), tail in "[ -~]{0,10}") {
        let text = lines.concat() + &tail;
        let doc = SshConfigDocument::parse(&text);
        prop_assert_eq!(doc.to_string(), text);
    }
}
