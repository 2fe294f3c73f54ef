use brevsync::cli::{BackupSubcommand, Cli, Commands, SortOrder};
use clap::{CommandFactory, Parser};

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn sync_flag_parsing() {
    // Given
    let argv = vec![
        "brevsync",
        "--dry-run",
        "sync",
        "ws-a",
        "ws-b",
        "--workspaces-file",
        "-",
        "--key-file",
        "/tmp/brev.pem",
        "--verbose",
    ];

    // When
    let cli = Cli::parse_from(argv);

    // Then
    assert!(cli.dry_run);
    assert!(cli.verbose);
    match cli.command {
        Commands::Sync(args) => {
            assert_eq!(args.ids, ["ws-a", "ws-b"]);
            assert_eq!(args.workspaces_file.unwrap().to_string_lossy(), "-");
            assert!(args.key_file.unwrap().ends_with("brev.pem"));
            assert!(!args.key_stdin);
        }
        _ => panic!("expected Sync command"),
    }
}

#[test]
fn key_sources_are_exclusive() {
    let res = Cli::try_parse_from(["brevsync", "sync", "--key-file", "k", "--key-stdin"]);
    assert!(res.is_err());
}

#[test]
fn global_flags_after_subcommand() {
    let cli = Cli::parse_from(["brevsync", "port", "ws", "--config", "/etc/brevsync.toml", "--quiet"]);
    assert!(cli.quiet);
    assert_eq!(cli.config.unwrap().to_string_lossy(), "/etc/brevsync.toml");
    match cli.command {
        Commands::Port(args) => assert_eq!(args.alias, "ws"),
        _ => panic!("expected Port command"),
    }
}

#[test]
fn backup_subcommands_parse() {
    let cli = Cli::parse_from(["brevsync", "backup", "list", "--sort", "asc", "--since", "7d"]);
    match cli.command {
        Commands::Backup(b) => match b.command {
            BackupSubcommand::List(a) => {
                assert!(matches!(a.sort, SortOrder::Asc));
                assert_eq!(a.since.as_deref(), Some("7d"));
                assert_eq!(a.limit, 100);
            }
            _ => panic!("expected backup list"),
        },
        _ => panic!("expected Backup command"),
    }

    let cli = Cli::parse_from(["brevsync", "backup", "restore", "latest", "--force", "--dry-run"]);
    assert!(cli.dry_run);
    match cli.command {
        Commands::Backup(b) => match b.command {
            BackupSubcommand::Restore(a) => {
                assert_eq!(a.session, "latest");
                assert!(a.force);
            }
            _ => panic!("expected backup restore"),
        },
        _ => panic!("expected Backup command"),
    }
}
