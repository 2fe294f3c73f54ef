use anyhow::Result;
use brevsync::cli::{Cli, Commands};
use brevsync::infra::{config::load_config, logging};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.quiet, cli.verbose, cli.no_color);

    // Build a context once, pass everywhere
    let ctx = cli.context();
    let config = || load_config(cli.config.as_deref());

    match cli.command {
        Commands::Sync(args) => brevsync::sync_run(args, &config()?, &ctx),
        Commands::Port(args) => brevsync::port_run(args, &config()?),
        Commands::List(args) => brevsync::list_run(args, &config()?, &ctx),
        Commands::Backup(args) => brevsync::backup_run(args, &config()?, &ctx),
        Commands::Init(args) => brevsync::infra::config::init(args, &ctx),
        Commands::Completions(args) => brevsync::completion::run(args, &ctx),
    }
}
