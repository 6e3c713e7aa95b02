mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    // Key generation must work before any key is configured.
    if let Commands::Keygen(args) = &cli.command {
        return commands::keygen::keygen(args, format);
    }

    let cfg = config::loader::load_config(cli.config.as_deref())?;
    observability::init_tracing(&cfg.logging.level, cfg.logging.json || cli.log_json);
    tracing::debug!(
        backend = %cfg.lifecycle.backend,
        issuer = %cfg.lifecycle.issuer,
        "Configuration loaded"
    );

    match &cli.command {
        Commands::Issue(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::issue(&manager, args, format).await?;
        }
        Commands::Refresh(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::refresh(&manager, &args.token, format).await?;
        }
        Commands::Revoke(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::revoke(&manager, &args.token).await?;
        }
        Commands::RevokeAll(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::revoke_all(&manager, args, format).await?;
        }
        Commands::Verify(args) => {
            commands::tokens::verify(&cfg.lifecycle, &args.token, format)?;
        }
        Commands::Sessions(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::sessions(&manager, &args.user_id, format).await?;
        }
        Commands::Lineage(args) => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::lineage(&manager, &args.family_id, format).await?;
        }
        Commands::Sweep => {
            let manager = commands::connect(cfg.lifecycle).await?;
            commands::tokens::sweep(&manager).await?;
        }
        // Handled before configuration is loaded.
        Commands::Keygen(_) => {}
    }

    Ok(())
}
