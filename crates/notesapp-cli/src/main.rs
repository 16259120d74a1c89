//! notesapp CLI - offline-first notes from the terminal
//!
//! Builds the auth and notes stores once per invocation and drives them from
//! subcommands.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{load_config, resolve_data_dir, AppContext};
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::search::run_search;
use crate::commands::show::run_show;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("notesapp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell, output }) = &cli.command {
        return run_completions(*shell, output.as_deref());
    }
    if cli.command.is_none() && cli.note.is_empty() {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let data_dir = resolve_data_dir(cli.data_dir.clone(), &config);
    let app = AppContext::open(&config, &data_dir).await?;

    let result = dispatch(&app, cli).await;
    app.finish().await;
    result
}

async fn dispatch(app: &AppContext, cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Some(Commands::Add { title, content }) => {
            run_add(app, title.as_deref(), &content)?;
        }
        Some(Commands::List { limit, json }) => {
            run_list(app, limit, json)?;
        }
        Some(Commands::Search { query, limit, json }) => {
            run_search(app, &query, limit, json)?;
        }
        Some(Commands::Show { id, json }) => {
            run_show(app, &id, json)?;
        }
        Some(Commands::Edit { id, title, content }) => {
            run_edit(app, &id, title, content)?;
        }
        Some(Commands::Delete { id }) => {
            run_delete(app, &id)?;
        }
        Some(Commands::Auth { command }) => run_auth(app, command).await?,
        Some(Commands::Sync) => {
            run_sync(app).await?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            // Quick capture mode: notesapp "my note"
            run_add(app, None, &cli.note)?;
        }
    }
    Ok(())
}
