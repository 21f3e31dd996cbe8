//! crumb command-line entry point.
//!
//! Loads configuration, opens the content store and both caches, and runs a
//! single subcommand. Results are printed as JSON on stdout; logs go to
//! stderr so output stays machine-readable.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crumb_core::{AppConfig, OutputFormat};

mod app;
mod cli;
mod commands;

use app::{App, apply_overrides};
use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = CliArgs::parse();
    let config = AppConfig::load_from(args.config_file.as_deref()).context("failed to load configuration")?;
    let config = apply_overrides(config, &args.overrides);

    let app = App::open(config).await.context("failed to open application state")?;
    run(&app, args.command).await
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Page(args) => print_json(&commands::page::page_impl(&app.pages, &args.paths).await?),
        Command::Image(args) => {
            let format = commands::image::pick_format(args.format.as_deref(), args.accept.as_deref())?;
            print_json(&commands::image::image_impl(&app.images, &args.url, args.width, format).await?)
        }
        Command::Srcset(args) => {
            let format: OutputFormat = args.format.parse()?;
            print_json(&commands::srcset::srcset_impl(&app.config.image_route, &args.url, args.max_width, format))
        }
        Command::Migrate(args) => {
            let output = commands::migrate::migrate_impl(&app.content, &app.config.content_db_path, args.seed.as_deref())
                .await?;
            print_json(&output)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
