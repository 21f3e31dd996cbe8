//! Command-line surface: global flags, config overrides and subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command-line arguments for the crumb binary.
#[derive(Debug, Parser)]
#[command(name = "crumb", version, about = "Page and image derivative caches for CMS-backed sites")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CRUMB_CONFIG_FILE", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the SQLite content database path.
    #[arg(long = "content-db", value_name = "PATH", global = true)]
    pub content_db_path: Option<PathBuf>,

    /// Override the directory derivatives are written to.
    #[arg(long = "image-cache-dir", value_name = "PATH", global = true)]
    pub image_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load one or more pages through the page cache and print them as JSON.
    Page(PageArgs),
    /// Resolve an image derivative, generating it if needed.
    Image(ImageArgs),
    /// Print srcset and sizes attribute values for an image.
    Srcset(SrcsetArgs),
    /// Create or upgrade the content database schema.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    /// Request paths, e.g. `/` or `/about`.
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ImageArgs {
    /// Source image URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Target width in pixels.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Output format (png, jpeg, webp). Takes precedence over --accept.
    #[arg(long)]
    pub format: Option<String>,

    /// Accept header to negotiate the format from.
    #[arg(long)]
    pub accept: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct SrcsetArgs {
    /// Source image URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Largest width to offer.
    #[arg(long = "max-width", default_value_t = 1600)]
    pub max_width: u32,

    /// Output format referenced by the candidate URLs.
    #[arg(long, default_value = "png")]
    pub format: String,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    /// SQL file executed after migrations, e.g. to load fixture content.
    #[arg(long, value_name = "FILE")]
    pub seed: Option<PathBuf>,
}
