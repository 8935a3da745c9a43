use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the folio binary.
#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Render Markdown documents into sanitized markup and metadata"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FOLIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch one document from the content API and print the rendered JSON.
    Render(RenderArgs),
    /// Render a local Markdown file and print the rendered JSON.
    #[command(name = "render-file")]
    RenderFile(RenderFileArgs),
    /// Render several documents concurrently and print one JSON line each.
    #[command(name = "render-all")]
    RenderAll(RenderAllArgs),
    /// Run the preview HTTP host.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    /// Slug of the document to render.
    #[arg(value_name = "SLUG")]
    pub slug: String,

    /// Fetch from the pages collection instead of posts.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub page: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderFileArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    /// Markdown file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub path: PathBuf,

    /// Slug to assign; derived from the file name when omitted.
    #[arg(long, value_name = "SLUG")]
    pub slug: Option<String>,

    /// Creation timestamp recorded in the metadata.
    #[arg(long = "created-at", value_name = "TIMESTAMP")]
    pub created_at: Option<String>,

    /// Render with the page sanitizer.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub page: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderAllArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,

    /// Slugs of the documents to render.
    #[arg(value_name = "SLUG", required = true, num_args = 1..)]
    pub slugs: Vec<String>,

    /// Fetch from the pages collection instead of posts.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub page: bool,

    /// Maximum number of concurrent render tasks.
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the content API base URL.
    #[arg(long = "source-base-url", value_name = "URL")]
    pub source_base_url: Option<String>,

    /// Override the content API request timeout.
    #[arg(long = "source-timeout-seconds", value_name = "SECONDS")]
    pub source_timeout_seconds: Option<u64>,

    /// Override the external bundling toolchain executable.
    #[arg(long = "render-toolchain-path", value_name = "PATH")]
    pub toolchain_path: Option<PathBuf>,

    /// Register an additional fragment component (repeatable).
    #[arg(long = "render-fragment", value_name = "NAME")]
    pub fragments: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the number of cached artifacts.
    #[arg(long = "server-cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,
}
