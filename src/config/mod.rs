//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, CommonOverrides, RenderAllArgs, RenderArgs, RenderFileArgs, ServeArgs,
    ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "folio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_CAPACITY: usize = 256;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub source: SourceSettings,
    pub render: RenderSettings,
    pub server: ServerSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Content API the document loader talks to.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `None` leaves only local files available.
    pub base_url: Option<Url>,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RenderSettings {
    pub toolchain_path: Option<PathBuf>,
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub cache_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("FOLIO")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("render.fragments")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Render(args)) => raw.apply_common_overrides(&args.overrides),
        Some(Command::RenderFile(args)) => raw.apply_common_overrides(&args.overrides),
        Some(Command::RenderAll(args)) => {
            raw.apply_common_overrides(&args.overrides);
            if let Some(concurrency) = args.concurrency {
                raw.batch.concurrency = Some(concurrency);
            }
        }
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    source: RawSourceSettings,
    render: RawRenderSettings,
    server: RawServerSettings,
    batch: RawBatchSettings,
}

impl RawSettings {
    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.source_base_url.as_ref() {
            self.source.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.source_timeout_seconds {
            self.source.timeout_seconds = Some(seconds);
        }
        if let Some(path) = overrides.toolchain_path.as_ref() {
            self.render.toolchain_path = Some(path.clone());
        }
        self.render
            .fragments
            .extend(overrides.fragments.iter().cloned());
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_common_overrides(&overrides.common);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.server.cache_capacity = Some(capacity);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            source,
            render,
            server,
            batch,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            source: build_source_settings(source)?,
            render: build_render_settings(render)?,
            server: build_server_settings(server)?,
            batch: build_batch_settings(batch)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_source_settings(source: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let base_url = match non_blank(source.base_url) {
        Some(value) => {
            let url = Url::parse(&value).map_err(|err| {
                LoadError::invalid("source.base_url", format!("invalid URL `{value}`: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "source.base_url",
                    format!("unsupported scheme `{}`", url.scheme()),
                ));
            }
            Some(url)
        }
        None => None,
    };

    let timeout_seconds = source
        .timeout_seconds
        .unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS);
    let timeout_seconds = NonZeroU64::new(timeout_seconds).ok_or_else(|| {
        LoadError::invalid("source.timeout_seconds", "must be greater than zero")
    })?;

    Ok(SourceSettings {
        base_url,
        token: non_blank(source.token),
        timeout: Duration::from_secs(timeout_seconds.get()),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let toolchain_path = match render.toolchain_path {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "render.toolchain_path",
                "path must not be empty",
            ));
        }
        other => other,
    };

    let mut fragments = Vec::with_capacity(render.fragments.len());
    for name in render.fragments {
        let name = name.trim().to_string();
        if !name.starts_with(|ch: char| ch.is_ascii_uppercase())
            || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(LoadError::invalid(
                "render.fragments",
                format!("`{name}` is not a capitalized component name"),
            ));
        }
        if !fragments.contains(&name) {
            fragments.push(name);
        }
    }

    Ok(RenderSettings {
        toolchain_path,
        fragments,
    })
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let cache_capacity = non_zero_usize(
        server.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
        "server.cache_capacity",
    )?;

    Ok(ServerSettings {
        addr,
        cache_capacity,
    })
}

fn build_batch_settings(batch: RawBatchSettings) -> Result<BatchSettings, LoadError> {
    Ok(BatchSettings {
        concurrency: non_zero_usize(
            batch.concurrency.unwrap_or(DEFAULT_BATCH_CONCURRENCY),
            "batch.concurrency",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    base_url: Option<String>,
    token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    toolchain_path: Option<PathBuf>,
    fragments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    cache_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBatchSettings {
    concurrency: Option<usize>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
