use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tvscout_core::browser::{
    BrowserError, CdpSessionFactory, DiagnosticCapturer, DiscoveryEngine, DiscoveryPolicy,
    DiscoveryRunner, DiscoveryStatus, RegionReport, SessionFactory, SessionLauncher,
};
use tvscout_core::{load_scout_config, ChannelRegistry, PlaylistWriter, ScoutConfig, SourceSection};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tvscout_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "tvscout command-line interface", long_about = None)]
pub struct Cli {
    /// Path to the main tvscout.toml
    #[arg(long, default_value = "configs/tvscout.toml")]
    pub config: PathBuf,
    /// Override for paths.base_dir (registries, playlists, diagnostics)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs stream discovery and writes playlists
    Discover(DiscoverArgs),
    /// Channel registry operations
    #[command(subcommand)]
    Channels(ChannelCommands),
    /// Runs integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Region to discover (see [[sources]] in the config)
    #[arg(long)]
    pub region: Option<String>,
    /// Discover every configured region
    #[arg(long, default_value_t = false)]
    pub all: bool,
    /// Run discovery but skip writing playlists
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommands {
    /// Lists the channels registered for a region
    List(ChannelListArgs),
}

#[derive(Args, Debug)]
pub struct ChannelListArgs {
    #[arg(long)]
    pub region: String,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Runs basic checks against config and registries
    Check,
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Discover(args) => {
            discover(&context, args, cli.format).await?;
        }
        Commands::Channels(ChannelCommands::List(args)) => {
            let list = context.channels_list(&args.region)?;
            render(&list, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

async fn discover(context: &AppContext, args: &DiscoverArgs, format: OutputFormat) -> Result<()> {
    let sources: Vec<&SourceSection> = if args.all {
        context.config.sources.iter().collect()
    } else if let Some(region) = &args.region {
        vec![context.config.source(region)?]
    } else {
        return Err(AppError::MissingResource(
            "pass --region <name> or --all".to_string(),
        ));
    };

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current channel");
            signal.cancel();
        }
    });

    let launcher = SessionLauncher::new(Arc::clone(&context.config));
    let factory: Arc<dyn SessionFactory> = Arc::new(CdpSessionFactory::new(launcher));
    let capturer = DiagnosticCapturer::new(context.config.diagnostics_dir());
    let runner = DiscoveryRunner::new(factory, DiscoveryEngine::new(capturer));

    for source in sources {
        let registry = ChannelRegistry::load(&context.config.resolve_path(&source.channels_file))?;
        let policy = DiscoveryPolicy::from_source(source);
        let report = runner
            .run_region(&source.region, &policy, registry.channels(), &cancel)
            .await?;

        if !args.dry_run {
            let writer = PlaylistWriter::new(context.config.resolve_path(&source.playlist_file));
            writer.write(&report.results).await?;
        }

        let interrupted = report.cancelled;
        render(&report, format)?;
        if interrupted {
            break;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: Arc<ScoutConfig>,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_scout_config(&cli.config)?;
        if let Some(base_dir) = &cli.base_dir {
            config.paths.base_dir = base_dir.display().to_string();
        }
        Ok(Self {
            config: Arc::new(config),
            config_path: cli.config.clone(),
        })
    }

    fn channels_list(&self, region: &str) -> Result<ChannelList> {
        let source = self.config.source(region)?;
        let registry = ChannelRegistry::load(&self.config.resolve_path(&source.channels_file))?;
        Ok(ChannelList {
            region: region.to_string(),
            rows: registry.channels().to_vec(),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(check_path("tvscout.toml", &self.config_path));

        for source in &self.config.sources {
            let registry_path = self.config.resolve_path(&source.channels_file);
            let name = format!("registry/{}", source.region);
            match ChannelRegistry::load(&registry_path) {
                Ok(registry) => results.push(HealthEntry::ok(
                    name,
                    format!("{} channels", registry.len()),
                )),
                Err(err) => results.push(HealthEntry::error(name, err.to_string())),
            }
        }

        let diagnostics_dir = self.config.diagnostics_dir();
        if diagnostics_dir.is_dir() {
            results.push(HealthEntry::ok(
                "diagnostics dir",
                format!("{}", diagnostics_dir.display()),
            ));
        } else {
            results.push(HealthEntry::warn(
                "diagnostics dir",
                format!("{} missing, will be created on demand", diagnostics_dir.display()),
            ));
        }

        if let Some(executable) = &self.config.chromium.executable_path {
            results.push(check_path("chromium executable", Path::new(executable)));
        }

        results
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

#[derive(Debug, Serialize)]
pub struct ChannelList {
    pub region: String,
    pub rows: Vec<tvscout_core::ChannelDescriptor>,
}

impl DisplayFallback for ChannelList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return format!("No channels registered for {}", self.region);
        }
        let mut lines = vec![format!("Channels for {}:", self.region)];
        for channel in &self.rows {
            lines.push(format!(
                "{} | {} | {}",
                channel.id, channel.name, channel.url
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for RegionReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Run {} region={} found={} not_found={} errors={} cancelled={} ({} ms)",
            self.run_id,
            self.region,
            self.found,
            self.not_found,
            self.errors,
            self.cancelled,
            self.duration_ms
        )];
        for result in &self.results {
            let line = match result.status {
                DiscoveryStatus::Found => format!(
                    "  [found] {} -> {}",
                    result.channel.name,
                    result.play_url.as_deref().unwrap_or("-")
                ),
                DiscoveryStatus::NotFound => match &result.diagnostic {
                    Some(path) => format!(
                        "  [miss] {} (diagnostic: {})",
                        result.channel.name,
                        path.display()
                    ),
                    None => format!("  [miss] {}", result.channel.name),
                },
                DiscoveryStatus::Error => format!(
                    "  [error] {}: {}",
                    result.channel.name,
                    result.error.as_deref().unwrap_or("unknown")
                ),
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
