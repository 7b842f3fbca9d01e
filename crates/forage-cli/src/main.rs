mod config;

use clap::{Parser, Subcommand};
use config::ForageConfig;
use forage_core::Source;
use forage_mcp::{CatalogSync, ProcessRegistry, StdioConnector, StdioHost};
use forage_server::{register_meta_tools, Forage};
use forage_store::{FileManifestStore, InstallLog, ManifestStore};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install-log entries shown by `forage status`.
const RECENT_LOG_ENTRIES: usize = 10;

#[derive(Parser)]
#[command(
    name = "forage",
    version,
    about = "Forage: find, install and proxy MCP servers from inside your agent"
)]
struct Cli {
    /// Path to config file (defaults to ./forage.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio (default)
    Serve,
    /// Search the registries from the command line
    Search {
        /// What you are looking for
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Limit to these sources (official-registry, smithery, npm)
        #[arg(long = "source", value_delimiter = ',')]
        sources: Vec<String>,
    },
    /// List installed tools
    List,
    /// Show the data directory, installed tools and recent installs
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = ForageConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            serve(config).await?;
            // A pending blocking read on stdin would otherwise hold the runtime open.
            std::process::exit(0)
        }
        Commands::Search { query, sources } => search(&config, &query.join(" "), &sources).await,
        Commands::List => list(&config).await,
        Commands::Status => status(&config).await,
    }
}

async fn serve(config: ForageConfig) -> anyhow::Result<()> {
    // Installed first so a signal during auto-start still stops the children.
    let mut shutdown = Box::pin(shutdown_signal());
    info!(data_dir = %config.data_dir.display(), "Starting Forage");

    let host = Arc::new(StdioHost::new("forage", env!("CARGO_PKG_VERSION")));
    let connector = Arc::new(StdioConnector::new(
        config.handshake_timeout(),
        config.request_timeout(),
    ));
    let registry = Arc::new(ProcessRegistry::new(connector));
    let sync = Arc::new(CatalogSync::new(host.clone(), registry));
    let manifest = Arc::new(FileManifestStore::in_dir(&config.data_dir));
    let log = Arc::new(InstallLog::in_dir(&config.data_dir));

    let forage = Arc::new(
        Forage::new(sync, manifest, log)
            .with_search(Arc::new(config.search_aggregator()))
            .with_registries(
                Arc::new(config.official_registry()),
                Arc::new(config.npm_registry()),
            )
            .with_package_verification(config.verify_packages),
    );
    register_meta_tools(host.as_ref(), forage.clone())?;

    let interrupted = match until_shutdown(forage.autostart(), &mut shutdown).await {
        Some(Ok(report)) => {
            info!(
                started = report.started.len(),
                failed = report.failed.len(),
                "Auto-start complete"
            );
            false
        }
        Some(Err(e)) => {
            warn!(error = %e, "Could not read manifest for auto-start");
            false
        }
        None => {
            info!("Shutdown signal received during auto-start");
            true
        }
    };

    if !interrupted {
        info!("MCP server running on stdio");
        match until_shutdown(host.serve_stdio(), &mut shutdown).await {
            Some(Ok(())) => info!("stdin closed"),
            Some(Err(e)) => warn!(error = %e, "MCP transport failed"),
            None => info!("Shutdown signal received"),
        }
    }

    if tokio::time::timeout(config.shutdown_timeout(), forage.shutdown())
        .await
        .is_err()
    {
        warn!("Timed out stopping child servers");
    }
    info!("Forage stopped");
    Ok(())
}

/// Runs `work` unless `shutdown` resolves first, in which case `work` is
/// dropped and `None` returned.
async fn until_shutdown<F, S>(work: F, shutdown: &mut S) -> Option<F::Output>
where
    F: Future,
    S: Future<Output = ()> + Unpin,
{
    tokio::select! {
        out = work => Some(out),
        () = shutdown => None,
    }
}

/// Registers SIGINT and SIGTERM handlers immediately; the returned future
/// resolves on either.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());
    async move {
        tokio::select! {
            () = wait_for(interrupt, "SIGINT") => {},
            () = wait_for(terminate, "SIGTERM") => {},
        }
    }
}

#[cfg(unix)]
async fn wait_for(stream: std::io::Result<tokio::signal::unix::Signal>, name: &'static str) {
    match stream {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(signal = name, error = %e, "Cannot listen for signal");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

async fn search(config: &ForageConfig, query: &str, sources: &[String]) -> anyhow::Result<()> {
    let sources: Vec<Source> = sources.iter().map(|s| Source::parse(s)).collect();
    let filter = (!sources.is_empty()).then_some(sources.as_slice());

    let results = config.search_aggregator().search(query, filter).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "query": query, "results": results }))?
    );
    Ok(())
}

async fn list(config: &ForageConfig) -> anyhow::Result<()> {
    let tools = FileManifestStore::in_dir(&config.data_dir).list().await?;
    if tools.is_empty() {
        println!("No tools installed.");
        return Ok(());
    }
    for tool in tools {
        println!(
            "{}\t{}\t{}\t{}",
            tool.name,
            tool.package_name,
            if tool.auto_start { "auto-start" } else { "manual" },
            tool.to_launch_spec().command_line()
        );
    }
    Ok(())
}

async fn status(config: &ForageConfig) -> anyhow::Result<()> {
    let manifest = FileManifestStore::in_dir(&config.data_dir);
    let log = InstallLog::in_dir(&config.data_dir);
    let tools = manifest.list().await?;
    let entries = log.entries().await?;
    let recent = &entries[entries.len().saturating_sub(RECENT_LOG_ENTRIES)..];

    let summary = serde_json::json!({
        "dataDir": config.data_dir,
        "manifest": manifest.path(),
        "installed": tools.len(),
        "autoStart": tools.iter().filter(|t| t.auto_start).count(),
        "recentInstalls": recent,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
