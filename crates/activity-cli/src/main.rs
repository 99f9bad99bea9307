mod config;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use activity_core::{
    notification_channel, ActivityEvent, ActivityEventKind, ActivityService, BridgeError, Configuration,
    ConfigurationSource, HttpMetadataClient, MetadataClient, MetadataOptions, StaticConfiguration, WebhookConfig,
    WebhookDispatcher,
};

use crate::config::AppConfig;
use crate::scenario::Scenario;

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Streaming-page activity monitor: replay recorded pages and inspect metadata.
#[derive(Parser)]
#[command(name = "activity-monitor", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded scenario through the activity service and print its events.
    Replay {
        /// Path to the scenario TOML file.
        scenario: PathBuf,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Speed-up factor applied to step delays and service timers.
        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Time to keep the service running after the last step, in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        linger_ms: u64,

        /// Optional webhook URL to POST activity events to.
        #[arg(long)]
        webhook_url: Option<String>,

        /// Print events as JSON lines instead of a styled log.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch and print metadata for one video id.
    Metadata {
        /// External video id.
        id: u64,

        /// Page build identifier used in the request path.
        #[arg(long)]
        build_identifier: Option<String>,

        /// Metadata API base URL. Overrides config file.
        #[arg(long)]
        base_url: Option<String>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            scenario,
            config,
            speed,
            linger_ms,
            webhook_url,
            json,
        } => {
            let app_config = load_config(config.as_deref(), "warn");
            run_replay(app_config, scenario, speed, linger_ms, webhook_url, json).await;
        }
        Commands::Metadata {
            id,
            build_identifier,
            base_url,
            config,
        } => {
            let app_config = load_config(config.as_deref(), "warn");
            run_metadata(app_config, id, build_identifier, base_url).await;
        }
    }
}

fn load_config(path: Option<&std::path::Path>, default_level: &str) -> AppConfig {
    let Some(path) = path else {
        init_tracing("pretty", default_level);
        return AppConfig::default();
    };
    match AppConfig::load(path) {
        Ok(c) => {
            init_tracing(&c.logging.format, default_level);
            tracing::info!(path = %path.display(), "Loaded config file");
            c
        }
        Err(e) => {
            init_tracing("pretty", default_level);
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Stands in for the page bridge when no build identifier is configured.
struct NoPageConfiguration;

#[async_trait]
impl ConfigurationSource for NoPageConfiguration {
    async fn configuration(&self, _refresh: bool) -> Result<Configuration, BridgeError> {
        Err(BridgeError::Disconnected)
    }
}

fn configuration_source(build_identifier: Option<String>) -> Arc<dyn ConfigurationSource> {
    match build_identifier {
        Some(build) => Arc::new(StaticConfiguration(Configuration::new(build))),
        None => Arc::new(NoPageConfiguration),
    }
}

async fn run_replay(
    app_config: AppConfig,
    scenario_path: PathBuf,
    speed: f64,
    linger_ms: u64,
    webhook_url: Option<String>,
    json: bool,
) {
    let scenario = match Scenario::load(&scenario_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = scenario::scale_config(app_config.activity_config(), speed);
    let client = HttpMetadataClient::build_client(config.request_timeout);
    let metadata: Arc<dyn MetadataClient> = Arc::new(HttpMetadataClient::with_client(
        client.clone(),
        config.metadata_base_url.clone(),
        configuration_source(app_config.metadata.build_identifier.clone()),
    ));

    let mut webhooks = app_config.webhook.clone();
    if let Some(url) = &webhook_url {
        webhooks.push(WebhookConfig::new(url.clone()));
    }

    let service_id = scenario
        .name
        .clone()
        .unwrap_or_else(|| scenario_path.display().to_string());
    let mut service = ActivityService::new(service_id.clone(), config, metadata);

    let webhook_handle = if webhooks.is_empty() {
        None
    } else {
        let (tx, rx) = notification_channel();
        service = service.with_notifications(tx);
        let dispatcher = WebhookDispatcher::new(rx, webhooks.clone(), client);
        Some(tokio::spawn(dispatcher.run()))
    };

    let mut subscription = service.subscribe();
    let (host_tx, host_rx) = mpsc::channel(64);
    let service_handle = tokio::spawn(service.run(host_rx));

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        println!(
            "{} {}",
            style("activity-monitor").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        );
        println!("  {} {}", style("scenario:").dim(), style(&service_id).bold());
        println!("  {} {}", style("steps:   ").dim(), scenario.step.len());
        println!(
            "  {} {:.1}s at {}x",
            style("length:  ").dim(),
            scenario.duration().as_secs_f64(),
            speed
        );
        for wh in &webhooks {
            println!("  {} {}", style("webhook: ").dim(), wh.url);
        }
        println!();
        let bar = ProgressBar::new_spinner();
        if let Ok(s) = ProgressStyle::with_template("{spinner} {wide_msg}") {
            bar.set_style(s);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };

    let printer_bar = spinner.clone();
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = subscription.recv().await {
            count += 1;
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                }
            } else {
                printer_bar.println(format_event(&event));
            }
        }
        count
    });

    let total = scenario.step.len();
    for (i, step) in scenario.step.into_iter().enumerate() {
        if step.after_ms > 0 {
            tokio::time::sleep(scenario::scaled(Duration::from_millis(step.after_ms), speed)).await;
        }
        spinner.set_message(format!("step {}/{}  {}", i + 1, total, style(step.event.op()).dim()));
        if host_tx.send(step.event).await.is_err() {
            break;
        }
    }

    spinner.set_message(format!("{}", style("waiting for timers...").dim()));
    tokio::time::sleep(scenario::scaled(Duration::from_millis(linger_ms), speed)).await;
    drop(host_tx);

    let result = match service_handle.await {
        Ok(result) => result,
        Err(e) => {
            spinner.finish_and_clear();
            tracing::error!(error = %e, "Activity service task failed");
            std::process::exit(1);
        }
    };
    let count = printer.await.unwrap_or_default();
    spinner.finish_and_clear();

    if let Some(handle) = webhook_handle {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(_) => tracing::info!("Webhook dispatcher shut down"),
            Err(_) => tracing::warn!("Webhook dispatcher did not shut down in time, aborting"),
        }
    }

    if let Err(e) = result {
        if !json {
            println!("\n{} {}", style("FAILED").red().bold(), e);
        }
        tracing::error!(error = %e, "Replay failed");
        std::process::exit(1);
    }
    if !json {
        println!("\n{}", style(format!("{count} events")).dim());
    }
}

fn format_event(event: &ActivityEvent) -> String {
    let ts = event.timestamp.format("%H:%M:%S");
    let kind_str = format!("{:<9}", event.kind.as_str());
    let colored_kind = match event.kind {
        ActivityEventKind::Started | ActivityEventKind::Progress => style(kind_str).green(),
        ActivityEventKind::Paused | ActivityEventKind::Seeked => style(kind_str).yellow(),
        ActivityEventKind::Stopped | ActivityEventKind::Closed | ActivityEventKind::Ended => style(kind_str).red(),
        _ => style(kind_str).cyan(),
    };
    let detail = match (&event.item, event.time_ms) {
        (Some(item), _) => format!("{} ({})", item.identity, item.source_id()),
        (None, Some(ms)) => format_position(ms),
        (None, None) => String::new(),
    };
    format!(
        "  {}  {} {} {}  {}",
        style(ts).dim(),
        colored_kind,
        style(format!("#{}", event.session_key)).dim(),
        style(format!("{:<8}", event.state.to_string())).dim(),
        detail
    )
}

fn format_position(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

async fn run_metadata(app_config: AppConfig, id: u64, build_identifier: Option<String>, base_url: Option<String>) {
    let mut config = app_config.activity_config();
    if let Some(url) = base_url {
        config = config.with_metadata_base_url(url);
    }
    let build = build_identifier.or(app_config.metadata.build_identifier.clone());
    if build.is_none() {
        tracing::error!("A build identifier is required (--build-identifier or [metadata] build_identifier)");
        std::process::exit(1);
    }

    let client = HttpMetadataClient::from_config(&config, configuration_source(build));
    match client.get(id, &MetadataOptions::default()).await {
        Ok(response) => match serde_json::to_string_pretty(&response) {
            Ok(body) => println!("{body}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize metadata");
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(id, error = %e, status = ?e.status_code(), "Metadata request failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_format: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
