// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Centerfire entry point - one subcommand per agent, plus client tools.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use centerfire::bus::{Request, SharedBus};
use centerfire::config::{self, CliOptions, FabricConfig};
use centerfire::context::{ContextRetriever, WeaviateStore, SWEEP_INTERVAL};
use centerfire::llm::LlmRouter;
use centerfire::naming::NamingService;
use centerfire::registry::Registry;
use centerfire::runtime::{request_reply, shutdown_signal, AgentIdentity, AgentRuntime, RequestHandler};
use centerfire::scaffold::Scaffolder;
use centerfire::shell::ShellOrchestrator;
use centerfire::streams::{build_consumer, Projection};
use centerfire::telemetry::{init_telemetry, TelemetryConfig};
use centerfire::{connect_bus, VERSION};

/// Centerfire - agent coordination fabric.
#[derive(Parser)]
#[command(name = "centerfire")]
#[command(author, version, about = "Agent coordination fabric", long_about = None)]
struct Cli {
    /// Bus URL (redis://host:port or memory://)
    #[arg(long, global = true, env = "CENTERFIRE_BUS_URL")]
    bus_url: Option<String>,

    /// Project namespace for keys and streams
    #[arg(long, global = true, env = "CENTERFIRE_PROJECT")]
    project: Option<String>,

    /// Environment namespace for keys
    #[arg(long, global = true, env = "CENTERFIRE_ENVIRONMENT")]
    environment: Option<String>,

    /// Explicit config file (YAML or JSON)
    #[arg(long, global = true, env = "CENTERFIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for pid, health and registry files
    #[arg(long, global = true, env = "CENTERFIRE_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent registry
    Manager,

    /// Run the naming agent
    Naming(AgentArgs),

    /// Run the scaffolding agent
    Struct(AgentArgs),

    /// Run the context retrieval agent
    Context(AgentArgs),

    /// Run the local LLM router
    Llm(AgentArgs),

    /// Run the shell orchestrator
    System(AgentArgs),

    /// Run a stream consumer
    Consume {
        #[arg(value_enum)]
        sink: Sink,
    },

    /// Publish a request and print the correlated response
    Send {
        /// Agent topic (naming, struct, context, localllm, system, ...)
        topic: String,
        /// Action name
        action: String,
        /// Params as a JSON object
        #[arg(default_value = "{}")]
        params: String,
        /// Client id placed on the envelope
        #[arg(long)]
        client_id: Option<String>,
        /// Seconds to wait for the response
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,
    /// Write centerfire.yaml in the current directory
    Init,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sink {
    Weaviate,
    Neo4j,
    Clickhouse,
}

impl From<Sink> for Projection {
    fn from(sink: Sink) -> Self {
        match sink {
            Sink::Weaviate => Projection::Vector,
            Sink::Neo4j => Projection::Graph,
            Sink::Clickhouse => Projection::Cold,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
struct AgentArgs {
    /// Name to register under
    #[arg(long)]
    name: Option<String>,

    /// Per-agent YAML (agent_id, cid, capabilities, monitoring)
    #[arg(long, env = "CENTERFIRE_AGENT_CONFIG")]
    agent_config: Option<PathBuf>,
}

/// Defaults for each agent family.
struct AgentProfile {
    name: &'static str,
    agent_type: &'static str,
    topic: &'static str,
    capabilities: &'static [&'static str],
}

const NAMING: AgentProfile = AgentProfile {
    name: "AGT-NAMING-1",
    agent_type: "naming",
    topic: "naming",
    capabilities: &[
        "allocate_capability",
        "allocate_session",
        "allocate_namespace",
        "allocate_module",
        "allocate_function",
        "validate_name",
    ],
};

const STRUCT: AgentProfile = AgentProfile {
    name: "AGT-STRUCT-1",
    agent_type: "struct",
    topic: "struct",
    capabilities: &["create_structure"],
};

const CONTEXT: AgentProfile = AgentProfile {
    name: "AGT-CONTEXT-1",
    agent_type: "context",
    topic: "context",
    capabilities: &[
        "search_semantic",
        "search_conversations",
        "get_context",
        "get_session_history",
    ],
};

const LOCALLLM: AgentProfile = AgentProfile {
    name: "AGT-LOCALLLM-1",
    agent_type: "localllm",
    topic: "localllm",
    capabilities: &["file_search", "code_analysis", "context_synthesis", "todo_management", "list_models"],
};

const SYSTEM: AgentProfile = AgentProfile {
    name: "AGT-SYSTEM-1",
    agent_type: "system",
    topic: "system",
    capabilities: &["execute_command", "status"],
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_telemetry(&TelemetryConfig::from_debug_flag(cli.debug))?;

    let workspace_root = std::env::current_dir()?;
    let root = config::find_workspace_root(&workspace_root).unwrap_or(workspace_root);
    let cli_options = CliOptions {
        bus_url: cli.bus_url,
        project: cli.project,
        environment: cli.environment,
        temp_dir: cli.temp_dir,
        workspace_root: None,
    };

    match cli.command {
        Commands::Version => {
            println!("centerfire {}", VERSION);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, &root, cli.config.as_deref(), cli_options),
        command => {
            let mut config = config::load_config(&root, cli.config.as_deref(), cli_options)?;
            if config.workspace_root.is_relative() {
                config.workspace_root = root.join(&config.workspace_root);
            }
            run_command(command, config).await
        }
    }
}

fn handle_config(
    action: Option<ConfigAction>,
    root: &std::path::Path,
    explicit: Option<&std::path::Path>,
    cli_options: CliOptions,
) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let config = config::load_config(root, explicit, cli_options)?;
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Some(ConfigAction::Init) => {
            let path = config::init_config(&std::env::current_dir()?, None)?;
            println!("{} {}", "Created config file:".green(), path.display());
        }
    }
    Ok(())
}

async fn run_command(command: Commands, config: FabricConfig) -> anyhow::Result<()> {
    let bus = connect_bus(&config.bus_url)
        .await
        .with_context(|| format!("cannot connect to bus at {}", config.bus_url))?;

    match command {
        Commands::Manager => run_manager(bus, &config).await,
        Commands::Naming(args) => {
            let (config, identity) = resolve_agent(&NAMING, &args, config)?;
            let naming = NamingService::from_config(bus.clone(), &config, identity.name.clone());
            run_agent(bus, config, identity, naming, |_| {}).await
        }
        Commands::Struct(args) => {
            let (config, identity) = resolve_agent(&STRUCT, &args, config)?;
            let scaffolder = Arc::new(Scaffolder::new(
                bus.clone(),
                config.workspace_root.clone(),
                identity.name.clone(),
            ));
            run_agent(bus, config, identity, scaffolder, |_| {}).await
        }
        Commands::Context(args) => {
            let (config, identity) = resolve_agent(&CONTEXT, &args, config)?;
            let store = WeaviateStore::new(&config.stores.weaviate_url, config.stores.timeout())?;
            let retriever = Arc::new(ContextRetriever::new(Arc::new(store)));
            let sweeper = Arc::clone(&retriever);
            run_agent(bus, config, identity, retriever, move |cancel| {
                sweeper.spawn_sweeper(SWEEP_INTERVAL, cancel);
            })
            .await
        }
        Commands::Llm(args) => {
            let (config, identity) = resolve_agent(&LOCALLLM, &args, config)?;
            let router = Arc::new(LlmRouter::from_config(&config)?);
            run_agent(bus, config, identity, router, |_| {}).await
        }
        Commands::System(args) => {
            let (config, identity) = resolve_agent(&SYSTEM, &args, config)?;
            let shell = Arc::new(ShellOrchestrator::from_config(bus.clone(), &config, &identity.name)?);
            let background = Arc::clone(&shell);
            run_agent(bus, config, identity, shell, move |cancel| {
                background.spawn_background(cancel);
            })
            .await
        }
        Commands::Consume { sink } => run_consumer(bus, &config, sink.into()).await,
        Commands::Send {
            topic,
            action,
            params,
            client_id,
            timeout,
        } => send(bus, &topic, &action, &params, client_id, Duration::from_secs(timeout)).await,
        Commands::Version | Commands::Config { .. } => Ok(()),
    }
}

/// Apply `--name` and `--agent-config` on top of the family defaults.
fn resolve_agent(
    profile: &AgentProfile,
    args: &AgentArgs,
    mut config: FabricConfig,
) -> anyhow::Result<(Arc<FabricConfig>, AgentIdentity)> {
    let mut identity = AgentIdentity::new(profile.name, profile.agent_type, profile.topic)
        .with_capabilities(profile.capabilities.iter().copied());

    if let Some(path) = &args.agent_config {
        let agent = config::load_agent_config(path)?;
        if !agent.agent_id.is_empty() {
            identity.name = agent.agent_id;
        }
        if !agent.capabilities.is_empty() {
            identity.capabilities = agent.capabilities;
        }
        if let Some(cid) = agent.cid {
            identity = identity.with_cid(cid);
        }
        if let Some(secs) = agent.monitoring.heartbeat_interval.filter(|s| *s > 0) {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = agent.monitoring.health_check_interval.filter(|s| *s > 0) {
            config.health_interval = Duration::from_secs(secs);
        }
    }
    if let Some(name) = &args.name {
        identity.name = name.clone();
    }
    Ok((Arc::new(config), identity))
}

async fn run_agent<H: RequestHandler>(
    bus: SharedBus,
    config: Arc<FabricConfig>,
    identity: AgentIdentity,
    handler: Arc<H>,
    background: impl FnOnce(CancellationToken),
) -> anyhow::Result<()> {
    println!(
        "{} {} on {}",
        "Starting".green().bold(),
        identity.name.bright_white(),
        identity.request_channel().cyan()
    );
    let runtime = AgentRuntime::new(bus, config, identity);
    background(runtime.cancellation());
    runtime.run(handler).await?;
    Ok(())
}

async fn run_manager(bus: SharedBus, config: &FabricConfig) -> anyhow::Result<()> {
    bus.ping().await.context("bus unreachable")?;
    println!("{} registry for {}", "Starting".green().bold(), config.project.bright_white());

    let registry = Arc::new(Registry::new(bus, config.project.clone(), config.heartbeat_interval));
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });
    registry.run(cancel).await?;
    info!("Registry stopped");
    Ok(())
}

async fn run_consumer(bus: SharedBus, config: &FabricConfig, projection: Projection) -> anyhow::Result<()> {
    bus.ping().await.context("bus unreachable")?;
    let consumer = build_consumer(projection, bus, config)?;
    let settings = consumer.settings();
    println!(
        "{} {} on {} as {}",
        "Consuming".green().bold(),
        settings.group.bright_white(),
        settings.stream.cyan(),
        settings.consumer
    );

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });
    consumer.run(cancel).await?;

    let stats = consumer.stats();
    println!(
        "{} processed {}, stored {}, errors {}",
        "Stopped:".yellow(),
        stats.processed,
        stats.stored,
        stats.errors
    );
    Ok(())
}

async fn send(
    bus: SharedBus,
    topic: &str,
    action: &str,
    params: &str,
    client_id: Option<String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let params: Value = serde_json::from_str(params).context("params must be a JSON object")?;
    let mut request = Request::new(action, params);
    if let Some(client) = client_id {
        request = request.with_client(client);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(format!("waiting on agent.{}.response", topic));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let reply = request_reply(&bus, topic, &request, timeout).await;
    spinner.finish_and_clear();

    match reply? {
        Some(response) => {
            let marker = if response.success { "ok".green() } else { "error".red() };
            eprintln!("{} {}", marker.bold(), response.request_id.as_deref().unwrap_or("").dimmed());
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
            Ok(())
        }
        None => anyhow::bail!("no response on agent.{}.response within {:?}", topic, timeout),
    }
}
