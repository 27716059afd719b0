use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowsim_bridge::{
  BridgeClient, BridgeConfig, BridgeServer, ClientConfig, Hub, LocalFanout, ServerMessage, WireId,
};
use flowsim_engine::{
  ChannelNotifier, Decisions, Engine, EngineConfig, FailNodes, OperandPolicy, RunOutcome,
  ScriptedPolicy,
};
use flowsim_store::{
  FEATURED_LIMIT, NewWorkflow, PUBLIC_LIMIT, SqliteStore, StoredWorkflow, WorkflowStore,
};
use flowsim_workflow::{Node, Workflow};

/// flowsim - simulate workflow runs and stream them to observers
#[derive(Parser)]
#[command(name = "flowsim")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.flowsim)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Settings file (default: <data dir>/flowsim.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
  log_format: LogFormat,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
  Text,
  Json,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow file locally, printing events as JSON lines
  Run {
    /// Workflow JSON (an object with `nodes`, or a bare node array); `-` reads stdin
    workflow_file: PathBuf,

    /// Seed every random decision so the run can be replayed
    #[arg(long)]
    seed: Option<u64>,

    /// Fail this node (repeatable). Disables random failures.
    #[arg(long = "fail", value_name = "NODE")]
    fail: Vec<String>,

    /// Force a condition's branch, e.g. `check=false` (repeatable).
    /// Conditions not named take the true branch.
    #[arg(long = "branch", value_name = "NODE=BOOL", value_parser = parse_branch)]
    branch: Vec<(String, bool)>,

    /// Override the random failure rate (0.0 to 1.0)
    #[arg(long, value_parser = parse_rate)]
    failure_rate: Option<f64>,
  },

  /// Serve the websocket bridge
  Serve {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Seed the server's engine decisions
    #[arg(long)]
    seed: Option<u64>,
  },

  /// Subscribe to a workflow on a bridge and print what arrives
  Watch {
    /// Websocket URL, e.g. ws://127.0.0.1:8080/ws
    url: String,

    workflow_id: String,

    /// Authenticate as this user after connecting
    #[arg(long)]
    user: Option<String>,
  },

  /// Manage stored workflow definitions
  Workflows {
    #[command(subcommand)]
    action: WorkflowsAction,
  },
}

#[derive(Subcommand)]
enum WorkflowsAction {
  /// Store a workflow file
  Save {
    workflow_file: PathBuf,

    #[arg(long)]
    owner: i64,

    #[arg(long)]
    public: bool,

    #[arg(long)]
    featured: bool,
  },

  /// List definitions (all of an owner's, or the public/featured listing)
  List {
    #[arg(long, conflicts_with_all = ["public", "featured"])]
    owner: Option<i64>,

    #[arg(long)]
    public: bool,

    #[arg(long)]
    featured: bool,
  },

  /// Print one definition
  Show { id: i64 },

  Delete { id: i64 },
}

/// Contents of the settings file. Every section is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
  engine: EngineConfig,
  bridge: BridgeConfig,
  client: ClientConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkflowFile {
  Nodes(Vec<Node>),
  Workflow(Workflow),
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.log_format);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".flowsim"),
  };
  let settings = load_settings(cli.config.as_deref(), &data_dir)?;

  let Some(command) = cli.command else {
    println!("flowsim - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run {
        workflow_file,
        seed,
        fail,
        branch,
        failure_rate,
      } => {
        let mut engine = settings.engine;
        if let Some(rate) = failure_rate {
          engine = engine.with_failure_rate(rate);
        }
        let decisions = build_decisions(&engine, seed, fail, branch);
        run_workflow(workflow_file, engine, decisions).await
      }
      Commands::Serve { host, port, seed } => serve(settings, host, port, seed).await,
      Commands::Watch {
        url,
        workflow_id,
        user,
      } => watch(settings.client, url, workflow_id, user).await,
      Commands::Workflows { action } => workflows(&data_dir, action).await,
    }
  })
}

fn init_logging(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr);
  match format {
    LogFormat::Text => builder.init(),
    LogFormat::Json => builder.json().init(),
  }
}

fn load_settings(explicit: Option<&Path>, data_dir: &Path) -> Result<Settings> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let default = data_dir.join("flowsim.json");
      if !default.exists() {
        return Ok(Settings::default());
      }
      default
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read settings file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse settings file: {}", path.display()))
}

fn parse_branch(raw: &str) -> Result<(String, bool), String> {
  let (node, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NODE=true|false, got '{raw}'"))?;
  let take_true = value
    .parse::<bool>()
    .map_err(|_| format!("expected true or false after '=', got '{value}'"))?;
  Ok((node.to_string(), take_true))
}

fn parse_rate(raw: &str) -> Result<f64, String> {
  let rate = raw
    .parse::<f64>()
    .map_err(|_| format!("expected a number, got '{raw}'"))?;
  if (0.0..=1.0).contains(&rate) {
    Ok(rate)
  } else {
    Err(format!("rate must be between 0.0 and 1.0, got '{raw}'"))
  }
}

fn build_decisions(
  config: &EngineConfig,
  seed: Option<u64>,
  fail: Vec<String>,
  branch: Vec<(String, bool)>,
) -> Decisions {
  let mut decisions = match seed {
    Some(seed) => Decisions::seeded(config.failure_rate, seed),
    None => Decisions::random(config.failure_rate),
  };
  if !fail.is_empty() {
    decisions = decisions.with_failures(FailNodes::new(fail));
  }
  if !branch.is_empty() {
    let scripted = branch
      .into_iter()
      .fold(ScriptedPolicy::new(true), |policy, (node, take_true)| {
        policy.with(node, take_true)
      });
    decisions = decisions.with_conditions(OperandPolicy::new(scripted));
  }
  decisions
}

fn read_workflow(workflow_file: &Path) -> Result<Workflow> {
  let content = if workflow_file == Path::new("-") {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read workflow from stdin")?;
    input
  } else {
    std::fs::read_to_string(workflow_file)
      .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?
  };

  let parsed: WorkflowFile = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let workflow = match parsed {
    WorkflowFile::Nodes(nodes) => {
      let name = workflow_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string());
      Workflow::from_nodes(name.clone(), name, nodes)?
    }
    WorkflowFile::Workflow(parsed) => {
      let mut workflow = Workflow::from_nodes(
        parsed.workflow_id.clone(),
        parsed.name.clone(),
        parsed.nodes().to_vec(),
      )?;
      workflow.description = parsed.description;
      workflow
    }
  };
  Ok(workflow)
}

async fn run_workflow(
  workflow_file: PathBuf,
  config: EngineConfig,
  decisions: Decisions,
) -> Result<()> {
  let workflow = read_workflow(&workflow_file)?;
  eprintln!("Loaded workflow: {} ({} nodes)", workflow.name, workflow.len());

  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = Engine::with_notifier(config, ChannelNotifier::new(tx)).with_decisions(decisions);

  let handle = match engine.run(&workflow) {
    Ok(handle) => handle,
    Err(err) => {
      while let Ok(event) = rx.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
      }
      return Err(err).context("workflow refused");
    }
  };

  let cancel = handle.cancellation_token();
  let wait = handle.wait();
  tokio::pin!(wait);

  let report = loop {
    tokio::select! {
      Some(event) = rx.recv() => println!("{}", serde_json::to_string(&event)?),
      _ = tokio::signal::ctrl_c() => {
        eprintln!("Cancelling...");
        cancel.cancel();
      }
      report = &mut wait => break report.context("workflow run was lost")?,
    }
  };
  while let Ok(event) = rx.try_recv() {
    println!("{}", serde_json::to_string(&event)?);
  }

  let run = &report.run;
  eprintln!(
    "Run {} {}: {} node results, {} skipped",
    run.run_id,
    run.outcome(),
    run.node_results.len(),
    run.skipped.len()
  );

  match run.outcome() {
    RunOutcome::Failed => bail!(
      "workflow failed at node '{}'",
      run.failed_node.as_deref().unwrap_or_default()
    ),
    _ => Ok(()),
  }
}

async fn serve(
  settings: Settings,
  host: Option<String>,
  port: Option<u16>,
  seed: Option<u64>,
) -> Result<()> {
  let mut bridge = settings.bridge;
  if let Some(host) = host {
    bridge = bridge.with_host(&host);
  }
  if let Some(port) = port {
    bridge = bridge.with_port(port);
  }

  let fanout = Arc::new(LocalFanout::new(bridge.fanout_capacity));
  let failure_rate = settings.engine.failure_rate;
  let mut hub = Hub::new(bridge, settings.engine, fanout);
  if let Some(seed) = seed {
    hub = hub.with_decisions(Decisions::seeded(failure_rate, seed));
  }

  let server = BridgeServer::new(hub);
  let listener = server.bind().await.context("failed to start bridge")?;

  let shutdown = CancellationToken::new();
  let trigger = shutdown.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutting down");
      trigger.cancel();
    }
  });

  server
    .serve_with_shutdown(listener, shutdown)
    .await
    .context("bridge server failed")
}

async fn watch(
  client: ClientConfig,
  url: String,
  workflow_id: String,
  user: Option<String>,
) -> Result<()> {
  let workflow_id = match workflow_id.parse::<i64>() {
    Ok(n) => WireId::Int(n),
    Err(_) => WireId::Str(workflow_id),
  };
  let mut client = BridgeClient::connect(ClientConfig { url, ..client });

  loop {
    tokio::select! {
      msg = client.recv() => {
        let Some(msg) = msg else { break };
        // Every (re)connect starts with a welcome; subscriptions do not survive it.
        if matches!(msg, ServerMessage::Connection { .. }) {
          if let Some(user) = &user {
            client.authenticate(user.as_str());
          }
          client.subscribe(workflow_id.clone());
        }
        println!("{}", serde_json::to_string(&msg)?);
      }
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  client.close().await;
  Ok(())
}

async fn workflows(data_dir: &Path, action: WorkflowsAction) -> Result<()> {
  std::fs::create_dir_all(data_dir)
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let store = SqliteStore::open(data_dir.join("flowsim.db"))
    .await
    .context("failed to open workflow store")?;

  match action {
    WorkflowsAction::Save {
      workflow_file,
      owner,
      public,
      featured,
    } => {
      let workflow = read_workflow(&workflow_file)?;
      let new = NewWorkflow {
        owner_id: owner,
        name: workflow.name.clone(),
        description: Some(workflow.description.clone()).filter(|d| !d.is_empty()),
        nodes: workflow.nodes().to_vec(),
        is_public: public,
        is_featured: featured,
      };
      let stored = store.create(new).await?;
      eprintln!("Stored workflow {} as id {}", stored.name, stored.id);
      print_summaries(&[stored]);
    }
    WorkflowsAction::List {
      owner,
      public,
      featured,
    } => {
      let rows = match owner {
        Some(owner) => store.list_by_owner(owner).await?,
        None if featured => store.list_featured(FEATURED_LIMIT).await?,
        None if public => store.list_public(PUBLIC_LIMIT).await?,
        None => bail!("pass --owner, --public or --featured"),
      };
      print_summaries(&rows);
    }
    WorkflowsAction::Show { id } => {
      let stored = store
        .get(id)
        .await?
        .with_context(|| format!("workflow {id} not found"))?;
      println!("{}", serde_json::to_string_pretty(&stored)?);
    }
    WorkflowsAction::Delete { id } => {
      if !store.delete(id).await? {
        bail!("workflow {id} not found");
      }
      eprintln!("Deleted workflow {id}");
    }
  }
  Ok(())
}

fn print_summaries(rows: &[StoredWorkflow]) {
  for row in rows {
    let summary = serde_json::json!({
      "id": row.id,
      "ownerId": row.owner_id,
      "name": row.name,
      "nodes": row.nodes.0.len(),
      "complexityScore": row.complexity_score,
      "isPublic": row.is_public,
      "isFeatured": row.is_featured,
      "updatedAt": row.updated_at,
    });
    println!("{summary}");
  }
}
