use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kiln_config::{EngineSettings, GraphDef};
use kiln_graph::{Graph, validate};
use kiln_resource::{CpuResourceManager, ResourceManager};
use kiln_runtime::{Engine, RunOutcome, Value};

/// Kiln - a node graph image processing engine
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Engine settings file (default: <config dir>/kiln/settings.json)
  #[arg(long, global = true)]
  settings: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a graph and print the report
  Validate {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,
  },

  /// Run every node of a graph
  Run {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,

    /// Directory to write image outputs into as PNG
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Run the ancestors of a node, then the node itself
  RunNode {
    /// Path to the graph file (JSON)
    graph_file: PathBuf,

    /// The node ID to execute
    #[arg(long)]
    node: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let Some(command) = cli.command else {
    println!("kiln - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async move {
    match command {
      Commands::Validate { graph_file } => validate_graph(&graph_file),
      Commands::Run { graph_file, out } => run_graph(&graph_file, cli.settings, out).await,
      Commands::RunNode { graph_file, node } => run_node(&graph_file, cli.settings, &node).await,
    }
  })
}

/// `RUST_LOG` directives when present and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
  directives
    .and_then(|d| EnvFilter::try_new(d).ok())
    .unwrap_or_else(|| EnvFilter::new("info"))
}

fn load_graph(path: &Path) -> Result<GraphDef> {
  GraphDef::load(path).with_context(|| format!("failed to load graph: {}", path.display()))
}

/// Settings precedence: `--settings`, then the graph document, then the
/// user config file, then built-in defaults.
fn resolve_settings(explicit: Option<PathBuf>, def: &GraphDef) -> Result<EngineSettings> {
  if let Some(path) = explicit {
    return EngineSettings::load(&path)
      .with_context(|| format!("failed to load settings: {}", path.display()));
  }
  if let Some(settings) = &def.settings {
    return Ok(settings.clone());
  }
  if let Some(path) = dirs::config_dir().map(|dir| dir.join("kiln").join("settings.json")) {
    if path.exists() {
      return EngineSettings::load(&path)
        .with_context(|| format!("failed to load settings: {}", path.display()));
    }
  }
  Ok(EngineSettings::default())
}

fn build_engine(settings: EngineSettings) -> Engine {
  let resources: Arc<dyn ResourceManager> = Arc::new(CpuResourceManager::new());
  Engine::new(kiln_nodes::registry(), resources).with_settings(settings)
}

fn validate_graph(graph_file: &Path) -> Result<()> {
  let def = load_graph(graph_file)?;
  let graph = Graph::from_def(&def);
  let registry = kiln_nodes::registry();
  let report = validate(&graph, &registry);

  println!("{}", serde_json::to_string_pretty(&report)?);
  if !report.is_valid() {
    bail!("graph '{}' is invalid", def.name);
  }
  Ok(())
}

async fn run_graph(graph_file: &Path, settings: Option<PathBuf>, out: Option<PathBuf>) -> Result<()> {
  let def = load_graph(graph_file)?;
  let engine = build_engine(resolve_settings(settings, &def)?);
  let graph = Graph::from_def(&def);
  eprintln!("Loaded graph: {} ({} nodes)", def.name, graph.node_count());

  let outcome = engine
    .run_full(&graph, CancellationToken::new())
    .await
    .context("graph execution failed")?;
  let RunOutcome::Completed(report) = outcome else {
    bail!("graph execution was aborted");
  };
  eprintln!(
    "Execution completed: {} ({} executed, {} failed, {} ms)",
    report.execution_id,
    report.executed.len(),
    report.failed.len(),
    report.elapsed_ms
  );

  if let Some(dir) = out {
    write_images(&engine, &graph, &dir).await?;
  }
  println!("{}", serde_json::to_string_pretty(&engine.node_states())?);

  engine.dispose().await.context("failed to release resources")?;
  if !report.failed.is_empty() {
    bail!("{} node(s) failed", report.failed.len());
  }
  Ok(())
}

async fn run_node(graph_file: &Path, settings: Option<PathBuf>, node_id: &str) -> Result<()> {
  let def = load_graph(graph_file)?;
  let engine = build_engine(resolve_settings(settings, &def)?);
  let graph = Graph::from_def(&def);
  if !graph.contains_node(node_id) {
    bail!("node '{}' not found in graph", node_id);
  }

  let ancestors = ancestor_graph(&graph, node_id);
  if ancestors.node_count() > 0 {
    engine
      .run_full(&ancestors, CancellationToken::new())
      .await
      .context("failed to run upstream nodes")?;
  }

  let outcome = engine
    .execute_node_lazy(&graph, node_id)
    .await
    .context("node execution failed")?;
  if outcome.is_aborted() {
    bail!("node execution was aborted");
  }

  let state = engine.node_state(node_id);
  let output = serde_json::json!({
    "node_id": node_id,
    "status": state.status,
    "error": state.error,
    "outputs": state.last_outputs,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  engine.dispose().await.context("failed to release resources")?;
  Ok(())
}

/// The subgraph made of every ancestor of `node_id` and the edges between
/// them.
fn ancestor_graph(graph: &Graph, node_id: &str) -> Graph {
  let ancestors = graph.reachable_upstream(node_id);
  let mut subgraph = Graph::new();
  for node in graph.nodes().filter(|n| ancestors.contains(&n.node_id)) {
    // Ids come from a graph that already holds them uniquely.
    let _ = subgraph.add_node(node.clone());
  }
  for edge in graph
    .edges()
    .filter(|e| ancestors.contains(&e.source) && ancestors.contains(&e.target))
  {
    let _ = subgraph.connect(edge.clone());
  }
  subgraph
}

/// Write every image output as `<node>_<port>.png`. Pending transforms are
/// not applied; the stored pixels are written as they are.
async fn write_images(engine: &Engine, graph: &Graph, dir: &Path) -> Result<()> {
  tokio::fs::create_dir_all(dir)
    .await
    .with_context(|| format!("failed to create output directory: {}", dir.display()))?;

  for node in graph.nodes() {
    let Some(outputs) = engine.outputs(&node.node_id) else {
      continue;
    };
    for (port, value) in outputs {
      let pixels = match value {
        Value::Texture(texture) => engine
          .resources()
          .download(&texture.handle)
          .with_context(|| format!("failed to download {}.{}", node.node_id, port))?,
        Value::Pixels(pixels) => pixels,
        _ => continue,
      };
      let path = dir.join(format!("{}_{}.png", node.node_id, port));
      pixels
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
      eprintln!("Wrote {}", path.display());
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use kiln_graph::{Edge, Node};

  #[test]
  fn test_log_filter_defaults_to_info() {
    assert_eq!(log_filter(None).to_string(), "info");
    assert_eq!(log_filter(Some("kiln_runtime=debug")).to_string(), "kiln_runtime=debug");
  }

  #[test]
  fn test_ancestor_graph_keeps_only_upstream() {
    let mut graph = Graph::new();
    for (id, node_type) in [("a", "solid"), ("b", "blur"), ("c", "blur"), ("d", "solid")] {
      graph.add_node(Node::new(id, node_type)).unwrap();
    }
    graph.connect(Edge::new("e1", "a", "image", "b", "image")).unwrap();
    graph.connect(Edge::new("e2", "b", "image", "c", "image")).unwrap();

    let ancestors = ancestor_graph(&graph, "c");
    let mut ids: Vec<_> = ancestors.nodes().map(|n| n.node_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(ancestors.edges().count(), 1);
  }

  #[test]
  fn test_explicit_settings_win_over_graph_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"coercion_width": 64, "coercion_height": 32}"#).unwrap();

    let def = GraphDef::from_json(r#"{"name": "g", "settings": {"coercion_width": 8}}"#).unwrap();
    let settings = resolve_settings(Some(path), &def).unwrap();
    assert_eq!((settings.coercion_width, settings.coercion_height), (64, 32));

    let settings = resolve_settings(None, &def).unwrap();
    assert_eq!(settings.coercion_width, 8);
  }
}
