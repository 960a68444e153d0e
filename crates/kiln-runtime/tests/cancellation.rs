mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, chain, count};
use kiln_graph::{Graph, Node};
use kiln_resource::ResourceManager;
use kiln_runtime::{RunOutcome, Value};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
  let h = Harness::new();
  let engine = h.engine();
  let graph = chain(&[("a", "source"), ("b", "tint")], &[("a", "b")]);

  let cancel = CancellationToken::new();
  cancel.cancel();
  let outcome = engine.run_full(&graph, cancel).await.unwrap();

  assert!(outcome.is_aborted());
  assert_eq!(count(&h.source), 0);
  assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_abort_mid_run_leaves_cache_untouched() {
  let h = Harness::new();
  let engine = h.engine();
  let graph = chain(
    &[("a", "source"), ("k", "canceller"), ("c", "tint")],
    &[("a", "k"), ("k", "c")],
  );
  engine.run_full(&graph, CancellationToken::new()).await.unwrap();

  let ids = engine.cache().node_ids();
  let before: Vec<_> = ids.iter().map(|id| engine.outputs(id).unwrap()).collect();
  let pixels_before: Vec<_> = before
    .iter()
    .map(|outputs| {
      let texture = outputs["image"].as_texture().unwrap();
      h.resources.download(&texture.handle).unwrap()
    })
    .collect();
  let live_before = h.resources.stats().live;

  let outcome = engine
    .run_partial(&graph, ["a"], h.cancel_token.clone())
    .await
    .unwrap();

  assert!(outcome.is_aborted());
  assert_eq!(count(&h.source), 2);
  assert_eq!(count(&h.canceller), 2);
  assert_eq!(count(&h.tint), 1);

  assert_eq!(engine.cache().node_ids(), ids);
  for (i, id) in ids.iter().enumerate() {
    let outputs = engine.outputs(id).unwrap();
    assert_eq!(outputs, before[i]);
    let texture = outputs["image"].as_texture().unwrap();
    assert_eq!(h.resources.download(&texture.handle).unwrap(), pixels_before[i]);
  }
  assert_eq!(h.resources.stats().live, live_before);

  // Entries the aborted run had invalidated are recomputed next time.
  assert_eq!(engine.stale_nodes().len(), 3);
  let outcome = engine.run_full(&graph, CancellationToken::new()).await.unwrap();
  let report = outcome.report().unwrap();
  assert_eq!(report.executed, vec!["a", "k", "c"]);
  assert!(engine.stale_nodes().is_empty());
}

#[tokio::test]
async fn test_superseded_lazy_run_never_writes_cache() {
  let h = Harness::new();
  let engine = Arc::new(h.engine());
  let mut graph = Graph::new();
  graph.add_node(Node::new("d", "gated")).unwrap();
  let graph = Arc::new(graph);

  let first = {
    let engine = engine.clone();
    let graph = graph.clone();
    tokio::spawn(async move { engine.execute_node_lazy(&graph, "d").await })
  };
  while count(&h.gated) == 0 {
    tokio::time::sleep(Duration::from_millis(5)).await;
  }

  let second = {
    let engine = engine.clone();
    let graph = graph.clone();
    tokio::spawn(async move { engine.execute_node_lazy(&graph, "d").await })
  };
  tokio::time::sleep(Duration::from_millis(50)).await;
  h.gate.notify_one();

  let first = first.await.unwrap().unwrap();
  let second = second.await.unwrap().unwrap();

  assert!(first.is_aborted());
  assert!(matches!(second, RunOutcome::Completed(_)));
  assert_eq!(count(&h.gated), 2);
  let outputs = engine.outputs("d").unwrap();
  assert_eq!(outputs.get("value"), Some(&Value::Number(2.0)));
}
