mod common;

use common::{Harness, chain};
use kiln_graph::{Edge, Node};
use kiln_runtime::RuntimeError;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_handles_balance_across_run_kinds() {
  let h = Harness::new();
  let engine = h.engine();
  let mut graph = chain(
    &[
      ("a", "source"),
      ("b", "transform"),
      ("s", "spatial"),
      ("c", "tint"),
      ("f", "failing"),
    ],
    &[("a", "b"), ("b", "s"), ("s", "c"), ("a", "f")],
  );
  graph.add_node(Node::new("p", "probe")).unwrap();
  graph.add_node(Node::new("t2", "tint")).unwrap();
  graph.connect(Edge::new("e-p", "p", "value", "t2", "image")).unwrap();
  graph.set_parameter("b", "rotation", json!(15.0)).unwrap();

  engine.run_full(&graph, CancellationToken::new()).await.unwrap();
  graph.set_parameter("b", "rotation", json!(45.0)).unwrap();
  engine.execute_node_lazy(&graph, "b").await.unwrap();
  engine.run_full(&graph, CancellationToken::new()).await.unwrap();
  graph.set_parameter("a", "level", json!(0.25)).unwrap();
  engine.run_partial(&graph, ["a"], CancellationToken::new()).await.unwrap();
  engine.execute_node_lazy(&graph, "c").await.unwrap();

  engine.clear_cache().await;
  let stats = h.resources.stats();
  assert_eq!(stats.live, 0);
  assert_eq!(stats.created, stats.freed);

  engine.dispose().await.unwrap();
  assert!(h.resources.is_disposed());
  assert_eq!(h.resources.stats().leaked, 0);
}

#[tokio::test]
async fn test_dispose_releases_cache_before_context() {
  let h = Harness::new();
  let engine = h.engine();
  let graph = chain(&[("a", "source"), ("b", "transform"), ("c", "tint")], &[("a", "b"), ("b", "c")]);
  engine.run_full(&graph, CancellationToken::new()).await.unwrap();
  assert_eq!(h.resources.stats().live, 2);

  engine.dispose().await.unwrap();

  let stats = h.resources.stats();
  assert_eq!(stats.leaked, 0);
  assert_eq!(stats.created, stats.freed);
  assert!(engine.cache().is_empty());

  let err = engine
    .run_full(&graph, CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::Disposed));
  engine.dispose().await.unwrap();
}
