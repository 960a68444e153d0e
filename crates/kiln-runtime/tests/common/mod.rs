#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use kiln_config::Parameters;
use kiln_graph::{DataType, Edge, Graph, Node, NodeSchema, ParamSpec, PortSpec};
use kiln_resource::{CpuResourceManager, ResourceManager};
use kiln_runtime::{
  Engine, NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, NodeRegistry, ParamsExt,
  Texture, Value,
};
use kurbo::Affine;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const SIZE: u32 = 8;

pub type Counter = Arc<AtomicUsize>;

pub fn count(counter: &Counter) -> usize {
  counter.load(Ordering::SeqCst)
}

fn image_out() -> PortSpec {
  PortSpec::new("image", DataType::Image)
}

fn image_in() -> PortSpec {
  PortSpec::new("image", DataType::Image)
}

fn single(port: &str, value: Value) -> NodeOutputs {
  NodeOutputs::from([(port.to_string(), value)])
}

/// Uniform gray image whose level is the `level` parameter.
pub struct Source {
  schema: NodeSchema,
  pub calls: Counter,
}

#[async_trait]
impl NodeDefinition for Source {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let level = (params.number_or("level", 0.5) * 255.0) as u8;
    let pixels = RgbaImage::from_pixel(SIZE, SIZE, Rgba([level, level, level, 255]));
    let handle = ctx.resources().create_from_pixels(&pixels)?;
    Ok(single("image", Value::Texture(Texture::new(handle))))
  }
}

/// Passes its input through with its own local transform on top.
pub struct Transform {
  schema: NodeSchema,
  pub calls: Counter,
}

#[async_trait]
impl NodeDefinition for Transform {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let input = inputs.texture("image")?;
    ctx.resources().retain(input.handle.id)?;
    let (w, h) = input.dimensions();
    let output = Texture {
      handle: input.handle,
      base_transform: input.transform,
      transform: ctx.local_transform(params, w, h) * input.transform,
    };
    Ok(single("image", Value::Texture(output)))
  }
}

/// Pointwise copy that keeps the input transform.
pub struct Tint {
  schema: NodeSchema,
  pub calls: Counter,
}

#[async_trait]
impl NodeDefinition for Tint {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let input = inputs.texture("image")?;
    let pixels = ctx.resources().download(&input.handle)?;
    let handle = ctx.resources().create_from_pixels(&pixels)?;
    Ok(single(
      "image",
      Value::Texture(Texture {
        handle,
        transform: input.transform,
        base_transform: input.transform,
      }),
    ))
  }
}

/// Requires spatial coherence. Copies its input and records what it saw.
pub struct Spatial {
  schema: NodeSchema,
  pub calls: Counter,
  pub seen: Arc<std::sync::Mutex<Vec<(Affine, RgbaImage)>>>,
}

#[async_trait]
impl NodeDefinition for Spatial {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let input = inputs.texture("image")?;
    let pixels = ctx.resources().download(&input.handle)?;
    self.seen.lock().unwrap().push((input.transform, pixels.clone()));
    let handle = ctx.resources().create_from_pixels(&pixels)?;
    Ok(single("image", Value::Texture(Texture::new(handle))))
  }
}

/// Emits a number equal to how many times it has run; the first run waits
/// on `gate`.
pub struct Gated {
  schema: NodeSchema,
  pub calls: Counter,
  pub gate: Arc<Notify>,
}

#[async_trait]
impl NodeDefinition for Gated {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    _params: &Parameters,
    _ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n == 1 {
      self.gate.notified().await;
    }
    Ok(single("value", Value::Number(n as f64)))
  }
}

/// Cancels `token` while computing, from its second run on.
pub struct Canceller {
  schema: NodeSchema,
  pub calls: Counter,
  pub token: CancellationToken,
}

#[async_trait]
impl NodeDefinition for Canceller {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
      self.token.cancel();
    }
    let input = inputs.texture("image")?;
    let pixels = ctx.resources().download(&input.handle)?;
    let handle = ctx.resources().create_from_pixels(&pixels)?;
    Ok(single("image", Value::Texture(Texture::new(handle))))
  }
}

/// Always fails.
pub struct Failing {
  schema: NodeSchema,
  pub calls: Counter,
}

#[async_trait]
impl NodeDefinition for Failing {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    _params: &Parameters,
    _ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Err(NodeError::new("boom"))
  }
}

/// Records its inputs, counts its runs in a memo, and emits `amount`.
pub struct Probe {
  schema: NodeSchema,
  pub calls: Counter,
  pub seen: Arc<std::sync::Mutex<Vec<NodeInputs>>>,
}

#[async_trait]
impl NodeDefinition for Probe {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    ctx.report_progress(0.5);
    let runs = ctx.memo("runs").and_then(|v| v.as_number()).unwrap_or(0.0) + 1.0;
    ctx.set_memo("runs", Value::Number(runs));
    self.seen.lock().unwrap().push(inputs.clone());
    Ok(single("value", Value::Number(inputs.number("amount").unwrap_or(-1.0))))
  }
}

/// Every test node type, with handles on their counters.
pub struct Harness {
  pub source: Counter,
  pub transform: Counter,
  pub tint: Counter,
  pub spatial: Counter,
  pub spatial_seen: Arc<std::sync::Mutex<Vec<(Affine, RgbaImage)>>>,
  pub gated: Counter,
  pub gate: Arc<Notify>,
  pub canceller: Counter,
  pub cancel_token: CancellationToken,
  pub failing: Counter,
  pub probe: Counter,
  pub probe_seen: Arc<std::sync::Mutex<Vec<NodeInputs>>>,
  pub resources: Arc<CpuResourceManager>,
}

impl Harness {
  pub fn new() -> Self {
    Self {
      source: Counter::default(),
      transform: Counter::default(),
      tint: Counter::default(),
      spatial: Counter::default(),
      spatial_seen: Default::default(),
      gated: Counter::default(),
      gate: Arc::new(Notify::new()),
      canceller: Counter::default(),
      cancel_token: CancellationToken::new(),
      failing: Counter::default(),
      probe: Counter::default(),
      probe_seen: Default::default(),
      resources: Arc::new(CpuResourceManager::new()),
    }
  }

  pub fn registry(&self) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(
      "source",
      Source {
        schema: NodeSchema::new()
          .output(image_out())
          .param(ParamSpec::new("level", DataType::Number, json!(0.5))),
        calls: self.source.clone(),
      },
    );
    registry.register(
      "transform",
      Transform {
        schema: NodeSchema::new()
          .input(image_in())
          .output(image_out())
          .with_local_transform(),
        calls: self.transform.clone(),
      },
    );
    registry.register(
      "tint",
      Tint {
        schema: NodeSchema::new().input(image_in()).output(image_out()),
        calls: self.tint.clone(),
      },
    );
    registry.register(
      "spatial",
      Spatial {
        schema: NodeSchema::new()
          .input(image_in())
          .output(image_out())
          .with_spatial_coherence(),
        calls: self.spatial.clone(),
        seen: self.spatial_seen.clone(),
      },
    );
    registry.register(
      "gated",
      Gated {
        schema: NodeSchema::new().output(PortSpec::new("value", DataType::Number)),
        calls: self.gated.clone(),
        gate: self.gate.clone(),
      },
    );
    registry.register(
      "canceller",
      Canceller {
        schema: NodeSchema::new().input(image_in()).output(image_out()),
        calls: self.canceller.clone(),
        token: self.cancel_token.clone(),
      },
    );
    registry.register(
      "failing",
      Failing {
        schema: NodeSchema::new().input(image_in()).output(image_out()),
        calls: self.failing.clone(),
      },
    );
    registry.register(
      "probe",
      Probe {
        schema: NodeSchema::new()
          .input(PortSpec::new("amount", DataType::Number).with_default(json!(7.0)))
          .input(PortSpec::new("image", DataType::Image).optional())
          .input(PortSpec::new("flag", DataType::Boolean).optional())
          .output(PortSpec::new("value", DataType::Number)),
        calls: self.probe.clone(),
        seen: self.probe_seen.clone(),
      },
    );
    registry
  }

  pub fn engine(&self) -> Engine {
    Engine::new(self.registry(), self.resources.clone())
  }
}

/// Build a graph from `(id, type)` nodes and `(source, target)` image edges.
pub fn chain(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Graph {
  let mut graph = Graph::new();
  for (id, node_type) in nodes {
    graph.add_node(Node::new(*id, *node_type)).unwrap();
  }
  for (source, target) in edges {
    graph
      .connect(Edge::new(
        format!("{}->{}", source, target),
        *source,
        "image",
        *target,
        "image",
      ))
      .unwrap();
  }
  graph
}

pub fn texture_of(engine: &Engine, node_id: &str) -> Texture {
  *engine
    .outputs(node_id)
    .unwrap()
    .get("image")
    .unwrap()
    .as_texture()
    .unwrap()
}

pub fn assert_affine_close(a: Affine, b: Affine) {
  for (x, y) in a.as_coeffs().iter().zip(b.as_coeffs().iter()) {
    assert!((x - y).abs() < 1e-9, "{:?} != {:?}", a, b);
  }
}
