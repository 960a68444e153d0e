//! Per-node execution: input gathering, coercion, baking, and output
//! normalization.

use std::time::Instant;

use kiln_config::Parameters;
use kiln_graph::{DataType, Node, NodeSchema, SchemaLookup};
use kiln_resource::{Color, ResourceHandle, Uniform, Uniforms};
use tracing::{debug, error, info};

use crate::cache::{release_outputs, release_value};
use crate::context::NodeContext;
use crate::definition::{NodeInputs, ParamsExt, effective_params};
use crate::engine::{Engine, Run};
use crate::error::NodeError;
use crate::events::ExecutionEvent;
use crate::state::{NodeStatus, unix_millis};
use crate::value::{NodeOutputs, Texture, Value, snapshot_outputs, value_from_json};

pub(crate) enum NodeOutcome {
  Completed,
  Failed,
  Aborted,
}

/// Inputs resolved for one execution.
struct Gathered {
  inputs: NodeInputs,
  baked: bool,
}

/// The data type a runtime value actually carries.
fn value_type(value: &Value) -> DataType {
  match value {
    Value::Number(_) => DataType::Number,
    Value::Boolean(_) => DataType::Boolean,
    Value::Color(_) => DataType::Color,
    Value::Text(_) => DataType::String,
    Value::Pixels(_) | Value::Texture(_) => DataType::Image,
  }
}

impl Engine {
  pub(crate) async fn execute_node(&self, run: &mut Run<'_>, node: &Node) -> NodeOutcome {
    let node_id = node.node_id.as_str();
    if run.cancel.is_cancelled() {
      return NodeOutcome::Aborted;
    }

    let Some(definition) = self.registry.get(&node.node_type).cloned() else {
      let message = format!("unknown node type '{}'", node.node_type);
      run.txn.evict(node_id);
      self.record_failure(run, node_id, message, None);
      return NodeOutcome::Failed;
    };
    let schema = definition.schema();
    let params = effective_params(schema, &node.parameters);

    run.txn.evict(node_id);
    self.update_state(node_id, |state| {
      state.status = NodeStatus::Running;
      state.progress = 0.0;
      state.error = None;
      state.started_at = Some(unix_millis());
      state.elapsed_ms = None;
    });
    info!(
      execution_id = %run.execution_id,
      node_id,
      node_type = %node.node_type,
      "node_started"
    );
    self.notifier.notify(ExecutionEvent::NodeStarted {
      execution_id: run.execution_id.clone(),
      node_id: node_id.to_string(),
    });
    let started = Instant::now();

    let mut temporaries = Vec::new();
    let gathered = match self.gather_inputs(run, node, schema, &params, &mut temporaries) {
      Ok(gathered) => gathered,
      Err(e) => {
        self.release_temporaries(&temporaries);
        self.record_failure(run, node_id, e.to_string(), Some(started));
        return NodeOutcome::Failed;
      }
    };

    let result = {
      let execution_id = run.execution_id.as_str();
      let progress = |p: f32| self.report_progress(execution_id, node_id, p);
      let ctx = NodeContext {
        node_id,
        execution_id,
        cancel: &run.cancel,
        resources: &self.resources,
        settings: &self.settings,
        txn: &run.txn,
        progress: &progress,
      };
      definition.execute(&gathered.inputs, &params, &ctx).await
    };
    self.release_temporaries(&temporaries);

    if run.cancel.is_cancelled() {
      if let Ok(outputs) = &result {
        release_outputs(self.resources.as_ref(), outputs);
      }
      self.update_state(node_id, |state| state.reset());
      debug!(execution_id = %run.execution_id, node_id, "node_result_discarded");
      return NodeOutcome::Aborted;
    }

    let outputs = match result.and_then(|outputs| self.normalize_outputs(schema, outputs)) {
      Ok(outputs) => outputs,
      Err(e) => {
        self.record_failure(run, node_id, e.to_string(), Some(started));
        return NodeOutcome::Failed;
      }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let snapshot = snapshot_outputs(&outputs);
    run.txn.stage(node_id, outputs);
    self.update_state(node_id, |state| {
      state.status = NodeStatus::Complete;
      state.progress = 1.0;
      state.elapsed_ms = Some(elapsed_ms);
      state.last_params = Some(params.clone());
      state.baked = gathered.baked;
      state.last_outputs = Some(snapshot.clone());
    });
    if gathered.baked {
      run.report.baked.push(node_id.to_string());
    }
    info!(
      execution_id = %run.execution_id,
      node_id,
      elapsed_ms,
      baked = gathered.baked,
      "node_completed"
    );
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      execution_id: run.execution_id.clone(),
      node_id: node_id.to_string(),
      outputs: snapshot,
    });
    NodeOutcome::Completed
  }

  fn record_failure(&self, run: &Run<'_>, node_id: &str, message: String, started: Option<Instant>) {
    let elapsed_ms = started.map(|s| s.elapsed().as_millis() as u64);
    self.update_state(node_id, |state| {
      state.status = NodeStatus::Error;
      state.error = Some(message.clone());
      state.elapsed_ms = elapsed_ms;
      state.last_params = None;
      state.last_outputs = None;
    });
    error!(execution_id = %run.execution_id, node_id, error = %message, "node_failed");
    self.notifier.notify(ExecutionEvent::NodeFailed {
      execution_id: run.execution_id.clone(),
      node_id: node_id.to_string(),
      error: message,
    });
  }

  fn report_progress(&self, execution_id: &str, node_id: &str, progress: f32) {
    self.update_state(node_id, |state| state.progress = progress);
    self.notifier.notify(ExecutionEvent::NodeProgress {
      execution_id: execution_id.to_string(),
      node_id: node_id.to_string(),
      progress,
    });
  }

  /// Resolve every declared input port. Handles created for coercion or
  /// baking are pushed to `temporaries` as soon as they exist.
  fn gather_inputs(
    &self,
    run: &Run<'_>,
    node: &Node,
    schema: &NodeSchema,
    params: &Parameters,
    temporaries: &mut Vec<ResourceHandle>,
  ) -> Result<Gathered, NodeError> {
    let mut inputs = NodeInputs::new();
    let mut first_image: Option<(u32, u32)> = None;
    let mut baked = false;

    for port in &schema.inputs {
      let mut resolved = None;
      if let Some(edge) = run.graph.incoming_edge(&node.node_id, &port.id) {
        let from_type = run
          .graph
          .node(&edge.source)
          .and_then(|source| self.registry.schema(&source.node_type))
          .and_then(|s| s.output_port(&edge.source_port))
          .map(|p| p.data_type)
          .unwrap_or(DataType::Any);
        resolved = run
          .txn
          .get_output(&edge.source, &edge.source_port)
          .map(|value| (value, from_type));
      }
      if resolved.is_none() {
        resolved = port
          .default
          .as_ref()
          .and_then(|default| value_from_json(port.data_type, default))
          .map(|value| (value, port.data_type));
      }
      let Some((value, from_type)) = resolved else {
        if port.required {
          return Err(NodeError::new(format!("required input '{}' has no value", port.id)));
        }
        continue;
      };

      let mut value = if from_type.needs_coercion(port.data_type) {
        self.coerce(value, port.data_type, first_image, temporaries)?
      } else {
        value
      };

      if schema.requires_spatial_coherence {
        if let Value::Texture(texture) = &value {
          if texture.has_pending_transform() {
            value = Value::Texture(self.bake(texture, params, temporaries)?);
            baked = true;
          }
        }
      }

      if first_image.is_none() {
        first_image = value.image_dimensions();
      }
      inputs.insert(port.id.clone(), value);
    }

    Ok(Gathered { inputs, baked })
  }

  fn coerce(
    &self,
    value: Value,
    target: DataType,
    first_image: Option<(u32, u32)>,
    temporaries: &mut Vec<ResourceHandle>,
  ) -> Result<Value, NodeError> {
    let actual = value_type(&value);
    if actual == target || (actual.is_image_like() && target.is_image_like()) || target == DataType::Any {
      return Ok(value);
    }

    let size = first_image.unwrap_or((self.settings.coercion_width, self.settings.coercion_height));
    match (target, value) {
      (DataType::Image | DataType::Mask, Value::Number(v)) => {
        self.uniform_texture(Color::gray(v as f32), size, temporaries)
      }
      (DataType::Image | DataType::Mask, Value::Color(c)) => self.uniform_texture(c, size, temporaries),
      (DataType::Number, Value::Boolean(b)) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
      (DataType::Number, Value::Color(c)) => Ok(Value::Number(c.luminance() as f64)),
      (DataType::Boolean, Value::Number(v)) => Ok(Value::Boolean(v != 0.0)),
      (DataType::Color, Value::Number(v)) => Ok(Value::Color(Color::gray(v as f32))),
      (target, value) => Err(NodeError::new(format!(
        "cannot coerce {} to {}",
        value_type(&value),
        target
      ))),
    }
  }

  fn uniform_texture(
    &self,
    color: Color,
    (width, height): (u32, u32),
    temporaries: &mut Vec<ResourceHandle>,
  ) -> Result<Value, NodeError> {
    let handle = self.resources.create_empty(width, height)?;
    temporaries.push(handle);
    let uniforms = Uniforms::from([("color".to_string(), Uniform::Color(color))]);
    self.resources.render_using_program("fill", &uniforms, &handle)?;
    Ok(Value::Texture(Texture::new(handle)))
  }

  /// Resample `texture` through its pending transform into a new temporary
  /// texture of the same size.
  fn bake(
    &self,
    texture: &Texture,
    params: &Parameters,
    temporaries: &mut Vec<ResourceHandle>,
  ) -> Result<Texture, NodeError> {
    let fill = params
      .color("fill_color")
      .or_else(|| self.settings.canvas_fill.map(Color::from_array))
      .unwrap_or(Color::TRANSPARENT);

    let (width, height) = texture.dimensions();
    let handle = self.resources.create_empty(width, height)?;
    temporaries.push(handle);
    let uniforms = Uniforms::from([
      ("source".to_string(), Uniform::Texture(texture.handle.id)),
      ("matrix".to_string(), Uniform::Matrix(texture.transform.as_coeffs())),
      ("fill".to_string(), Uniform::Color(fill)),
    ]);
    self
      .resources
      .render_using_program("affine_resample", &uniforms, &handle)?;
    debug!(source = texture.handle.id, baked = handle.id, "input_baked");
    Ok(Texture::new(handle))
  }

  /// Local-transform nodes always cache textures, so the fast path has a
  /// transform to rewrite.
  fn normalize_outputs(&self, schema: &NodeSchema, outputs: NodeOutputs) -> Result<NodeOutputs, NodeError> {
    if !schema.has_local_transform {
      return Ok(outputs);
    }

    let mut normalized = NodeOutputs::new();
    let mut failure = None;
    for (port, value) in outputs {
      match value {
        Value::Pixels(pixels) if failure.is_none() => match self.resources.create_from_pixels(&pixels) {
          Ok(handle) => {
            normalized.insert(port, Value::Texture(Texture::new(handle)));
          }
          Err(e) => failure = Some(e),
        },
        other => {
          normalized.insert(port, other);
        }
      }
    }

    match failure {
      Some(e) => {
        release_outputs(self.resources.as_ref(), &normalized);
        Err(e.into())
      }
      None => Ok(normalized),
    }
  }

  fn release_temporaries(&self, temporaries: &[ResourceHandle]) {
    for handle in temporaries {
      release_value(self.resources.as_ref(), &Value::Texture(Texture::new(*handle)));
    }
  }
}
