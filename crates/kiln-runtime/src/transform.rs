//! Local transforms of pivot-relative nodes.

use kiln_config::Parameters;
use kurbo::Affine;

use crate::value::{NodeOutputs, Value};

/// Parameters that only affect a node's local transform.
pub const TRANSFORM_PARAMS: [&str; 9] = [
  "pivot_x",
  "pivot_y",
  "scale_x",
  "scale_y",
  "rotation",
  "translate_x",
  "translate_y",
  "skew_x",
  "skew_y",
];

fn param(params: &Parameters, key: &str, default: f64) -> f64 {
  params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// The transform a node contributes on top of its inherited base.
///
/// `T(translate) * T(pivot) * Skew * R(rotation) * S(scale) * T(-pivot)`,
/// where the pivot is given in normalized coordinates of a `width x height`
/// image and `rotation`, `skew_x`, `skew_y` are in degrees.
pub fn local_transform(params: &Parameters, width: u32, height: u32, default_pivot: [f64; 2]) -> Affine {
  let pivot_x = param(params, "pivot_x", default_pivot[0]) * width as f64;
  let pivot_y = param(params, "pivot_y", default_pivot[1]) * height as f64;

  let t_translate = Affine::translate((
    param(params, "translate_x", 0.0),
    param(params, "translate_y", 0.0),
  ));
  let t_pivot = Affine::translate((pivot_x, pivot_y));
  let t_unpivot = Affine::translate((-pivot_x, -pivot_y));
  let t_rotate = Affine::rotate(param(params, "rotation", 0.0).to_radians());
  let t_scale = Affine::scale_non_uniform(param(params, "scale_x", 1.0), param(params, "scale_y", 1.0));

  let skew_x = param(params, "skew_x", 0.0).to_radians().tan();
  let skew_y = param(params, "skew_y", 0.0).to_radians().tan();
  // x' = x + skew_x * y
  let shear_x = Affine::new([1.0, 0.0, skew_x, 1.0, 0.0, 0.0]);
  // y' = y + skew_y * x
  let shear_y = Affine::new([1.0, skew_y, 0.0, 1.0, 0.0, 0.0]);

  t_translate * t_pivot * (shear_y * shear_x) * t_rotate * t_scale * t_unpivot
}

/// Whether every parameter that differs between `previous` and `current` is
/// a transform parameter.
pub fn is_transform_only_edit(previous: &Parameters, current: &Parameters) -> bool {
  let keys = previous.keys().chain(current.keys());
  for key in keys {
    if previous.get(key) != current.get(key) && !TRANSFORM_PARAMS.contains(&key.as_str()) {
      return false;
    }
  }
  true
}

/// Recompose every texture output of a local-transform node in place.
///
/// This is the only code path allowed to mutate a cached output. Pixels and
/// handles are untouched; only `transform` is rewritten from the current
/// parameters and the recorded `base_transform`. Returns how many outputs
/// were updated.
pub(crate) fn recompose_in_place(
  outputs: &mut NodeOutputs,
  params: &Parameters,
  default_pivot: [f64; 2],
) -> usize {
  let mut updated = 0;
  for value in outputs.values_mut() {
    if let Value::Texture(texture) = value {
      let (w, h) = texture.dimensions();
      texture.transform = local_transform(params, w, h, default_pivot) * texture.base_transform;
      updated += 1;
    }
  }
  updated
}

/// Rebase every texture output onto `inherited`, adding the node's own
/// local transform when it has one.
pub(crate) fn rebase_in_place(
  outputs: &mut NodeOutputs,
  inherited: Affine,
  local: Option<(&Parameters, [f64; 2])>,
) {
  for value in outputs.values_mut() {
    if let Value::Texture(texture) = value {
      texture.base_transform = inherited;
      texture.transform = match local {
        Some((params, pivot)) => {
          let (w, h) = texture.dimensions();
          local_transform(params, w, h, pivot) * inherited
        }
        None => inherited,
      };
    }
  }
}

#[cfg(test)]
mod tests {
  use kiln_resource::ResourceHandle;
  use kurbo::Point;
  use serde_json::json;

  use super::*;
  use crate::value::Texture;

  fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  fn close(a: Affine, b: Affine) -> bool {
    a.as_coeffs()
      .iter()
      .zip(b.as_coeffs().iter())
      .all(|(x, y)| (x - y).abs() < 1e-9)
  }

  #[test]
  fn test_default_params_are_identity() {
    assert!(close(local_transform(&Parameters::new(), 100, 50, [0.5, 0.5]), Affine::IDENTITY));
  }

  #[test]
  fn test_rotation_keeps_pivot_fixed() {
    let p = params(&[("rotation", json!(90.0))]);
    let m = local_transform(&p, 100, 100, [0.5, 0.5]);
    let pivot = m * Point::new(50.0, 50.0);
    assert!((pivot.x - 50.0).abs() < 1e-9 && (pivot.y - 50.0).abs() < 1e-9);
    let corner = m * Point::new(100.0, 50.0);
    assert!((corner.x - 50.0).abs() < 1e-9 && (corner.y - 100.0).abs() < 1e-9);
  }

  #[test]
  fn test_translation_applies_after_pivot() {
    let p = params(&[("translate_x", json!(10.0)), ("scale_x", json!(2.0))]);
    let m = local_transform(&p, 10, 10, [0.0, 0.0]);
    let q = m * Point::new(1.0, 1.0);
    assert!((q.x - 12.0).abs() < 1e-9 && (q.y - 1.0).abs() < 1e-9);
  }

  #[test]
  fn test_transform_only_edit() {
    let a = params(&[("rotation", json!(0.0)), ("radius", json!(3.0))]);
    let b = params(&[("rotation", json!(30.0)), ("radius", json!(3.0))]);
    let c = params(&[("rotation", json!(0.0)), ("radius", json!(5.0))]);
    let d = params(&[("rotation", json!(0.0))]);
    assert!(is_transform_only_edit(&a, &b));
    assert!(is_transform_only_edit(&a, &a));
    assert!(!is_transform_only_edit(&a, &c));
    assert!(!is_transform_only_edit(&a, &d));
  }

  #[test]
  fn test_recompose_uses_base() {
    let base = Affine::translate((5.0, 0.0));
    let mut texture = Texture::new(ResourceHandle {
      id: 1,
      width: 10,
      height: 10,
    });
    texture.base_transform = base;
    let mut outputs = NodeOutputs::new();
    outputs.insert("image".into(), Value::Texture(texture));
    outputs.insert("count".into(), Value::Number(1.0));

    let p = params(&[("rotation", json!(30.0))]);
    assert_eq!(recompose_in_place(&mut outputs, &p, [0.5, 0.5]), 1);

    let expected = local_transform(&p, 10, 10, [0.5, 0.5]) * base;
    let got = outputs["image"].as_texture().unwrap();
    assert!(close(got.transform, expected));
    assert_eq!(got.base_transform, base);
    assert_eq!(got.handle.id, 1);
  }
}
