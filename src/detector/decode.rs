// 该文件是 Chepai （车牌） 项目的一部分。
// src/detector/decode.rs - 输出张量解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use tracing::debug;

use crate::model::{BOX_FIELDS, BoundingBox, Candidate, InferenceOutput};

/// 把原始输出张量解码为候选框。
///
/// 置信度直接取类别分数的最大值，objectness 默认不参与计算；
/// 需要 objectness 门限时通过 [`Decoder::with_objectness_threshold`] 显式开启。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoder {
  confidence_threshold: f32,
  objectness_threshold: Option<f32>,
}

impl Decoder {
  pub fn new(confidence_threshold: f32) -> Self {
    Self {
      confidence_threshold,
      objectness_threshold: None,
    }
  }

  pub fn with_objectness_threshold(mut self, threshold: Option<f32>) -> Self {
    self.objectness_threshold = threshold;
    self
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  /// 按张量顺序、行顺序输出候选框，不做排序也不做裁剪
  pub fn decode(&self, output: &InferenceOutput, width: u32, height: u32) -> Vec<Candidate> {
    let (width, height) = (width as f64, height as f64);
    let mut candidates = Vec::new();

    for tensor in &output.tensors {
      for row in tensor.rows() {
        if let Some(threshold) = self.objectness_threshold
          && !(row[4] > threshold)
        {
          continue;
        }

        let Some((class_id, confidence)) = argmax(&row[BOX_FIELDS..]) else {
          continue;
        };
        if !(confidence > self.confidence_threshold) {
          continue;
        }

        // 在 f64 下缩放后先截断中心点与宽高，再换算左上角，与旧实现保持一致
        let cx = (row[0] as f64 * width) as i32;
        let cy = (row[1] as f64 * height) as i32;
        let w = (row[2] as f64 * width) as i32;
        let h = (row[3] as f64 * height) as i32;
        let x = (cx as f64 - w as f64 / 2.0) as i32;
        let y = (cy as f64 - h as f64 / 2.0) as i32;

        candidates.push(Candidate {
          bbox: BoundingBox::new(x, y, w, h),
          class_id,
          confidence,
        });
      }
    }

    debug!(
      "解码 {} 个锚点, 得到 {} 个候选框",
      output.total_anchors(),
      candidates.len()
    );
    candidates
  }
}

/// 第一个最大值胜出，NaN 永远不会被选中
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (idx, &score) in scores.iter().enumerate() {
    if score.is_nan() {
      continue;
    }
    match best {
      Some((_, best_score)) if score <= best_score => {}
      _ => best = Some((idx, score)),
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::OutputTensor;

  fn row(geometry: [f32; 4], objectness: f32, scores: &[f32]) -> Vec<f32> {
    let mut row = geometry.to_vec();
    row.push(objectness);
    row.extend_from_slice(scores);
    row
  }

  fn output(rows: Vec<Vec<f32>>) -> InferenceOutput {
    InferenceOutput::new(vec![OutputTensor::from_rows(&rows).unwrap()])
  }

  #[test]
  fn decodes_single_row_to_pixel_box() {
    let scores = [0.0, 0.1, 0.2, 0.9, 0.05];
    let out = output(vec![row([0.5, 0.5, 0.2, 0.2], 0.7, &scores)]);

    let candidates = Decoder::new(0.5).decode(&out, 100, 100);

    assert_eq!(candidates.len(), 1);
    let c = candidates[0];
    assert_eq!(c.bbox, BoundingBox::new(40, 40, 20, 20));
    assert_eq!(c.class_id, 3);
    assert!((c.confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn confidence_equal_to_threshold_is_rejected() {
    let out = output(vec![row([0.5, 0.5, 0.2, 0.2], 1.0, &[0.5, 0.25])]);
    assert!(Decoder::new(0.5).decode(&out, 100, 100).is_empty());
  }

  #[test]
  fn zero_anchor_tensor_yields_nothing() {
    let out = InferenceOutput::new(vec![OutputTensor::new(0, 7, vec![]).unwrap()]);
    assert!(Decoder::new(0.1).decode(&out, 640, 480).is_empty());
  }

  #[test]
  fn objectness_is_ignored_by_default() {
    let out = output(vec![row([0.5, 0.5, 0.2, 0.2], 0.0, &[0.8, 0.1])]);
    assert_eq!(Decoder::new(0.5).decode(&out, 100, 100).len(), 1);

    let gated = Decoder::new(0.5).with_objectness_threshold(Some(0.3));
    assert!(gated.decode(&out, 100, 100).is_empty());
  }

  #[test]
  fn truncates_toward_zero() {
    // cx = 1, w = 21, x = trunc(1 - 10.5) = -9
    let out = output(vec![row([0.015625, 0.5, 0.328125, 0.25], 1.0, &[0.9])]);
    let c = Decoder::new(0.5).decode(&out, 64, 64)[0];
    assert_eq!(c.bbox.x, -9);
    assert_eq!(c.bbox.width, 21);
  }

  #[test]
  fn scales_in_double_precision_before_truncating() {
    // 0.7f32 稍小于 0.7，乘以 100 后截断为 69
    let out = output(vec![row([0.7, 0.7, 0.2, 0.2], 1.0, &[0.9])]);
    let c = Decoder::new(0.5).decode(&out, 100, 100)[0];
    assert_eq!(c.bbox, BoundingBox::new(59, 59, 20, 20));
  }

  #[test]
  fn keeps_degenerate_boxes() {
    let out = output(vec![row([0.5, 0.5, 0.0, 0.0], 1.0, &[0.9])]);
    let candidates = Decoder::new(0.5).decode(&out, 100, 100);
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].bbox.is_empty());
  }

  #[test]
  fn preserves_emission_order_across_tensors() {
    let first = OutputTensor::from_rows(&[
      row([0.1, 0.1, 0.1, 0.1], 1.0, &[0.6, 0.0]),
      row([0.2, 0.2, 0.1, 0.1], 1.0, &[0.0, 0.95]),
    ])
    .unwrap();
    let second = OutputTensor::from_rows(&[row([0.3, 0.3, 0.1, 0.1], 1.0, &[0.7, 0.0])]).unwrap();
    let out = InferenceOutput::new(vec![first, second]);

    let confidences: Vec<f32> = Decoder::new(0.5)
      .decode(&out, 10, 10)
      .iter()
      .map(|c| c.confidence)
      .collect();
    assert_eq!(confidences, vec![0.6, 0.95, 0.7]);
  }

  #[test]
  fn argmax_prefers_first_maximum_and_skips_nan() {
    assert_eq!(argmax(&[0.3, 0.7, 0.7]), Some((1, 0.7)));
    assert_eq!(argmax(&[f32::NAN, 0.2]), Some((1, 0.2)));
    assert_eq!(argmax(&[f32::NAN]), None);
  }
}
