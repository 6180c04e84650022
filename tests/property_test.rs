// 该文件是 Chepai （车牌） 项目的一部分。
// tests/property_test.rs - 解码与 NMS 的性质测试
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

use proptest::prelude::*;

use chepai::{
  detector::{Decoder, SuppressionMode, Suppressor},
  model::{BoundingBox, Candidate, InferenceOutput, OutputTensor},
};

const NUM_CLASSES: usize = 3;

fn row_strategy() -> impl Strategy<Value = Vec<f32>> {
  prop::collection::vec(0.0f32..1.0, 5 + NUM_CLASSES)
}

fn candidate_strategy() -> impl Strategy<Value = Candidate> {
  (
    -20i32..200,
    -20i32..200,
    0i32..80,
    0i32..80,
    0usize..NUM_CLASSES,
    0.0f32..1.0,
  )
    .prop_map(|(x, y, w, h, class_id, confidence)| Candidate {
      bbox: BoundingBox::new(x, y, w, h),
      class_id,
      confidence,
    })
}

fn mode_strategy() -> impl Strategy<Value = SuppressionMode> {
  prop_oneof![
    Just(SuppressionMode::ClassAgnostic),
    Just(SuppressionMode::PerClass),
  ]
}

proptest! {
  #[test]
  fn higher_confidence_threshold_yields_subset(
    rows in prop::collection::vec(row_strategy(), 0..40),
    a in 0.0f32..1.0,
    b in 0.0f32..1.0,
  ) {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let output = InferenceOutput::new(vec![OutputTensor::from_rows(&rows).unwrap()]);

    let loose = Decoder::new(low).decode(&output, 640, 480);
    let strict = Decoder::new(high).decode(&output, 640, 480);

    prop_assert!(strict.len() <= loose.len());
    for candidate in &strict {
      prop_assert!(loose.contains(candidate));
      prop_assert!(candidate.confidence > high);
    }
  }

  #[test]
  fn survivors_do_not_overlap_beyond_threshold(
    candidates in prop::collection::vec(candidate_strategy(), 0..60),
    iou_threshold in 0.0f32..1.0,
    mode in mode_strategy(),
  ) {
    let suppressor = Suppressor::new(0.0, iou_threshold).with_mode(mode);
    let detections = suppressor.detections(&candidates);

    for (i, a) in detections.iter().enumerate() {
      prop_assert_eq!(a.ordinal, i);
      for b in detections.iter().skip(i + 1) {
        let compared = mode == SuppressionMode::ClassAgnostic || a.class_id == b.class_id;
        if compared {
          prop_assert!(a.bbox.iou(&b.bbox) <= iou_threshold);
        }
        prop_assert!(a.confidence >= b.confidence);
      }
    }
  }

  #[test]
  fn suppression_is_idempotent(
    candidates in prop::collection::vec(candidate_strategy(), 0..60),
    iou_threshold in 0.0f32..1.0,
    mode in mode_strategy(),
  ) {
    let suppressor = Suppressor::new(0.2, iou_threshold).with_mode(mode);
    let once: Vec<Candidate> = suppressor
      .suppress(&candidates)
      .into_iter()
      .map(|i| candidates[i])
      .collect();
    let twice: Vec<Candidate> = suppressor
      .suppress(&once)
      .into_iter()
      .map(|i| once[i])
      .collect();

    prop_assert_eq!(once, twice);
  }

  #[test]
  fn everything_below_threshold_decodes_to_nothing(
    rows in prop::collection::vec(prop::collection::vec(0.0f32..0.5, 5 + NUM_CLASSES), 0..40),
  ) {
    let output = InferenceOutput::new(vec![OutputTensor::from_rows(&rows).unwrap()]);
    prop_assert!(Decoder::new(0.5).decode(&output, 100, 100).is_empty());
  }
}
