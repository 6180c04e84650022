// 该文件是 Chepai （车牌） 项目的一部分。
// src/detector/suppress.rs - 非极大值抑制
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

use std::cmp::Ordering;

use tracing::debug;

use crate::model::{Candidate, Detection};

/// 不同类别之间是否相互抑制
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuppressionMode {
  /// 所有候选框放在一起做 NMS
  #[default]
  ClassAgnostic,
  /// 只在同一类别内做 NMS
  PerClass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressor {
  score_threshold: f32,
  iou_threshold: f32,
  mode: SuppressionMode,
}

impl Suppressor {
  pub fn new(score_threshold: f32, iou_threshold: f32) -> Self {
    Self {
      score_threshold,
      iou_threshold,
      mode: SuppressionMode::default(),
    }
  }

  pub fn with_mode(mut self, mode: SuppressionMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn mode(&self) -> SuppressionMode {
    self.mode
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  /// 返回保留下来的候选框下标，按选择顺序排列
  pub fn suppress(&self, candidates: &[Candidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len())
      .filter(|&i| candidates[i].confidence > self.score_threshold)
      .collect();
    // 稳定排序，置信度相同时先出现的优先
    order.sort_by(|&a, &b| {
      candidates[b]
        .confidence
        .partial_cmp(&candidates[a].confidence)
        .unwrap_or(Ordering::Equal)
    });

    let mut suppressed = vec![false; order.len()];
    let mut kept = Vec::new();

    for i in 0..order.len() {
      if suppressed[i] {
        continue;
      }
      let best = &candidates[order[i]];
      kept.push(order[i]);

      for j in (i + 1)..order.len() {
        if suppressed[j] {
          continue;
        }
        let other = &candidates[order[j]];
        if self.mode == SuppressionMode::PerClass && other.class_id != best.class_id {
          continue;
        }
        if best.bbox.iou(&other.bbox) > self.iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    debug!("NMS: {} 个候选框, 保留 {} 个", candidates.len(), kept.len());
    kept
  }

  /// 执行 NMS 并生成带序号的检测结果
  pub fn detections(&self, candidates: &[Candidate]) -> Vec<Detection> {
    self
      .suppress(candidates)
      .into_iter()
      .enumerate()
      .map(|(ordinal, idx)| Detection::from_candidate(&candidates[idx], ordinal))
      .collect()
  }
}
