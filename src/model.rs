// 该文件是 Chepai （车牌） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

/// 每个锚点行的前 5 个值: cx, cy, w, h, objectness
pub const BOX_FIELDS: usize = 5;

/// 推理能力。实现只负责把一帧图像变成原始输出张量，解码与 NMS 不在此处。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, frame: &Frame) -> Result<InferenceOutput, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn infer(&self, frame: &Frame) -> Result<InferenceOutput, Self::Error> {
    (**self).infer(frame)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("行长度 {0} 过短，至少需要 {min} 个值", min = BOX_FIELDS + 1)]
  RowTooShort(usize),
  #[error("张量大小不匹配: {anchors} 个锚点 x {row_len} = {expected}, 实际 {actual}")]
  SizeMismatch {
    anchors: usize,
    row_len: usize,
    expected: usize,
    actual: usize,
  },
}

/// 形状为 (anchors, 5 + num_classes) 的输出张量，行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  anchors: usize,
  row_len: usize,
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(anchors: usize, row_len: usize, data: Vec<f32>) -> Result<Self, TensorError> {
    if row_len <= BOX_FIELDS {
      return Err(TensorError::RowTooShort(row_len));
    }
    let expected = anchors * row_len;
    if data.len() != expected {
      return Err(TensorError::SizeMismatch {
        anchors,
        row_len,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      anchors,
      row_len,
      data: data.into_boxed_slice(),
    })
  }

  /// 由若干行构造，所有行必须等长
  pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, TensorError> {
    let row_len = rows.first().map(Vec::len).unwrap_or(BOX_FIELDS + 1);
    let mut data = Vec::with_capacity(rows.len() * row_len);
    for row in rows {
      if row.len() != row_len {
        return Err(TensorError::SizeMismatch {
          anchors: rows.len(),
          row_len,
          expected: rows.len() * row_len,
          actual: data.len() + row.len(),
        });
      }
      data.extend_from_slice(row);
    }
    Self::new(rows.len(), row_len, data)
  }

  pub fn anchors(&self) -> usize {
    self.anchors
  }

  pub fn num_classes(&self) -> usize {
    self.row_len - BOX_FIELDS
  }

  pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
    self.data.chunks_exact(self.row_len)
  }
}

/// 一帧图像的全部输出张量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
  pub tensors: Vec<OutputTensor>,
}

impl InferenceOutput {
  pub fn new(tensors: Vec<OutputTensor>) -> Self {
    Self { tensors }
  }

  pub fn total_anchors(&self) -> usize {
    self.tensors.iter().map(OutputTensor::anchors).sum()
  }
}

/// 像素坐标系下的轴对齐矩形，左上角为原点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BoundingBox {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width: width.max(0),
      height: height.max(0),
    }
  }

  pub fn area(&self) -> i64 {
    self.width as i64 * self.height as i64
  }

  pub fn is_empty(&self) -> bool {
    self.area() == 0
  }

  pub fn right(&self) -> i64 {
    self.x as i64 + self.width as i64
  }

  pub fn bottom(&self) -> i64 {
    self.y as i64 + self.height as i64
  }

  /// 交并比。并集面积为 0 时定义为 0，退化框之间永远不会相互抑制。
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = (self.x as i64).max(other.x as i64);
    let y1 = (self.y as i64).max(other.y as i64);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f64;
    let union = self.area() as f64 + other.area() as f64 - intersection;

    if union > 0.0 {
      (intersection / union) as f32
    } else {
      0.0
    }
  }

  /// 裁剪到 [0, width) x [0, height) 范围内
  pub fn clip_to(&self, width: u32, height: u32) -> BoundingBox {
    let x1 = (self.x as i64).clamp(0, width as i64);
    let y1 = (self.y as i64).clamp(0, height as i64);
    let x2 = self.right().clamp(0, width as i64);
    let y2 = self.bottom().clamp(0, height as i64);
    BoundingBox::new(x1 as i32, y1 as i32, (x2 - x1) as i32, (y2 - y1) as i32)
  }
}

/// 解码器输出的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BoundingBox,
  pub class_id: usize,
  pub confidence: f32,
}

/// 经过 NMS 保留下来的检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub class_id: usize,
  pub confidence: f32,
  /// 帧内选择顺序，仅用于确定性排序
  pub ordinal: usize,
}

impl Detection {
  pub fn from_candidate(candidate: &Candidate, ordinal: usize) -> Self {
    Self {
      bbox: candidate.bbox,
      class_id: candidate.class_id,
      confidence: candidate.confidence,
      ordinal,
    }
  }
}

mod replay;
pub use self::replay::{ReplayModel, ReplayModelError};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放模型错误: {0}")]
  ReplayModelError(#[from] ReplayModelError),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxModelError(#[from] OnnxModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayModel::SCHEME => Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?)),
      #[cfg(feature = "model_onnx")]
      OnnxModelBuilder::SCHEME => {
        let model = OnnxModelBuilder::from_url(url)?.build()?;
        Ok(ModelWrapper::Onnx(model))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn infer(&self, frame: &Frame) -> Result<InferenceOutput, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => model.infer(frame).map_err(ModelError::from),
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(frame).map_err(ModelError::from),
    }
  }
}
