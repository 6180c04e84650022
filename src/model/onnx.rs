// 该文件是 Chepai （车牌） 项目的一部分。
// src/model/onnx.rs - ONNX YOLO 模型
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

use std::sync::Mutex;

use image::imageops::FilterType;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{InferenceOutput, Model, OutputTensor, TensorError},
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 416;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型没有输入")]
  NoInput,
  #[error("推理会话不可用")]
  SessionPoisoned,
  #[error("输出 {index} 形状无效: {shape:?}")]
  InvalidOutputShape { index: usize, shape: Vec<i64> },
  #[error("输出张量错误: {0}")]
  TensorError(#[from] TensorError),
}

pub struct OnnxModelBuilder {
  model_path: String,
  input_size: u32,
  intra_threads: usize,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxModelBuilder::new(url.path());
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "size" => {
          builder.input_size = v.parse().map_err(|_| {
            OnnxModelError::ModelPathError(format!("输入尺寸无效: {}", v))
          })?
        }
        "threads" => {
          builder.intra_threads = v.parse().map_err(|_| {
            OnnxModelError::ModelPathError(format!("线程数无效: {}", v))
          })?
        }
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }
    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: &str) -> Self {
    Self {
      model_path: model_path.to_string(),
      input_size: ONNX_DEFAULT_INPUT_SIZE,
      intra_threads: 1,
    }
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    if self.input_size == 0 {
      return Err(OnnxModelError::ModelPathError("输入尺寸不能为 0".to_string()));
    }

    info!("加载模型文件: {}", self.model_path);
    let session = Session::builder()?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(&self.model_path)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or(OnnxModelError::NoInput)?;
    debug!("模型输入: {}, 输出数量: {}", input_name, session.outputs.len());
    info!("模型加载完成");

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_name,
      input_size: self.input_size,
    })
  }
}

/// Darknet 风格的 YOLO 模型，每个输出张量最后一维为 5 + num_classes
pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  input_size: u32,
}

impl OnnxModel {
  /// 拉伸缩放到 size x size，归一化到 [0, 1]，NCHW 排布
  fn preprocess(&self, frame: &Frame) -> Vec<f32> {
    let size = self.input_size;
    let resized = image::imageops::resize(&frame.to_rgb_image(), size, size, FilterType::Triangle);

    let plane = (size * size) as usize;
    let mut data = vec![0f32; plane * 3];
    for (idx, pixel) in resized.pixels().enumerate() {
      data[idx] = pixel[0] as f32 / 255.0;
      data[plane + idx] = pixel[1] as f32 / 255.0;
      data[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }
    data
  }
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn infer(&self, frame: &Frame) -> Result<InferenceOutput, Self::Error> {
    let size = self.input_size as usize;
    let input = Tensor::from_array(([1usize, 3, size, size], self.preprocess(frame).into_boxed_slice()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxModelError::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;

    let mut tensors = Vec::with_capacity(outputs.len());
    for (index, (_name, value)) in outputs.iter().enumerate() {
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      let dims: Vec<i64> = shape.iter().copied().collect();
      let row_len = match dims.last() {
        Some(&last) if last > 0 => last as usize,
        _ => return Err(OnnxModelError::InvalidOutputShape { index, shape: dims }),
      };
      let anchors = data.len() / row_len;
      tensors.push(OutputTensor::new(anchors, row_len, data.to_vec())?);
    }

    debug!("模型输出 {} 个张量", tensors.len());
    Ok(InferenceOutput::new(tensors))
  }
}
