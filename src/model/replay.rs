// 该文件是 Chepai （车牌） 项目的一部分。
// src/model/replay.rs - 回放预先导出的推理结果
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

//! 回放模型
//!
//! 从目录中按帧序号读取 `000000.json`、`000001.json` ... 作为推理输出，
//! 用于离线复现与调试。文件格式:
//!
//! ```json
//! { "tensors": [ [[cx, cy, w, h, obj, c0, c1, ...], ...], ... ] }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{InferenceOutput, Model, OutputTensor, TensorError},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("JSON 解析错误 {path}: {source}")]
  JsonError {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("格式错误 {path}: {reason}")]
  FormatError { path: PathBuf, reason: String },
  #[error("张量错误 {path}: {source}")]
  TensorError { path: PathBuf, source: TensorError },
}

pub struct ReplayModel {
  directory: PathBuf,
  cursor: AtomicUsize,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

impl ReplayModel {
  pub fn new<P: AsRef<Path>>(directory: P) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      cursor: AtomicUsize::new(0),
    }
  }

  fn frame_path(&self, index: usize) -> PathBuf {
    self.directory.join(format!("{:06}.json", index))
  }
}

fn format_error(path: &Path, reason: &str) -> ReplayModelError {
  ReplayModelError::FormatError {
    path: path.to_path_buf(),
    reason: reason.to_string(),
  }
}

fn parse_output(path: &Path, value: &Value) -> Result<InferenceOutput, ReplayModelError> {
  let tensors = value
    .get("tensors")
    .and_then(Value::as_array)
    .ok_or_else(|| format_error(path, "缺少 tensors 数组"))?;

  let mut outputs = Vec::with_capacity(tensors.len());
  for tensor in tensors {
    let rows = tensor
      .as_array()
      .ok_or_else(|| format_error(path, "张量必须是二维数组"))?;
    let rows = rows
      .iter()
      .map(|row| {
        row
          .as_array()
          .ok_or_else(|| format_error(path, "锚点行必须是数组"))?
          .iter()
          .map(|v| {
            v.as_f64()
              .map(|v| v as f32)
              .ok_or_else(|| format_error(path, "张量元素必须是数字"))
          })
          .collect::<Result<Vec<f32>, _>>()
      })
      .collect::<Result<Vec<_>, _>>()?;

    let tensor = OutputTensor::from_rows(&rows).map_err(|source| ReplayModelError::TensorError {
      path: path.to_path_buf(),
      source,
    })?;
    outputs.push(tensor);
  }

  Ok(InferenceOutput::new(outputs))
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn infer(&self, _frame: &Frame) -> Result<InferenceOutput, Self::Error> {
    let index = self.cursor.fetch_add(1, Ordering::Relaxed);
    let path = self.frame_path(index);
    debug!("读取回放输出: {}", path.display());

    let content = std::fs::read_to_string(&path).map_err(|source| ReplayModelError::IoError {
      path: path.clone(),
      source,
    })?;
    let value: Value =
      serde_json::from_str(&content).map_err(|source| ReplayModelError::JsonError {
        path: path.clone(),
        source,
      })?;

    parse_output(&path, &value)
  }
}
