// 该文件是 Chepai （车牌） 项目的一部分。
// src/labels.rs - 类别标签
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("标签列表为空")]
  Empty,
  #[error("标签 '{0}' 不在标签列表中")]
  UnknownLabel(String),
}

/// 有序的类别名称列表，下标即 class id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
  names: Vec<String>,
}

impl ClassLabels {
  pub fn new<I, S>(names: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self { names })
  }

  /// 解析 `coco.names` 风格的文本，每行一个类别，末尾空行忽略
  pub fn parse(content: &str) -> Result<Self, LabelError> {
    let mut names: Vec<String> = content
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect();
    while names.last().is_some_and(|name| name.trim().is_empty()) {
      names.pop();
    }
    Self::new(names)
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| LabelError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
    let labels = Self::parse(&content)?;
    info!("加载 {} 个类别标签: {}", labels.len(), path.display());
    Ok(labels)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  /// 显示用名称，越界时返回 "unknown"
  pub fn display_name(&self, class_id: usize) -> &str {
    self.name(class_id).unwrap_or("unknown")
  }

  pub fn resolve(&self, label: &str) -> Result<usize, LabelError> {
    self
      .names
      .iter()
      .position(|name| name == label)
      .ok_or_else(|| LabelError::UnknownLabel(label.to_string()))
  }
}
