// 该文件是 Chepai （车牌） 项目的一部分。
// src/text.rs - 区域文字识别
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

use crate::{frame::Frame, model::BoundingBox};

/// 文字识别能力。识别失败返回空字符串，不向调用方抛出错误。
pub trait TextExtractor {
  fn extract_text(&self, frame: &Frame, bbox: &BoundingBox) -> String;
}

impl<X: TextExtractor + ?Sized> TextExtractor for &X {
  fn extract_text(&self, frame: &Frame, bbox: &BoundingBox) -> String {
    (**self).extract_text(frame, bbox)
  }
}

/// 不做任何识别
#[derive(Debug, Clone, Copy, Default)]
pub struct NoText;

impl TextExtractor for NoText {
  fn extract_text(&self, _frame: &Frame, _bbox: &BoundingBox) -> String {
    String::new()
  }
}

pub const PLACEHOLDER_TEXT: &str = "Extracted number plate text";

/// 固定返回一段文本，用于尚未接入 OCR 的部署
#[derive(Debug, Clone)]
pub struct PlaceholderText {
  text: String,
}

impl Default for PlaceholderText {
  fn default() -> Self {
    Self {
      text: PLACEHOLDER_TEXT.to_string(),
    }
  }
}

impl PlaceholderText {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into() }
  }
}

impl TextExtractor for PlaceholderText {
  fn extract_text(&self, _frame: &Frame, _bbox: &BoundingBox) -> String {
    self.text.clone()
  }
}

mod tesseract;
pub use self::tesseract::TesseractText;

pub enum TextExtractorWrapper {
  None(NoText),
  Placeholder(PlaceholderText),
  Tesseract(TesseractText),
}

impl TextExtractor for TextExtractorWrapper {
  fn extract_text(&self, frame: &Frame, bbox: &BoundingBox) -> String {
    match self {
      TextExtractorWrapper::None(x) => x.extract_text(frame, bbox),
      TextExtractorWrapper::Placeholder(x) => x.extract_text(frame, bbox),
      TextExtractorWrapper::Tesseract(x) => x.extract_text(frame, bbox),
    }
  }
}

/// 整段视频中文字结果的合并方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextPolicy {
  /// 每次识别到非空文字都覆盖
  #[default]
  LastSeen,
  /// 只保留置信度最高的检测框识别出的文字
  MostConfident,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizedText {
  text: String,
  frame_index: Option<u64>,
  confidence: f32,
}

impl RecognizedText {
  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn is_empty(&self) -> bool {
    self.text.is_empty()
  }

  /// 文字来自哪一帧，尚未识别到时为 None
  pub fn frame_index(&self) -> Option<u64> {
    self.frame_index
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  /// 合并一次识别结果，返回是否发生了更新。空文字不会覆盖已有结果。
  pub fn merge(
    &mut self,
    policy: TextPolicy,
    text: String,
    frame_index: u64,
    confidence: f32,
  ) -> bool {
    let text = text.trim();
    if text.is_empty() {
      return false;
    }
    let replace = match policy {
      TextPolicy::LastSeen => true,
      TextPolicy::MostConfident => self.frame_index.is_none() || confidence > self.confidence,
    };
    if replace {
      self.text = text.to_string();
      self.frame_index = Some(frame_index);
      self.confidence = confidence;
    }
    replace
  }
}
