// 该文件是 Chepai （车牌） 项目的一部分。
// src/text/tesseract.rs - 调用 tesseract 命令行识别文字
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

use std::path::Path;
use std::process::Command;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{frame::Frame, model::BoundingBox, text::TextExtractor};

/// 单行文本
const TESSERACT_PSM_SINGLE_LINE: u32 = 7;

#[derive(Error, Debug)]
enum TesseractError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("tesseract 退出码 {code:?}: {stderr}")]
  Failed { code: Option<i32>, stderr: String },
}

/// 把检测框区域裁剪为临时 PNG，交给 `tesseract` 命令识别
#[derive(Debug, Clone)]
pub struct TesseractText {
  program: String,
  language: String,
  page_segmentation: u32,
}

impl Default for TesseractText {
  fn default() -> Self {
    Self {
      program: "tesseract".to_string(),
      language: "eng".to_string(),
      page_segmentation: TESSERACT_PSM_SINGLE_LINE,
    }
  }
}

impl TesseractText {
  pub fn with_language(mut self, language: &str) -> Self {
    self.language = language.to_string();
    self
  }

  pub fn with_program(mut self, program: &str) -> Self {
    self.program = program.to_string();
    self
  }

  pub fn with_page_segmentation(mut self, psm: u32) -> Self {
    self.page_segmentation = psm;
    self
  }

  fn run(&self, image: &Path) -> Result<String, TesseractError> {
    let output = Command::new(&self.program)
      .arg(image)
      .arg("stdout")
      .arg("-l")
      .arg(&self.language)
      .arg("--psm")
      .arg(self.page_segmentation.to_string())
      .output()?;

    if !output.status.success() {
      return Err(TesseractError::Failed {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  fn recognize(&self, crop: &RgbImage) -> Result<String, TesseractError> {
    let file = tempfile::Builder::new()
      .prefix("chepai-roi-")
      .suffix(".png")
      .tempfile()?;
    crop.save(file.path())?;
    self.run(file.path())
  }
}

/// 裁剪检测框区域，越界部分先裁掉，空区域返回 None
pub(crate) fn crop_region(frame: &Frame, bbox: &BoundingBox) -> Option<RgbImage> {
  let clipped = bbox.clip_to(frame.width(), frame.height());
  if clipped.is_empty() {
    return None;
  }
  let image = frame.to_rgb_image();
  Some(
    image::imageops::crop_imm(
      &image,
      clipped.x as u32,
      clipped.y as u32,
      clipped.width as u32,
      clipped.height as u32,
    )
    .to_image(),
  )
}

impl TextExtractor for TesseractText {
  fn extract_text(&self, frame: &Frame, bbox: &BoundingBox) -> String {
    let Some(crop) = crop_region(frame, bbox) else {
      debug!("检测框 {:?} 在画面之外, 跳过识别", bbox);
      return String::new();
    };

    match self.recognize(&crop) {
      Ok(text) => {
        debug!("识别结果: {:?}", text);
        text
      }
      Err(e) => {
        warn!("文字识别失败: {}", e);
        String::new()
      }
    }
  }
}
