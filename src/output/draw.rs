// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::Frame,
  labels::ClassLabels,
  model::{BoundingBox, Detection},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无效的字体文件 {0}")]
  InvalidFont(PathBuf),
}

/// 在帧的副本上绘制检测框，原帧保持不变
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  box_color: [u8; 3],
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  /// 加载 TrueType 字体后，框上方会写出 "<标签> <置信度>"
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| DrawError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))?;
    info!("已加载标签字体: {}", path.display());

    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn annotate(&self, frame: &Frame, detections: &[Detection], labels: &ClassLabels) -> Frame {
    if detections.is_empty() {
      return frame.clone();
    }

    let mut image = frame.to_rgb_image();
    for detection in detections {
      let label = format!(
        "{} {:.2}",
        labels.display_name(detection.class_id),
        detection.confidence
      );
      self.draw_bbox_with_label(&mut image, &detection.bbox, &label);
    }

    Frame::from_rgb_image(image).unwrap_or_else(|_| frame.clone())
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str) {
    let clipped = bbox.clip_to(image.width(), image.height());
    if clipped.is_empty() {
      return;
    }

    let color = Rgb(self.box_color);
    // 由外向内逐像素收缩，得到加粗的边框
    for inset in 0..self.thickness {
      let width = clipped.width - 2 * inset;
      let height = clipped.height - 2 * inset;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(clipped.x + inset, clipped.y + inset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, label);
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
    let label_x = clipped.x;
    let label_y = (clipped.y - label_height).max(0);
    let label_width = (text_width as i32).min(image.width() as i32 - label_x);

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([0u8, 0u8, 0u8]),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        label,
      );
    }
  }
}
