// 该文件是 Chepai （车牌） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 未知帧率时使用的默认值
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidShape { width: u32, height: u32 },
}

/// 视频流元信息，在拉取第一帧之前即可获得
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

impl VideoInfo {
  pub fn new(width: u32, height: u32, fps: f64) -> Self {
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      DEFAULT_FPS
    };
    Self { width, height, fps }
  }
}

/// HWC 排布的 RGB 帧，构造后不可修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl Frame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidShape { width, height });
    }
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 纯色帧，主要用于测试与占位
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Result<Self, FrameError> {
    let pixels = width as usize * height as usize;
    let data = color.iter().copied().cycle().take(pixels * RGB_CHANNELS).collect();
    Self::new(width, height, data)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    // 长度在构造时已经校验
    RgbImage::from_raw(self.width, self.height, self.data.to_vec())
      .unwrap_or_else(|| RgbImage::new(self.width, self.height))
  }

  pub fn from_rgb_image(image: RgbImage) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    Self::new(width, height, image.into_raw())
  }
}
