// 该文件是 Chepai （车牌） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameError, VideoInfo},
  input::FrameSource,
};

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameError),
}

/// 单张图片作为只有一帧的视频
pub struct ImageFileInput {
  info: VideoInfo,
  frame: Option<Frame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .unwrap_or(1.0);

    let image = ImageReader::open(url.path())?.decode()?.into_rgb8();
    let frame = Frame::from_rgb_image(image)?;
    info!(
      "Image loaded: {} ({}x{})",
      url.path(),
      frame.width(),
      frame.height()
    );

    Ok(Self::from_frame(frame, fps))
  }
}

impl ImageFileInput {
  pub fn from_frame(frame: Frame, fps: f64) -> Self {
    Self {
      info: VideoInfo::new(frame.width(), frame.height(), fps),
      frame: Some(frame),
    }
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn info(&self) -> VideoInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    Ok(self.frame.take())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_exactly_one_frame() {
    let frame = Frame::filled(4, 3, [9, 9, 9]).unwrap();
    let mut input = ImageFileInput::from_frame(frame.clone(), 1.0);
    assert_eq!(input.info().width, 4);
    assert_eq!(input.next_frame().unwrap(), Some(frame));
    assert_eq!(input.next_frame().unwrap(), None);
  }

  #[test]
  fn loads_png_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.png");
    image::RgbImage::from_pixel(6, 5, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let frame = input.next_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (6, 5));
    assert_eq!(frame.pixel(0, 0), Some([1, 2, 3]));
  }
}
