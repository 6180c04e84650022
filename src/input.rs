// 该文件是 Chepai （车牌） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{
  FromUrl,
  frame::{Frame, VideoInfo},
};

/// 顺序拉取的帧来源。`Ok(None)` 表示已经读完，不是错误。
pub trait FrameSource {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 在拉取第一帧之前即可获得
  fn info(&self) -> VideoInfo;

  fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInput::SCHEME {
        let input = GStreamerInput::from_url(url)?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn info(&self) -> VideoInfo {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.info(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.info(),
    }
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame().map_err(InputError::from),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next_frame().map_err(InputError::from),
    }
  }
}
