// 该文件是 Chepai （车牌） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::frame::{Frame, VideoInfo};

/// 按源顺序接收帧的视频输出
pub trait FrameSink {
  type Error: std::error::Error + Send + Sync + 'static;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error>;

  /// 结束输出，只应调用一次
  fn finish(&mut self) -> Result<(), Self::Error>;

  /// 输出位置，出错时用于指向已写出的部分
  fn location(&self) -> Option<String>;
}

impl<O: FrameSink + ?Sized> FrameSink for &mut O {
  type Error = O::Error;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    (**self).finish()
  }

  fn location(&self) -> Option<String> {
    (**self).location()
  }
}

/// 输出在打开时就需要知道源的尺寸与帧率
pub trait OpenSink: Sized {
  type Error;

  fn open(url: &Url, info: &VideoInfo) -> Result<Self, Self::Error>;
}

pub trait OpenSinkWithScheme: OpenSink {
  const SCHEME: &'static str;
}

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl OpenSink for OutputWrapper {
  type Error = OutputError;

  fn open(url: &Url, info: &VideoInfo) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_output")]
    {
      if url.scheme() == GStreamerVideoOutput::SCHEME {
        let output = GStreamerVideoOutput::open(url, info)?;
        return Ok(OutputWrapper::GStreamerVideoOutput(output));
      }
    }
    #[cfg(feature = "directory_record")]
    {
      if url.scheme() == DirectoryRecordOutput::SCHEME {
        let output = DirectoryRecordOutput::open(url, info)?;
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
    }
    let _ = info;
    Err(OutputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSink for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => {
        output.write_frame(frame).map_err(OutputError::from)
      }
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.write_frame(frame).map_err(OutputError::from)
      }
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.finish().map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.finish().map_err(OutputError::from),
    }
  }

  fn location(&self) -> Option<String> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.location(),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.location(),
    }
  }
}
