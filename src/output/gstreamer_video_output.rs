// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的视频帧编码为视频文件，尺寸与帧率跟随输入源。
//!
//! ## 支持的格式
//!
//! - **MP4** (H.264) - 默认格式
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! ## URL Scheme
//!
//! `gstvideo:///<path>`
//!
//! ## 基本用法
//!
//! ```no_run
//! use chepai::{frame::VideoInfo, output::{GStreamerVideoOutput, OpenSink}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gstvideo:///tmp/output.mp4")?;
//! let output = GStreamerVideoOutput::open(&url, &VideoInfo::new(1280, 720, 30.0))?;
//! # Ok(())
//! # }
//! ```
//!
//! `finish` 发送 EOS 并等待封装器写完文件尾，之后文件才可以播放。

use crate::{
  frame::{Frame, VideoInfo},
  output::{FrameSink, OpenSink, OpenSinkWithScheme},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸与输出尺寸不一致
  #[error("Frame size {actual:?} does not match output size {expected:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 输出已经结束
  #[error("Output already finished")]
  Finished,
}

fn encoder_pipeline(file_path: &str) -> String {
  let encoder = if file_path.ends_with(".mkv") {
    "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
  } else if file_path.ends_with(".avi") {
    "videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux"
  } else if file_path.ends_with(".webm") {
    "videoconvert ! vp8enc ! webmmux"
  } else {
    // Default to MP4
    "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux"
  };
  format!(
    "appsrc name=src ! {} ! filesink location=\"{}\"",
    encoder, file_path
  )
}

/// GStreamer 视频文件输出
///
/// 管理 GStreamer 编码管道，按源帧率为每一帧打时间戳。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: VideoInfo,
  file_path: String,
  frame_count: u64,
  finished: bool,
}

impl OpenSinkWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl OpenSink for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn open(url: &Url, info: &VideoInfo) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    // Initialize GStreamer (subsequent calls are safe no-ops)
    gst::init()?;

    let file_path = url.path().to_string();
    let pipeline_desc = encoder_pipeline(&file_path);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    // 帧率以千分之一精度表示，兼容 29.97 之类的非整数帧率
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", info.width as i32)
      .field("height", info.height as i32)
      .field(
        "framerate",
        gst::Fraction::new((info.fps * 1000.0).round() as i32, 1000),
      )
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {:.2} fps -> {}",
      info.width, info.height, info.fps, file_path
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      info: *info,
      file_path,
      frame_count: 0,
      finished: false,
    })
  }
}

impl GStreamerVideoOutput {
  fn timestamp(&self, index: u64) -> gst::ClockTime {
    gst::ClockTime::from_nseconds((index as f64 * 1_000_000_000.0 / self.info.fps) as u64)
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());

    let pts = self.timestamp(self.frame_count);
    let next = self.timestamp(self.frame_count + 1);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(pts);
      buffer_ref.set_duration(next - pts);
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;

    Ok(())
  }

  /// 等待 EOS 到达 filesink，或管道报错
  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;

    for message in bus.iter_timed(gst::ClockTime::NONE) {
      match message.view() {
        gst::MessageView::Eos(..) => {
          debug!("Video output received EOS");
          return Ok(());
        }
        gst::MessageView::Error(err) => {
          return Err(GStreamerVideoOutputError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug().map(|d| d.to_string())
          )));
        }
        _ => {}
      }
    }
    Ok(())
  }
}

impl FrameSink for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if self.finished {
      return Err(GStreamerVideoOutputError::Finished);
    }
    if (frame.width(), frame.height()) != (self.info.width, self.info.height) {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected: (self.info.width, self.info.height),
        actual: (frame.width(), frame.height()),
      });
    }
    self.push_frame(frame.as_hwc())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let result = self
      .appsrc
      .end_of_stream()
      .map_err(|e| {
        GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
      })
      .and_then(|_| self.wait_for_eos());

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    result
  }

  fn location(&self) -> Option<String> {
    Some(self.file_path.clone())
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      warn!("Failed to finalize GStreamer video output: {}", e);
    }
  }
}
