// 该文件是 Chepai （车牌） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 GStreamer 解码视频文件或读取摄像头，逐帧输出 RGB [`Frame`]。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL Scheme
//!
//! - `gst://file/<path>`: 视频文件，任何已安装插件能解码的容器与编码
//! - `gst://camera/<device>?width=640&height=480&fps=15`: V4L2 摄像头
//! - `gst://test?width=320&height=240&fps=25&frames=100`: `videotestsrc` 测试图案
//!
//! 以上方式都支持 `rotate=90|180|270`。
//!
//! ## 基本用法
//!
//! ```no_run
//! use chepai::{FromUrl, input::{FrameSource, GStreamerInput}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://file/tmp/truck.mp4")?;
//! let mut input = GStreamerInput::from_url(&url)?;
//! println!("{:?}", input.info());
//! while let Some(frame) = input.next_frame()? {
//!     println!("帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! 视频文件模式下 appsink 不丢帧，每一帧都会交给调用方；摄像头模式允许丢帧。

use std::collections::HashMap;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameError, RGB_CHANNELS, VideoInfo},
  input::FrameSource,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 帧尺寸在流中途发生变化
  #[error("Frame size changed: expected {expected:?}, got {actual:?}")]
  FrameSizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameError),
}

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TestPattern {
    width: u32,
    height: u32,
    fps: u32,
    frames: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => format!(
        "v4l2src device={} ! video/x-raw,width={},height={},framerate={}/1",
        camera, width, height, fps
      ),
      GStreamerInputBuilderItem::TestPattern {
        width,
        height,
        fps,
        frames,
      } => format!(
        "videotestsrc num-buffers={} ! video/x-raw,width={},height={},framerate={}/1",
        frames, width, height, fps
      ),
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
  let method = match rotate? {
    "90" => 1,
    "180" => 2,
    "270" => 3,
    _ => return None,
  };
  Some(GStreamerInputBuilderItem::VideoFlip { method })
}

/// GStreamer 视频输入
///
/// 构造时将管道预卷（PAUSED）以取得分辨率与帧率，随后切换到 PLAYING。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: VideoInfo,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = Vec::new();
    let live = match url.host_str() {
      Some("file") => {
        items.push(GStreamerInputBuilderItem::FileSource(url.path().to_string()));
        false
      }
      Some("camera") => {
        items.push(GStreamerInputBuilderItem::CameraSource {
          camera: url.path().to_string(),
          width: parse("width", 640),
          height: parse("height", 480),
          fps: parse("fps", 15),
        });
        true
      }
      Some("test") => {
        items.push(GStreamerInputBuilderItem::TestPattern {
          width: parse("width", 320),
          height: parse("height", 240),
          fps: parse("fps", 25),
          frames: parse("frames", 100),
        });
        false
      }
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };
    if let Some(flip) = video_flip(query.get("rotate").map(String::as_str)) {
      items.push(flip);
    }
    items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Self::build(&items, live)
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn build(items: &[GStreamerInputBuilderItem], live: bool) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let sink = if live {
      "appsink max-buffers=2 drop=true name=sink"
    } else {
      "appsink sync=false name=sink"
    };
    let full_pipeline = format!("{} ! {}", basic_pipeline, sink);

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Paused)?;

    // 预卷样本同时也会作为第一个 pull_sample 的结果返回
    let caps = match appsink.pull_preroll() {
      Ok(preroll) => preroll
        .caps()
        .map(|caps| caps.to_owned())
        .ok_or(GStreamerInputError::VideoInfoError)?,
      // 没有任何帧的视频：caps 已协商则作为已读完的输入打开
      Err(_) if appsink.is_eos() => {
        let caps = negotiated_caps(&appsink).ok_or_else(|| {
          error!("Input reached end of stream before caps were negotiated");
          GStreamerInputError::PipelineError("no frame before end of stream".to_string())
        })?;
        warn!("Input contains no frames");
        caps
      }
      Err(_) => {
        let reason = bus_error(&pipeline).unwrap_or_else(|| "preroll failed".into());
        error!("Failed to preroll input: {}", reason);
        return Err(GStreamerInputError::PipelineError(reason));
      }
    };
    let video_info =
      gst_video::VideoInfo::from_caps(&caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    let fps = video_info.fps();
    let fps = if fps.denom() != 0 {
      fps.numer() as f64 / fps.denom() as f64
    } else {
      0.0
    };
    let info = VideoInfo::new(video_info.width(), video_info.height(), fps);

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "Input opened: {}x{} @ {:.2} fps",
      info.width, info.height, info.fps
    );

    Ok(GStreamerInput {
      pipeline,
      appsink,
      info,
    })
  }
}

fn negotiated_caps(appsink: &gst_app::AppSink) -> Option<gst::Caps> {
  appsink.static_pad("sink")?.current_caps()
}

fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(format!(
      "{} ({:?})",
      err.error(),
      err.debug().map(|d| d.to_string())
    )),
    _ => None,
  }
}

impl FrameSource for GStreamerInput {
  type Error = GStreamerInputError;

  fn info(&self) -> VideoInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = convert_sample(&sample)?;
        if (frame.width(), frame.height()) != (self.info.width, self.info.height) {
          return Err(GStreamerInputError::FrameSizeChanged {
            expected: (self.info.width, self.info.height),
            actual: (frame.width(), frame.height()),
          });
        }
        Ok(Some(frame))
      }
      Err(_) if self.appsink.is_eos() => {
        debug!("GStreamer input reached end of stream");
        Ok(None)
      }
      Err(e) => {
        let reason = bus_error(&self.pipeline).unwrap_or_else(|| e.to_string());
        error!("Failed to pull sample: {}", reason);
        Err(GStreamerInputError::PipelineError(reason))
      }
    }
  }
}

/// 按行拷贝，去掉行尾对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width * RGB_CHANNELS;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + row_bytes;
  if data.len() < expected_size || stride < row_bytes {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in 0..height {
        let start = row * stride;
        for bgr in data[start..start + row_bytes].chunks_exact(RGB_CHANNELS) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  }

  Ok(Frame::new(
    video_info.width(),
    video_info.height(),
    pixels,
  )?)
}
