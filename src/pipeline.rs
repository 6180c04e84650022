// 该文件是 Chepai （车牌） 项目的一部分。
// src/pipeline.rs - 逐帧处理流水线
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

//! # 逐帧处理流水线
//!
//! 从 [`FrameSource`] 顺序读帧，经过推理、解码、NMS、文字识别与标注后按原顺序写入
//! [`FrameSink`]，整段视频只维护一份 [`RecognizedText`]。
//!
//! ```text
//! Idle -> Reading -> Decoding -> Suppressing -> Annotating -> Writing -> Reading ...
//!            |
//!            +-> Draining -> Closed
//! ```
//!
//! 推理失败只影响当前帧（记为零个检测并计数）；读帧或写帧失败是致命错误，
//! 流水线会尽力结束输出，让已经写出的部分仍然可用。

use std::{
  error::Error as StdError,
  fmt,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  detector::{Decoder, SuppressionMode, Suppressor},
  frame::Frame,
  input::FrameSource,
  labels::{ClassLabels, LabelError},
  model::{Detection, Model},
  output::{FrameSink, draw::Draw},
  text::{RecognizedText, TextExtractor, TextPolicy},
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Reading,
  Decoding,
  Suppressing,
  Annotating,
  Writing,
  Draining,
  Closed,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PipelineState::Idle => "idle",
      PipelineState::Reading => "reading",
      PipelineState::Decoding => "decoding",
      PipelineState::Suppressing => "suppressing",
      PipelineState::Annotating => "annotating",
      PipelineState::Writing => "writing",
      PipelineState::Draining => "draining",
      PipelineState::Closed => "closed",
    };
    f.write_str(name)
  }
}

/// 可克隆的取消标记，每次读帧前检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// Ctrl-C 触发取消；30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("标签错误: {0}")]
  Labels(#[from] LabelError),
  #[error("文字识别类别 '{0}' 不在标签列表中")]
  UnknownTextLabel(String),
  #[error("{name} 必须在 [0, 1] 范围内, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
}

/// 一次运行的全部配置，通过 [`PipelineConfigBuilder`] 构造
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  labels: ClassLabels,
  decoder: Decoder,
  suppressor: Suppressor,
  text_class: Option<usize>,
  text_policy: TextPolicy,
  max_frames: Option<u64>,
}

impl PipelineConfig {
  pub fn builder(labels: ClassLabels) -> PipelineConfigBuilder {
    PipelineConfigBuilder::new(labels)
  }

  pub fn labels(&self) -> &ClassLabels {
    &self.labels
  }

  pub fn decoder(&self) -> &Decoder {
    &self.decoder
  }

  pub fn suppressor(&self) -> &Suppressor {
    &self.suppressor
  }

  /// 需要识别文字的类别，None 表示不做识别
  pub fn text_class(&self) -> Option<usize> {
    self.text_class
  }

  pub fn text_policy(&self) -> TextPolicy {
    self.text_policy
  }

  pub fn max_frames(&self) -> Option<u64> {
    self.max_frames
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
  labels: ClassLabels,
  confidence: f32,
  nms_threshold: f32,
  score_threshold: Option<f32>,
  suppression_mode: SuppressionMode,
  objectness_threshold: Option<f32>,
  text_label: Option<String>,
  text_policy: TextPolicy,
  max_frames: Option<u64>,
}

impl PipelineConfigBuilder {
  pub fn new(labels: ClassLabels) -> Self {
    Self {
      labels,
      confidence: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      score_threshold: None,
      suppression_mode: SuppressionMode::default(),
      objectness_threshold: None,
      text_label: None,
      text_policy: TextPolicy::default(),
      max_frames: None,
    }
  }

  pub fn from_labels_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    Ok(Self::new(ClassLabels::from_file(path)?))
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_nms_threshold(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  /// NMS 前的分数阈值，不设置时与置信度阈值相同
  pub fn with_score_threshold(mut self, score_threshold: Option<f32>) -> Self {
    self.score_threshold = score_threshold;
    self
  }

  pub fn with_suppression_mode(mut self, mode: SuppressionMode) -> Self {
    self.suppression_mode = mode;
    self
  }

  pub fn with_objectness_threshold(mut self, threshold: Option<f32>) -> Self {
    self.objectness_threshold = threshold;
    self
  }

  pub fn with_text_label(mut self, label: Option<String>) -> Self {
    self.text_label = label;
    self
  }

  pub fn with_text_policy(mut self, policy: TextPolicy) -> Self {
    self.text_policy = policy;
    self
  }

  /// 0 等同于不限制
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames.filter(|&n| n > 0);
    self
  }

  pub fn build(self) -> Result<PipelineConfig, ConfigError> {
    let score_threshold = self.score_threshold.unwrap_or(self.confidence);
    check_threshold("confidence", self.confidence)?;
    check_threshold("nms_threshold", self.nms_threshold)?;
    check_threshold("score_threshold", score_threshold)?;
    if let Some(objectness) = self.objectness_threshold {
      check_threshold("objectness_threshold", objectness)?;
    }

    let text_class = match &self.text_label {
      Some(label) => Some(
        self
          .labels
          .resolve(label)
          .map_err(|_| ConfigError::UnknownTextLabel(label.clone()))?,
      ),
      None => None,
    };

    info!(
      "流水线配置: 置信度 {}, NMS {}, 分数 {}, 模式 {:?}, 文字类别 {:?}",
      self.confidence, self.nms_threshold, score_threshold, self.suppression_mode, self.text_label
    );

    Ok(PipelineConfig {
      decoder: Decoder::new(self.confidence).with_objectness_threshold(self.objectness_threshold),
      suppressor: Suppressor::new(score_threshold, self.nms_threshold)
        .with_mode(self.suppression_mode),
      labels: self.labels,
      text_class,
      text_policy: self.text_policy,
      max_frames: self.max_frames,
    })
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

/// 处理过程中的致命错误，携带已写出的帧数与输出位置
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("读取第 {frame_index} 帧失败 (已写出 {frames_written} 帧, 输出 {location:?}): {source}")]
  Source {
    frame_index: u64,
    frames_written: u64,
    location: Option<String>,
    source: BoxedError,
  },
  #[error("写入第 {frame_index} 帧失败 (已写出 {frames_written} 帧, 输出 {location:?}): {source}")]
  Sink {
    frame_index: u64,
    frames_written: u64,
    location: Option<String>,
    source: BoxedError,
  },
  #[error("结束输出失败 (已写出 {frames_written} 帧, 输出 {location:?}): {source}")]
  Finish {
    frames_written: u64,
    location: Option<String>,
    source: BoxedError,
  },
}

impl PipelineError {
  pub fn frames_written(&self) -> u64 {
    match self {
      PipelineError::Source { frames_written, .. }
      | PipelineError::Sink { frames_written, .. }
      | PipelineError::Finish { frames_written, .. } => *frames_written,
    }
  }

  /// 部分输出的位置
  pub fn location(&self) -> Option<&str> {
    match self {
      PipelineError::Source { location, .. }
      | PipelineError::Sink { location, .. }
      | PipelineError::Finish { location, .. } => location.as_deref(),
    }
  }
}

/// 一次运行的统计结果
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
  pub frames_read: u64,
  pub frames_written: u64,
  pub detections: u64,
  pub inference_failures: u64,
  pub cancelled: bool,
  pub final_state: PipelineState,
  pub output: Option<String>,
  pub recognized_text: RecognizedText,
}

impl PipelineReport {
  pub fn to_json(&self) -> serde_json::Value {
    json!({
      "frames_read": self.frames_read,
      "frames_written": self.frames_written,
      "detections": self.detections,
      "inference_failures": self.inference_failures,
      "cancelled": self.cancelled,
      "final_state": self.final_state.to_string(),
      "output": self.output,
      "recognized_text": {
        "text": self.recognized_text.text(),
        "frame_index": self.recognized_text.frame_index(),
        "confidence": self.recognized_text.confidence(),
      },
    })
  }
}

/// 记录状态迁移，便于按 debug 级别追踪
struct StateTracker {
  state: PipelineState,
}

impl StateTracker {
  fn enter(&mut self, next: PipelineState) {
    debug!("{} -> {}", self.state, next);
    self.state = next;
  }
}

pub struct FramePipeline<M, X> {
  config: PipelineConfig,
  model: M,
  extractor: X,
  draw: Draw,
}

impl<M: Model, X: TextExtractor> FramePipeline<M, X> {
  pub fn new(config: PipelineConfig, model: M, extractor: X) -> Self {
    Self {
      config,
      model,
      extractor,
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn run<S, O>(
    &self,
    source: &mut S,
    sink: &mut O,
    cancel: &CancelToken,
  ) -> Result<PipelineReport, PipelineError>
  where
    S: FrameSource,
    O: FrameSink,
  {
    let mut tracker = StateTracker {
      state: PipelineState::Idle,
    };
    let mut recognized = RecognizedText::default();
    let mut frames_read: u64 = 0;
    let mut frames_written: u64 = 0;
    let mut detections_total: u64 = 0;
    let mut inference_failures: u64 = 0;
    let mut cancelled = false;

    let info = source.info();
    info!(
      "开始任务: {}x{} @ {:.2} fps",
      info.width, info.height, info.fps
    );

    loop {
      tracker.enter(PipelineState::Reading);
      if cancel.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        cancelled = true;
        break;
      }
      if self.config.max_frames.is_some_and(|n| frames_read >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frames_read);
        break;
      }

      let frame = match source.next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("输入读取完毕");
          break;
        }
        Err(e) => {
          error!("读取第 {} 帧失败: {}", frames_read, e);
          let location = finish_best_effort(sink);
          return Err(PipelineError::Source {
            frame_index: frames_read,
            frames_written,
            location,
            source: Box::new(e),
          });
        }
      };
      let frame_index = frames_read;
      frames_read += 1;
      let now = Instant::now();

      tracker.enter(PipelineState::Decoding);
      let detections = match self.detect(&frame, &mut tracker) {
        Some(detections) => detections,
        None => {
          inference_failures += 1;
          Vec::new()
        }
      };
      detections_total += detections.len() as u64;

      if let Some(text_class) = self.config.text_class {
        for detection in detections.iter().filter(|d| d.class_id == text_class) {
          let text = self.extractor.extract_text(&frame, &detection.bbox);
          if recognized.merge(
            self.config.text_policy,
            text,
            frame_index,
            detection.confidence,
          ) {
            info!("第 {} 帧识别到文字: {}", frame_index, recognized.text());
          }
        }
      }

      tracker.enter(PipelineState::Annotating);
      let annotated = self
        .draw
        .annotate(&frame, &detections, &self.config.labels);

      tracker.enter(PipelineState::Writing);
      if let Err(e) = sink.write_frame(&annotated) {
        error!("写入第 {} 帧失败: {}", frame_index, e);
        let location = finish_best_effort(sink);
        return Err(PipelineError::Sink {
          frame_index,
          frames_written,
          location,
          source: Box::new(e),
        });
      }
      frames_written += 1;
      debug!(
        "处理第 {} 帧: {} 个检测, 耗时 {:.2?}",
        frame_index,
        detections.len(),
        now.elapsed()
      );
    }

    tracker.enter(PipelineState::Draining);
    let finished = sink.finish();
    let location = sink.location();
    tracker.enter(PipelineState::Closed);
    if let Err(e) = finished {
      error!("结束输出失败: {}", e);
      return Err(PipelineError::Finish {
        frames_written,
        location,
        source: Box::new(e),
      });
    }

    info!(
      "任务完成，共 {} 帧, {} 个检测, {} 次推理失败",
      frames_written, detections_total, inference_failures
    );

    Ok(PipelineReport {
      frames_read,
      frames_written,
      detections: detections_total,
      inference_failures,
      cancelled,
      final_state: tracker.state,
      output: location,
      recognized_text: recognized,
    })
  }

  /// 推理、解码并抑制；推理失败或类别数与标签不一致时返回 None
  fn detect(
    &self,
    frame: &Frame,
    tracker: &mut StateTracker,
  ) -> Option<Vec<Detection>> {
    let output = match self.model.infer(frame) {
      Ok(output) => output,
      Err(e) => {
        warn!("推理失败, 当前帧按零检测处理: {}", e);
        return None;
      }
    };
    let expected = self.config.labels.len();
    if let Some(tensor) = output
      .tensors
      .iter()
      .find(|tensor| tensor.num_classes() != expected)
    {
      warn!(
        "输出张量有 {} 个类别, 标签有 {} 个, 当前帧按零检测处理",
        tensor.num_classes(),
        expected
      );
      return None;
    }
    let candidates = self
      .config
      .decoder
      .decode(&output, frame.width(), frame.height());

    tracker.enter(PipelineState::Suppressing);
    Some(self.config.suppressor.detections(&candidates))
  }
}

fn finish_best_effort<O: FrameSink>(sink: &mut O) -> Option<String> {
  if let Err(e) = sink.finish() {
    warn!("结束输出失败: {}", e);
  }
  sink.location()
}
