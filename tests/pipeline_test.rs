// 该文件是 Chepai （车牌） 项目的一部分。
// tests/pipeline_test.rs - 流水线集成测试
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

use std::collections::VecDeque;
use std::sync::Mutex;

use chepai::{
  frame::{Frame, VideoInfo},
  input::FrameSource,
  labels::ClassLabels,
  model::{BoundingBox, InferenceOutput, Model, OutputTensor},
  output::FrameSink,
  pipeline::{
    CancelToken, ConfigError, FramePipeline, PipelineConfig, PipelineError, PipelineState,
  },
  text::{NoText, TextExtractor, TextPolicy},
};
use thiserror::Error;

const SIZE: u32 = 100;
const CAR: usize = 0;
const PLATE: usize = 1;

#[derive(Error, Debug)]
#[error("fake failure")]
struct FakeError;

fn frame(shade: u8) -> Frame {
  Frame::filled(SIZE, SIZE, [shade, shade, shade]).unwrap()
}

struct VecSource {
  frames: VecDeque<Frame>,
  fail_after: Option<usize>,
  cancel_after: Option<(usize, CancelToken)>,
  pulled: usize,
}

impl VecSource {
  fn new(count: u8) -> Self {
    Self {
      frames: (0..count).map(frame).collect(),
      fail_after: None,
      cancel_after: None,
      pulled: 0,
    }
  }
}

impl FrameSource for VecSource {
  type Error = FakeError;

  fn info(&self) -> VideoInfo {
    VideoInfo::new(SIZE, SIZE, 25.0)
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
    if self.fail_after == Some(self.pulled) {
      return Err(FakeError);
    }
    self.pulled += 1;
    if let Some((n, token)) = &self.cancel_after {
      if self.pulled == *n {
        token.cancel();
      }
    }
    Ok(self.frames.pop_front())
  }
}

#[derive(Default)]
struct RecordingSink {
  frames: Vec<Frame>,
  finished: usize,
  fail_at: Option<usize>,
}

impl FrameSink for RecordingSink {
  type Error = FakeError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if self.fail_at == Some(self.frames.len()) {
      return Err(FakeError);
    }
    self.frames.push(frame.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.finished += 1;
    Ok(())
  }

  fn location(&self) -> Option<String> {
    Some("memory://recording".to_string())
  }
}

/// 按调用顺序返回预设结果，用完后返回空输出
struct ScriptedModel {
  script: Mutex<VecDeque<Result<InferenceOutput, FakeError>>>,
}

impl ScriptedModel {
  fn new(script: Vec<Result<InferenceOutput, FakeError>>) -> Self {
    Self {
      script: Mutex::new(script.into()),
    }
  }
}

impl Model for ScriptedModel {
  type Error = FakeError;

  fn infer(&self, _frame: &Frame) -> Result<InferenceOutput, Self::Error> {
    self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Ok(InferenceOutput::default()))
  }
}

/// 按调用顺序返回预设文字
struct ScriptedText {
  texts: Mutex<VecDeque<String>>,
  calls: Mutex<Vec<BoundingBox>>,
}

impl ScriptedText {
  fn new(texts: &[&str]) -> Self {
    Self {
      texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
      calls: Mutex::new(Vec::new()),
    }
  }
}

impl TextExtractor for ScriptedText {
  fn extract_text(&self, _frame: &Frame, bbox: &BoundingBox) -> String {
    self.calls.lock().unwrap().push(*bbox);
    self.texts.lock().unwrap().pop_front().unwrap_or_default()
  }
}

fn row(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, score: f32) -> Vec<f32> {
  let mut row = vec![cx, cy, w, h, 1.0, 0.0, 0.0];
  row[5 + class_id] = score;
  row
}

fn output(rows: &[Vec<f32>]) -> InferenceOutput {
  InferenceOutput::new(vec![OutputTensor::from_rows(rows).unwrap()])
}

fn plate_at(score: f32) -> InferenceOutput {
  output(&[row(0.5, 0.5, 0.2, 0.2, PLATE, score)])
}

fn labels() -> ClassLabels {
  ClassLabels::new(["car", "number_plate"]).unwrap()
}

fn config(policy: TextPolicy) -> PipelineConfig {
  PipelineConfig::builder(labels())
    .with_text_label(Some("number_plate".into()))
    .with_text_policy(policy)
    .build()
    .unwrap()
}

#[test]
fn frames_are_written_in_source_order() {
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource::new(5);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.frames_read, 5);
  assert_eq!(report.frames_written, 5);
  assert_eq!(report.final_state, PipelineState::Closed);
  assert_eq!(sink.finished, 1);
  let shades: Vec<u8> = sink.frames.iter().map(|f| f.pixel(0, 0).unwrap()[0]).collect();
  assert_eq!(shades, vec![0, 1, 2, 3, 4]);
}

#[test]
fn empty_source_closes_with_empty_text() {
  let pipeline = FramePipeline::new(
    config(TextPolicy::LastSeen),
    ScriptedModel::new(vec![]),
    ScriptedText::new(&["unused"]),
  );
  let mut source = VecSource::new(0);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.frames_written, 0);
  assert_eq!(report.final_state, PipelineState::Closed);
  assert!(report.recognized_text.is_empty());
  assert!(!report.cancelled);
  assert_eq!(sink.finished, 1);
  assert!(sink.frames.is_empty());
}

#[test]
fn frames_below_threshold_pass_through_unchanged() {
  let model = ScriptedModel::new(vec![Ok(output(&[row(0.5, 0.5, 0.2, 0.2, CAR, 0.5)]))]);
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), model, NoText);
  let mut source = VecSource::new(1);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.detections, 0);
  assert_eq!(sink.frames, vec![frame(0)]);
}

#[test]
fn detections_are_drawn_on_a_copy() {
  let pipeline = FramePipeline::new(
    config(TextPolicy::LastSeen),
    ScriptedModel::new(vec![Ok(plate_at(0.9))]),
    NoText,
  );
  let mut source = VecSource::new(1);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.detections, 1);
  let written = &sink.frames[0];
  assert_eq!(written.pixel(40, 40), Some([0, 255, 0]));
  assert_eq!(written.pixel(50, 50), Some([0, 0, 0]));
}

#[test]
fn inference_failure_is_counted_and_not_fatal() {
  let model = ScriptedModel::new(vec![Ok(plate_at(0.9)), Err(FakeError), Ok(plate_at(0.8))]);
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), model, NoText);
  let mut source = VecSource::new(3);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.inference_failures, 1);
  assert_eq!(report.frames_written, 3);
  assert_eq!(report.detections, 2);
  assert_eq!(sink.frames[1], frame(1));
}

#[test]
fn class_count_mismatch_counts_as_inference_failure() {
  // 五个类别分数，而标签只有两个
  let mismatched = output(&[vec![0.5, 0.5, 0.2, 0.2, 1.0, 0.0, 0.0, 0.0, 0.0, 0.9]]);
  let model = ScriptedModel::new(vec![Ok(plate_at(0.9)), Ok(mismatched)]);
  let extractor = ScriptedText::new(&["AB 123", "CD 456"]);
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), model, &extractor);
  let mut source = VecSource::new(2);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.inference_failures, 1);
  assert_eq!(report.detections, 1);
  assert_eq!(report.frames_written, 2);
  assert_eq!(sink.frames[1], frame(1));
  assert_eq!(extractor.calls.lock().unwrap().len(), 1);
  assert_eq!(report.recognized_text.text(), "AB 123");
}

#[test]
fn sink_failure_finalizes_and_reports_partial_output() {
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource::new(5);
  let mut sink = RecordingSink {
    fail_at: Some(2),
    ..RecordingSink::default()
  };

  let err = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap_err();

  assert!(matches!(err, PipelineError::Sink { frame_index: 2, .. }));
  assert_eq!(err.frames_written(), 2);
  assert_eq!(err.location(), Some("memory://recording"));
  assert_eq!(sink.finished, 1);
  assert_eq!(sink.frames.len(), 2);
}

#[test]
fn source_failure_finalizes_and_reports_partial_output() {
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource {
    fail_after: Some(3),
    ..VecSource::new(5)
  };
  let mut sink = RecordingSink::default();

  let err = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap_err();

  assert!(matches!(err, PipelineError::Source { frame_index: 3, .. }));
  assert_eq!(err.frames_written(), 3);
  assert_eq!(sink.finished, 1);
}

#[test]
fn cancellation_stops_before_next_read() {
  let cancel = CancelToken::new();
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource {
    cancel_after: Some((2, cancel.clone())),
    ..VecSource::new(10)
  };
  let mut sink = RecordingSink::default();

  let report = pipeline.run(&mut source, &mut sink, &cancel).unwrap();

  assert!(report.cancelled);
  assert_eq!(report.frames_written, 2);
  assert_eq!(report.final_state, PipelineState::Closed);
  assert_eq!(sink.finished, 1);
}

#[test]
fn cancelled_before_start_writes_nothing() {
  let cancel = CancelToken::new();
  cancel.cancel();
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource::new(3);
  let mut sink = RecordingSink::default();

  let report = pipeline.run(&mut source, &mut sink, &cancel).unwrap();

  assert!(report.cancelled);
  assert_eq!(report.frames_read, 0);
  assert_eq!(sink.finished, 1);
}

#[test]
fn frame_limit_drains_early() {
  let config = PipelineConfig::builder(labels())
    .with_max_frames(Some(2))
    .build()
    .unwrap();
  let pipeline = FramePipeline::new(config, ScriptedModel::new(vec![]), NoText);
  let mut source = VecSource::new(5);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.frames_written, 2);
  assert!(!report.cancelled);
  assert_eq!(sink.finished, 1);
}

#[test]
fn last_seen_text_keeps_latest_non_empty_result() {
  let model = ScriptedModel::new(vec![
    Ok(plate_at(0.9)),
    Ok(plate_at(0.7)),
    Ok(plate_at(0.6)),
  ]);
  let extractor = ScriptedText::new(&["AB 123", "CD 456", ""]);
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), model, extractor);
  let mut source = VecSource::new(3);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.recognized_text.text(), "CD 456");
  assert_eq!(report.recognized_text.frame_index(), Some(1));
}

#[test]
fn most_confident_text_keeps_best_detection() {
  let model = ScriptedModel::new(vec![
    Ok(plate_at(0.7)),
    Ok(plate_at(0.95)),
    Ok(plate_at(0.8)),
  ]);
  let extractor = ScriptedText::new(&["first", "best", "third"]);
  let pipeline = FramePipeline::new(config(TextPolicy::MostConfident), model, extractor);
  let mut source = VecSource::new(3);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.recognized_text.text(), "best");
  assert_eq!(report.recognized_text.frame_index(), Some(1));
}

#[test]
fn extractor_only_sees_text_class_boxes() {
  let model = ScriptedModel::new(vec![Ok(output(&[
    row(0.2, 0.2, 0.1, 0.1, CAR, 0.9),
    row(0.7, 0.7, 0.2, 0.2, PLATE, 0.8),
  ]))]);
  let extractor = ScriptedText::new(&["XY 999"]);
  let pipeline = FramePipeline::new(config(TextPolicy::LastSeen), model, &extractor);
  let mut source = VecSource::new(1);
  let mut sink = RecordingSink::default();

  let report = pipeline
    .run(&mut source, &mut sink, &CancelToken::new())
    .unwrap();

  assert_eq!(report.detections, 2);
  assert_eq!(report.recognized_text.text(), "XY 999");
  assert_eq!(
    *extractor.calls.lock().unwrap(),
    vec![BoundingBox::new(59, 59, 20, 20)]
  );
}

#[test]
fn unknown_text_label_fails_before_processing() {
  let err = PipelineConfig::builder(labels())
    .with_text_label(Some("license_plate".into()))
    .build()
    .unwrap_err();
  assert!(matches!(err, ConfigError::UnknownTextLabel(_)));
}
