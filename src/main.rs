// 该文件是 Chepai （车牌） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use chepai::{
  FromUrl,
  input::{FrameSource, InputWrapper},
  model::ModelWrapper,
  output::{OpenSink, OutputWrapper, draw::Draw},
  pipeline::{CancelToken, FramePipeline, PipelineConfigBuilder},
  text::{NoText, PlaceholderText, TesseractText, TextExtractorWrapper},
};

use args::{Args, OcrKind};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  // 配置与输入输出在处理任何帧之前全部就绪，任何一项失败都直接退出
  let config = PipelineConfigBuilder::from_labels_file(&args.labels)?
    .with_confidence(args.confidence)
    .with_nms_threshold(args.nms_threshold)
    .with_suppression_mode(args.suppression_mode())
    .with_text_label(Some(args.text_label.clone()))
    .with_text_policy(args.text_policy.into())
    .with_max_frames(args.max_frames)
    .build()?;

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };

  let extractor = match args.ocr {
    OcrKind::None => TextExtractorWrapper::None(NoText),
    OcrKind::Placeholder => TextExtractorWrapper::Placeholder(PlaceholderText::default()),
    OcrKind::Tesseract => {
      TextExtractorWrapper::Tesseract(TesseractText::default().with_language(&args.ocr_lang))
    }
  };

  let model = ModelWrapper::from_url(&args.model)?;
  let mut input = InputWrapper::from_url(&args.input)?;
  let mut output = OutputWrapper::open(&args.output, &input.info())?;

  let cancel = CancelToken::new();
  cancel.install_ctrlc_handler()?;

  let pipeline = FramePipeline::new(config, model, extractor).with_draw(draw);
  let report = pipeline.run(&mut input, &mut output, &cancel)?;

  println!("处理完成!");
  println!("读取帧数: {}", report.frames_read);
  println!("写出帧数: {}", report.frames_written);
  println!("总检测数: {}", report.detections);
  println!("推理失败: {}", report.inference_failures);
  if let Some(location) = &report.output {
    println!("输出位置: {}", location);
  }
  println!("识别文字: {}", report.recognized_text.text());

  if let Some(path) = &args.report {
    let content = serde_json::to_string_pretty(&report.to_json())?;
    std::fs::write(path, content)
      .with_context(|| format!("无法写入报告 {}", path.display()))?;
    info!("运行报告已写入 {}", path.display());
  }

  Ok(())
}
