// 该文件是 Chepai （车牌） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use url::Url;

use chepai::{detector::SuppressionMode, text::TextPolicy};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrKind {
  /// 不识别文字
  None,
  /// 固定文本占位
  Placeholder,
  /// 调用 tesseract 命令行
  Tesseract,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyArg {
  LastSeen,
  MostConfident,
}

impl From<PolicyArg> for TextPolicy {
  fn from(value: PolicyArg) -> Self {
    match value {
      PolicyArg::LastSeen => TextPolicy::LastSeen,
      PolicyArg::MostConfident => TextPolicy::MostConfident,
    }
  }
}

/// Chepai 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 replay:///dumps 或 onnx:///yolov3.onnx?size=416
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源，例如 gst://file/videos/car.mp4 或 image:///images/car.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径，例如 gstvideo:///out/car.mp4 或 folder:///out
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 类别名称文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,

  /// 需要识别文字的类别名称
  #[arg(long, default_value = "number_plate", value_name = "LABEL")]
  pub text_label: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 仅在同一类别内做 NMS
  #[arg(long)]
  pub per_class: bool,

  /// 整段视频的文字合并方式
  #[arg(long, value_enum, default_value = "last-seen")]
  pub text_policy: PolicyArg,

  /// 文字识别方式
  #[arg(long, value_enum, default_value = "placeholder")]
  pub ocr: OcrKind,

  /// tesseract 语言
  #[arg(long, default_value = "eng", value_name = "LANG")]
  pub ocr_lang: String,

  /// 标签字体 (TrueType)，不指定时只画框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 将运行结果以 JSON 写入该文件
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}

impl Args {
  pub fn suppression_mode(&self) -> SuppressionMode {
    if self.per_class {
      SuppressionMode::PerClass
    } else {
      SuppressionMode::ClassAgnostic
    }
  }
}
