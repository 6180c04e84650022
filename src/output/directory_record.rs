// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  frame::{Frame, VideoInfo},
  output::{FrameSink, OpenSink, OpenSinkWithScheme},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("输出已经结束")]
  Finished,
}

/// 每帧一张 PNG，写入本次运行的时间戳子目录
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_count: u64,
  finished: bool,
}

impl OpenSinkWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl OpenSink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn open(url: &Url, info: &VideoInfo) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }
    let output = Self::create(Path::new(url.path()))?;
    info!(
      "帧目录输出: {} ({}x{} @ {:.2} fps)",
      output.directory.display(),
      info.width,
      info.height,
      info.fps
    );
    Ok(output)
  }
}

impl DirectoryRecordOutput {
  /// 在 `root` 下创建形如 `20261018-142233` 的子目录
  pub fn create(root: &Path) -> Result<Self, DirectoryRecordOutputError> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut directory = root.join(&stamp);
    let mut suffix = 1;
    while directory.exists() {
      directory = root.join(format!("{}-{}", stamp, suffix));
      suffix += 1;
    }
    std::fs::create_dir_all(&directory)?;

    Ok(Self {
      directory,
      frame_count: 0,
      finished: false,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&self, index: u64) -> PathBuf {
    self.directory.join(format!("frame-{:06}.png", index))
  }
}

impl FrameSink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if self.finished {
      return Err(DirectoryRecordOutputError::Finished);
    }
    let path = self.frame_path(self.frame_count);
    frame.to_rgb_image().save(&path)?;
    debug!("已写入 {}", path.display());
    self.frame_count += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    if !self.finished {
      self.finished = true;
      info!(
        "帧目录输出结束: {} 共 {} 帧",
        self.directory.display(),
        self.frame_count
      );
    }
    Ok(())
  }

  fn location(&self) -> Option<String> {
    Some(self.directory.display().to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_numbered_png_frames() {
    let root = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}", root.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::open(&url, &VideoInfo::new(4, 4, 30.0)).unwrap();

    let frame = Frame::filled(4, 4, [200, 100, 50]).unwrap();
    output.write_frame(&frame).unwrap();
    output.write_frame(&frame).unwrap();
    output.finish().unwrap();

    let dir = output.directory().to_path_buf();
    assert!(dir.starts_with(root.path()));
    assert!(dir.join("frame-000000.png").exists());
    assert!(dir.join("frame-000001.png").exists());
    let image = image::open(dir.join("frame-000001.png")).unwrap().into_rgb8();
    assert_eq!(image.get_pixel(3, 3).0, [200, 100, 50]);
    assert_eq!(output.location(), Some(dir.display().to_string()));
  }

  #[test]
  fn write_after_finish_fails() {
    let root = tempfile::tempdir().unwrap();
    let mut output = DirectoryRecordOutput::create(root.path()).unwrap();
    output.finish().unwrap();
    let frame = Frame::filled(2, 2, [0, 0, 0]).unwrap();
    assert!(matches!(
      output.write_frame(&frame),
      Err(DirectoryRecordOutputError::Finished)
    ));
  }

  #[test]
  fn runs_in_same_second_get_distinct_directories() {
    let root = tempfile::tempdir().unwrap();
    let a = DirectoryRecordOutput::create(root.path()).unwrap();
    let b = DirectoryRecordOutput::create(root.path()).unwrap();
    assert_ne!(a.directory(), b.directory());
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("gstvideo:///tmp/out.mp4").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::open(&url, &VideoInfo::new(4, 4, 30.0)),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}
