// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件序列输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{Acquire, FrameSource, StreamInfo, is_image_path},
  query_or,
};

const DEFAULT_SEQUENCE_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ImageSequenceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像文件: {0}")]
  Empty(String),
}

/// 单张图像或目录中按文件名排序的图像序列
///
/// 无法读取或解码的文件计为一次采集落空，序列继续。
pub struct ImageSequence {
  pending: VecDeque<PathBuf>,
  total: u64,
  fps: f64,
}

impl FromUrlWithScheme for ImageSequence {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageSequence {
  type Error = ImageSequenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceError::SchemeMismatch);
    }
    Self::open(
      Path::new(url.path()),
      query_or(url, "fps", DEFAULT_SEQUENCE_FPS),
    )
  }
}

impl ImageSequence {
  pub fn open(path: &Path, fps: f64) -> Result<Self, ImageSequenceError> {
    let mut files = Vec::new();
    if path.is_dir() {
      for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file() && is_image_path(&entry_path) {
          files.push(entry_path);
        }
      }
      files.sort();
      if files.is_empty() {
        return Err(ImageSequenceError::Empty(path.display().to_string()));
      }
    } else {
      // 提前暴露权限等错误
      std::fs::metadata(path)?;
      files.push(path.to_path_buf());
    }

    info!("图像序列: {} 个文件", files.len());
    Ok(Self {
      total: files.len() as u64,
      pending: files.into(),
      fps: if fps > 0.0 { fps } else { DEFAULT_SEQUENCE_FPS },
    })
  }
}

impl FrameSource for ImageSequence {
  fn acquire(&mut self) -> Acquire {
    let Some(path) = self.pending.pop_front() else {
      return Acquire::End;
    };
    let bytes = match std::fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!("读取 {} 失败: {}", path.display(), e);
        return Acquire::Miss;
      }
    };
    match Frame::decode(&bytes) {
      Some(frame) => Acquire::Frame(frame),
      None => {
        warn!("跳过无法解码的文件: {}", path.display());
        Acquire::Miss
      }
    }
  }

  fn info(&self) -> StreamInfo {
    StreamInfo {
      fps: Some(self.fps),
      total_frames: Some(self.total),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn directory_is_read_in_name_order_and_skips_garbage() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(4, 4, Rgb([10, 0, 0]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(6, 6, Rgb([0, 10, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("c.png"), b"not an image").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let mut seq = ImageSequence::open(dir.path(), 10.0).unwrap();
    assert_eq!(
      seq.info(),
      StreamInfo {
        fps: Some(10.0),
        total_frames: Some(3)
      }
    );

    let Acquire::Frame(first) = seq.acquire() else {
      panic!("第一帧应可解码");
    };
    assert_eq!(first.width(), 6);
    assert!(matches!(seq.acquire(), Acquire::Frame(_)));
    assert!(matches!(seq.acquire(), Acquire::Miss));
    assert!(matches!(seq.acquire(), Acquire::End));
    assert!(matches!(seq.acquire(), Acquire::End));
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageSequence::open(dir.path(), 30.0),
      Err(ImageSequenceError::Empty(_))
    ));
  }

  #[test]
  fn from_url_requires_image_scheme() {
    let url = Url::parse("video:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageSequence::from_url(&url),
      Err(ImageSequenceError::SchemeMismatch)
    ));
  }
}
