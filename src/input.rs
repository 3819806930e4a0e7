// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input.rs - 帧来源
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

use std::path::Path;

use thiserror::Error;

use crate::{frame::Frame, vehicle::Vector3};

mod camera_feed;
pub use self::camera_feed::CameraFeed;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageSequence, ImageSequenceError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, VideoReplay};

/// 一次采集的结果
#[derive(Debug)]
pub enum Acquire {
  Frame(Frame),
  /// 本次没有拿到可用帧，下一次可能成功
  Miss,
  /// 来源已耗尽
  End,
}

/// 来源的回放信息；实时来源两项均为 None
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
  pub fps: Option<f64>,
  pub total_frames: Option<u64>,
}

pub trait FrameSource {
  fn acquire(&mut self) -> Acquire;

  fn info(&self) -> StreamInfo {
    StreamInfo::default()
  }

  /// 采集位置，用于叠加显示
  fn position(&self) -> Option<Vector3> {
    None
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn acquire(&mut self) -> Acquire {
    (**self).acquire()
  }

  fn info(&self) -> StreamInfo {
    (**self).info()
  }

  fn position(&self) -> Option<Vector3> {
    (**self).position()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("文件不存在: {0}")]
  NotFound(String),
  #[cfg(feature = "read_image_file")]
  #[error("图像序列错误: {0}")]
  ImageSequence(#[from] ImageSequenceError),
  #[cfg(feature = "gstreamer_input")]
  #[error("视频输入错误: {0}")]
  GStreamer(#[from] GStreamerInputError),
  #[error("不支持的输入: {path}，需要以 --features {feature} 重新编译")]
  Unsupported { path: String, feature: &'static str },
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub(crate) fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// 按路径打开回放来源：目录或图像文件走图像序列，其余按视频文件处理
pub fn open_path(path: &Path, fps: f64) -> Result<Box<dyn FrameSource>, InputError> {
  if !path.exists() {
    return Err(InputError::NotFound(path.display().to_string()));
  }

  if path.is_dir() || is_image_path(path) {
    #[cfg(feature = "read_image_file")]
    {
      return Ok(Box::new(ImageSequence::open(path, fps)?));
    }
    #[cfg(not(feature = "read_image_file"))]
    {
      let _ = fps;
      return Err(InputError::Unsupported {
        path: path.display().to_string(),
        feature: "read_image_file",
      });
    }
  }

  #[cfg(feature = "gstreamer_input")]
  {
    Ok(Box::new(VideoReplay::open(path)?))
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    Err(InputError::Unsupported {
      path: path.display().to_string(),
      feature: "gstreamer_input",
    })
  }
}
