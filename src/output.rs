// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output.rs - 显示与保存
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

use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::control::Command;

pub mod draw;
pub mod overlay;

mod save_image_file;
pub use self::save_image_file::{
  PATROL_SNAPSHOT_PREFIX, REPLAY_SNAPSHOT_PREFIX, SaveImageFileError, SnapshotWriter,
};

#[cfg(feature = "window_display")]
mod display;
#[cfg(feature = "window_display")]
pub use self::display::{DisplayError, WindowSurface, keymap};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "window_display")]
  #[error("显示错误: {0}")]
  DisplayError(#[from] DisplayError),
}

/// 输出设备分辨率，全屏时窗口铺满该尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
  pub width: u32,
  pub height: u32,
}

impl Default for ScreenSize {
  fn default() -> Self {
    Self {
      width: 1920,
      height: 1080,
    }
  }
}

/// 解析 `WxH` 形式的分辨率
pub fn parse_screen_size(s: &str) -> Result<ScreenSize, String> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("无效的分辨率 '{}', 应为 WxH", s))?;
  let width: u32 = w.trim().parse().map_err(|e| format!("无效的宽度 '{}': {}", w, e))?;
  let height: u32 = h.trim().parse().map_err(|e| format!("无效的高度 '{}': {}", h, e))?;
  if width == 0 || height == 0 {
    return Err(format!("分辨率必须为正, 实际为 {}x{}", width, height));
  }
  Ok(ScreenSize { width, height })
}

/// 显示面：呈现画面并收集操作员指令
pub trait Surface {
  fn present(&mut self, image: &RgbImage, fullscreen: bool) -> Result<(), OutputError>;

  /// 最多等待 `wait`，返回期间收到的第一条指令
  fn poll_command(&mut self, wait: Duration) -> Result<Option<Command>, OutputError>;

  fn close(&mut self);
}

impl<S: Surface + ?Sized> Surface for Box<S> {
  fn present(&mut self, image: &RgbImage, fullscreen: bool) -> Result<(), OutputError> {
    (**self).present(image, fullscreen)
  }

  fn poll_command(&mut self, wait: Duration) -> Result<Option<Command>, OutputError> {
    (**self).poll_command(wait)
  }

  fn close(&mut self) {
    (**self).close()
  }
}

/// 无窗口运行：丢弃画面，从不产生指令，只能由 Ctrl-C 或来源结束终止
#[derive(Debug, Default)]
pub struct HeadlessSurface {
  presented: u64,
}

impl HeadlessSurface {
  pub fn presented(&self) -> u64 {
    self.presented
  }
}

impl Surface for HeadlessSurface {
  fn present(&mut self, image: &RgbImage, _fullscreen: bool) -> Result<(), OutputError> {
    self.presented += 1;
    debug!("第 {} 帧 {}x{}", self.presented, image.width(), image.height());
    Ok(())
  }

  fn poll_command(&mut self, wait: Duration) -> Result<Option<Command>, OutputError> {
    std::thread::sleep(wait);
    Ok(None)
  }

  fn close(&mut self) {}
}
