// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/display.rs - 本地显示窗口
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
  time::{Duration, Instant},
};

use image::RgbImage;
use minifb::{Key, KeyRepeat, ScaleMode, Window, WindowOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  control::Command,
  output::{OutputError, ScreenSize, Surface},
};

const POLL_SLICE: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum DisplayError {
  #[error("窗口错误: {0}")]
  Window(#[from] minifb::Error),
}

/// 按键到指令的映射
pub fn keymap(key: Key) -> Option<Command> {
  match key {
    Key::Q | Key::Escape => Some(Command::Quit),
    Key::S => Some(Command::Save),
    Key::F => Some(Command::ToggleFullscreen),
    Key::Equal | Key::NumPadPlus => Some(Command::IncreaseConfidence),
    Key::Minus | Key::NumPadMinus => Some(Command::DecreaseConfidence),
    Key::Space => Some(Command::TogglePause),
    _ => None,
  }
}

/// 窗口尺寸与画面尺寸；两者在全屏时不同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
  width: usize,
  height: usize,
  frame_width: usize,
  frame_height: usize,
  fullscreen: bool,
}

/// 全屏时窗口取输出设备尺寸，否则取画面尺寸
fn window_geometry(
  frame_width: u32,
  frame_height: u32,
  fullscreen: bool,
  screen: ScreenSize,
) -> Geometry {
  let (width, height) = if fullscreen {
    (screen.width, screen.height)
  } else {
    (frame_width, frame_height)
  };
  Geometry {
    width: width as usize,
    height: height as usize,
    frame_width: frame_width as usize,
    frame_height: frame_height as usize,
    fullscreen,
  }
}

/// minifb 窗口
///
/// 全屏时以无边框窗口重新打开，置于原点并铺满输出设备，画面按比例缩放。
pub struct WindowSurface {
  title: String,
  screen: ScreenSize,
  window: Option<Window>,
  geometry: Option<Geometry>,
  buffer: Vec<u32>,
  pending: VecDeque<Command>,
}

impl WindowSurface {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      screen: ScreenSize::default(),
      window: None,
      geometry: None,
      buffer: Vec::new(),
      pending: VecDeque::new(),
    }
  }

  pub fn with_screen(mut self, screen: ScreenSize) -> Self {
    self.screen = screen;
    self
  }

  fn open(&mut self, geometry: Geometry) -> Result<(), DisplayError> {
    // 先关闭旧窗口
    self.window = None;
    let options = if geometry.fullscreen {
      WindowOptions {
        borderless: true,
        title: false,
        resize: false,
        topmost: true,
        scale_mode: ScaleMode::AspectRatioStretch,
        ..WindowOptions::default()
      }
    } else {
      WindowOptions {
        resize: true,
        scale_mode: ScaleMode::AspectRatioStretch,
        ..WindowOptions::default()
      }
    };

    let mut window = Window::new(&self.title, geometry.width, geometry.height, options)?;
    if geometry.fullscreen {
      window.set_position(0, 0);
    }
    info!(
      "打开显示窗口 {}x{} (全屏: {})",
      geometry.width, geometry.height, geometry.fullscreen
    );
    self.window = Some(window);
    self.geometry = Some(geometry);
    Ok(())
  }

  fn collect_keys(&mut self) {
    let Some(window) = &self.window else {
      return;
    };
    for key in window.get_keys_pressed(KeyRepeat::No) {
      if let Some(command) = keymap(key) {
        debug!("按键 {:?} -> {:?}", key, command);
        self.pending.push_back(command);
      }
    }
  }
}

impl Surface for WindowSurface {
  fn present(&mut self, image: &RgbImage, fullscreen: bool) -> Result<(), OutputError> {
    let geometry = window_geometry(image.width(), image.height(), fullscreen, self.screen);
    if self.geometry != Some(geometry) || self.window.is_none() {
      self.open(geometry).map_err(OutputError::from)?;
    }

    self.buffer.clear();
    self.buffer.extend(
      image
        .pixels()
        .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
    );

    if let Some(window) = self.window.as_mut() {
      window
        .update_with_buffer(&self.buffer, geometry.frame_width, geometry.frame_height)
        .map_err(|e| OutputError::from(DisplayError::from(e)))?;
    }
    self.collect_keys();
    Ok(())
  }

  fn poll_command(&mut self, wait: Duration) -> Result<Option<Command>, OutputError> {
    let deadline = Instant::now() + wait;
    loop {
      if let Some(command) = self.pending.pop_front() {
        return Ok(Some(command));
      }
      match self.window.as_mut() {
        // 窗口被用户关闭视同退出
        Some(window) if !window.is_open() => return Ok(Some(Command::Quit)),
        Some(window) => window.update(),
        None => {}
      }
      self.collect_keys();
      if let Some(command) = self.pending.pop_front() {
        return Ok(Some(command));
      }

      let now = Instant::now();
      if now >= deadline {
        return Ok(None);
      }
      std::thread::sleep(POLL_SLICE.min(deadline - now));
    }
  }

  fn close(&mut self) {
    if self.window.take().is_some() {
      info!("关闭显示窗口");
    }
    self.geometry = None;
    self.pending.clear();
  }
}
