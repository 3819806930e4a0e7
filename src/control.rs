// 该文件是 Xunjian （巡检） 项目的一部分。
// src/control.rs - 操作员指令与置信度阈值
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

use std::fmt;

use thiserror::Error;

/// 操作员指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Quit,
  Save,
  ToggleFullscreen,
  IncreaseConfidence,
  DecreaseConfidence,
  /// 仅回放模式有效
  TogglePause,
}

const BASIS_POINTS: u16 = 10_000;
const STEP_BASIS_POINTS: u16 = 500;

#[derive(Error, Debug, PartialEq)]
#[error("置信度阈值必须在 0.0 - 1.0 之间, 实际为 {0}")]
pub struct ThresholdOutOfRange(pub f32);

/// 置信度阈值，以万分比存储，保证始终位于 [0, 1] 区间，步进 0.05
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfidenceThreshold(u16);

impl ConfidenceThreshold {
  pub const MIN: Self = Self(0);
  pub const MAX: Self = Self(BASIS_POINTS);

  pub fn new(value: f32) -> Result<Self, ThresholdOutOfRange> {
    if !(0.0..=1.0).contains(&value) {
      return Err(ThresholdOutOfRange(value));
    }
    Ok(Self((value * BASIS_POINTS as f32).round() as u16))
  }

  pub fn value(self) -> f32 {
    self.0 as f32 / BASIS_POINTS as f32
  }

  pub fn basis_points(self) -> u16 {
    self.0
  }

  pub fn increase(self) -> Self {
    Self(self.0.saturating_add(STEP_BASIS_POINTS).min(BASIS_POINTS))
  }

  pub fn decrease(self) -> Self {
    Self(self.0.saturating_sub(STEP_BASIS_POINTS))
  }
}

impl TryFrom<f32> for ConfidenceThreshold {
  type Error = ThresholdOutOfRange;

  fn try_from(value: f32) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.value())
  }
}

/// clap 参数解析：超出 [0, 1] 的置信度在任何处理开始前即被拒绝
pub fn parse_confidence(s: &str) -> Result<ConfidenceThreshold, String> {
  let value: f32 = s
    .parse()
    .map_err(|e| format!("无效的置信度 '{}': {}", s, e))?;
  ConfidenceThreshold::new(value).map_err(|e| e.to_string())
}
