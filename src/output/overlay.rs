// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/overlay.rs - 状态叠加层与显示尺寸
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect,
};

use crate::{control::ConfidenceThreshold, vehicle::Vector3};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const ALERT: Rgb<u8> = Rgb([255, 0, 0]);
const CLEAR: Rgb<u8> = Rgb([0, 255, 0]);
const PAUSED: Rgb<u8> = Rgb([255, 165, 0]);

const LINE_HEIGHT: f32 = 40.0;
const TEXT_SCALE: f32 = 28.0;
const STATUS_SCALE: f32 = 40.0;
const MARGIN: i32 = 10;
const BANNER_HEIGHT: u32 = 8;

/// 显示输出的尺寸策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayTarget {
  /// 拉伸到固定分辨率
  Fixed { width: u32, height: u32 },
  /// 超出上限时等比缩小，不放大
  FitWithin { max_width: u32, max_height: u32 },
}

impl DisplayTarget {
  pub const LIVE: Self = DisplayTarget::Fixed {
    width: 1920,
    height: 1080,
  };
  pub const REPLAY: Self = DisplayTarget::FitWithin {
    max_width: 1400,
    max_height: 900,
  };

  pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
    match *self {
      DisplayTarget::Fixed { width, height } => (width, height),
      DisplayTarget::FitWithin {
        max_width,
        max_height,
      } => {
        if width <= max_width && height <= max_height {
          return (width, height);
        }
        let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
        (
          ((width as f64 * scale).round() as u32).max(1),
          ((height as f64 * scale).round() as u32).max(1),
        )
      }
    }
  }

  pub fn apply(&self, image: RgbImage) -> RgbImage {
    let (w, h) = self.output_size(image.width(), image.height());
    if (w, h) == image.dimensions() {
      image
    } else {
      imageops::resize(&image, w, h, imageops::FilterType::Triangle)
    }
  }
}

/// 回放进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Playback {
  pub paused: bool,
  pub fps: f64,
  pub total_frames: Option<u64>,
}

/// 渲染一帧叠加层所需的全部状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayInfo {
  pub frame_index: u64,
  /// 帧在源视频中的时间戳；缺省时按帧号与帧率推算
  pub timestamp_ms: Option<u64>,
  pub frame_anomalies: u32,
  pub total_anomalies: u64,
  pub confidence: ConfidenceThreshold,
  pub position: Option<Vector3>,
  pub playback: Option<Playback>,
}

impl OverlayInfo {
  pub fn alert(&self) -> bool {
    self.frame_anomalies > 0
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLine {
  pub text: String,
  pub color: Rgb<u8>,
  pub scale: f32,
}

impl OverlayLine {
  fn new(text: String, color: Rgb<u8>) -> Self {
    Self {
      text,
      color,
      scale: TEXT_SCALE,
    }
  }
}

/// 叠加层样式，决定文案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStyle {
  Patrol,
  Replay,
}

impl OverlayStyle {
  pub fn lines(&self, info: &OverlayInfo) -> Vec<OverlayLine> {
    let mut lines = Vec::new();
    match (self, info.playback) {
      (OverlayStyle::Replay, Some(playback)) => {
        let frame = match playback.total_frames {
          Some(total) => format!("Frame: {}/{}", info.frame_index, total),
          None => format!("Frame: {}", info.frame_index),
        };
        lines.push(OverlayLine::new(frame, WHITE));
        let fps = playback.fps.max(f64::EPSILON);
        let elapsed = match info.timestamp_ms {
          Some(ms) => ms as f64 / 1000.0,
          None => info.frame_index as f64 / fps,
        };
        let time = match playback.total_frames {
          Some(total) => format!("Time: {:.1}s / {:.1}s", elapsed, total as f64 / fps),
          None => format!("Time: {:.1}s", elapsed),
        };
        lines.push(OverlayLine::new(time, WHITE));
      }
      _ => lines.push(OverlayLine::new(format!("Frame: {}", info.frame_index), WHITE)),
    }

    lines.push(OverlayLine::new(
      format!("Cracks in frame: {}", info.frame_anomalies),
      YELLOW,
    ));
    lines.push(OverlayLine::new(
      format!("Total detections: {}", info.total_anomalies),
      YELLOW,
    ));
    lines.push(OverlayLine::new(
      format!("Confidence: {}", info.confidence),
      WHITE,
    ));
    if let Some(p) = info.position {
      lines.push(OverlayLine::new(
        format!("Position: ({:.1}, {:.1}, {:.1})", p.x, p.y, p.z),
        WHITE,
      ));
    }

    let (text, color) = match (self, info.alert()) {
      (OverlayStyle::Patrol, true) => ("CRACK DETECTED!".to_string(), ALERT),
      (OverlayStyle::Patrol, false) => ("No anomalies".to_string(), CLEAR),
      (OverlayStyle::Replay, true) => (format!("CRACKS FOUND! ({})", info.frame_anomalies), ALERT),
      (OverlayStyle::Replay, false) => ("No cracks detected".to_string(), CLEAR),
    };
    lines.push(OverlayLine {
      text,
      color,
      scale: STATUS_SCALE,
    });

    if let Some(playback) = info.playback {
      let (text, color) = if playback.paused {
        ("PAUSED", PAUSED)
      } else {
        ("PLAYING", CLEAR)
      };
      lines.push(OverlayLine::new(text.to_string(), color));
    }

    lines
  }
}

/// 在标注图上绘制状态叠加层并调整到显示尺寸
#[derive(Clone)]
pub struct Overlay {
  font: Option<FontArc>,
  style: OverlayStyle,
  target: DisplayTarget,
}

impl Overlay {
  pub fn new(font: Option<FontArc>, style: OverlayStyle, target: DisplayTarget) -> Self {
    Self {
      font,
      style,
      target,
    }
  }

  pub fn render(&self, annotated: &RgbImage, info: &OverlayInfo) -> RgbImage {
    let mut image = annotated.clone();
    if image.width() == 0 || image.height() == 0 {
      return image;
    }

    // 状态条不依赖字体，始终绘制
    let status = if info.alert() { ALERT } else { CLEAR };
    let banner = Rect::at(0, 0).of_size(image.width(), BANNER_HEIGHT.min(image.height()));
    draw_filled_rect_mut(&mut image, banner, status);

    if let Some(font) = &self.font {
      let mut y = MARGIN as f32 + BANNER_HEIGHT as f32;
      for line in self.style.lines(info) {
        draw_text_mut(
          &mut image,
          line.color,
          MARGIN,
          y as i32,
          PxScale::from(line.scale),
          font,
          &line.text,
        );
        y += LINE_HEIGHT * line.scale / TEXT_SCALE;
      }
    }

    self.target.apply(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn info(frame_anomalies: u32) -> OverlayInfo {
    OverlayInfo {
      frame_index: 12,
      timestamp_ms: None,
      frame_anomalies,
      total_anomalies: 40,
      confidence: ConfidenceThreshold::new(0.35).unwrap(),
      position: Some(Vector3::new(1.0, 2.0, -10.0)),
      playback: None,
    }
  }

  #[test]
  fn live_output_is_fixed_size() {
    assert_eq!(DisplayTarget::LIVE.output_size(640, 480), (1920, 1080));
  }

  #[test]
  fn replay_output_fits_without_upscaling() {
    assert_eq!(DisplayTarget::REPLAY.output_size(640, 480), (640, 480));
    assert_eq!(DisplayTarget::REPLAY.output_size(2800, 900), (1400, 450));
    assert_eq!(DisplayTarget::REPLAY.output_size(1000, 1800), (500, 900));
  }

  #[test]
  fn patrol_status_lines() {
    let lines = OverlayStyle::Patrol.lines(&info(2));
    assert_eq!(lines[0].text, "Frame: 12");
    assert!(lines.iter().any(|l| l.text == "Confidence: 0.35"));
    assert!(lines.iter().any(|l| l.text == "Position: (1.0, 2.0, -10.0)"));
    let status = lines.last().unwrap();
    assert_eq!(status.text, "CRACK DETECTED!");
    assert_eq!(status.color, ALERT);

    let clear = OverlayStyle::Patrol.lines(&info(0));
    assert_eq!(clear.last().unwrap().color, CLEAR);
  }

  #[test]
  fn replay_lines_show_progress_and_pause() {
    let mut i = info(3);
    i.position = None;
    i.playback = Some(Playback {
      paused: true,
      fps: 24.0,
      total_frames: Some(240),
    });
    let lines = OverlayStyle::Replay.lines(&i);
    assert_eq!(lines[0].text, "Frame: 12/240");
    assert_eq!(lines[1].text, "Time: 0.5s / 10.0s");
    assert!(lines.iter().any(|l| l.text == "CRACKS FOUND! (3)"));
    assert_eq!(lines.last().unwrap().text, "PAUSED");
  }

  #[test]
  fn replay_time_prefers_stream_timestamp() {
    let mut i = info(0);
    i.timestamp_ms = Some(2_300);
    i.playback = Some(Playback {
      paused: false,
      fps: 24.0,
      total_frames: None,
    });
    let lines = OverlayStyle::Replay.lines(&i);
    assert_eq!(lines[0].text, "Frame: 12");
    assert_eq!(lines[1].text, "Time: 2.3s");
    assert_eq!(lines.last().unwrap().text, "PLAYING");
  }

  #[test]
  fn banner_is_drawn_without_font() {
    let overlay = Overlay::new(None, OverlayStyle::Replay, DisplayTarget::REPLAY);
    let image = RgbImage::new(64, 48);
    let alert = overlay.render(&image, &info(1));
    assert_eq!(alert.dimensions(), (64, 48));
    assert_eq!(alert.get_pixel(5, 2), &ALERT);
    assert_eq!(alert.get_pixel(5, 30), &Rgb([0, 0, 0]));

    let clear = overlay.render(&image, &info(0));
    assert_eq!(clear.get_pixel(5, 2), &CLEAR);
  }
}
