// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/draw.rs - 检测框绘制与字体加载
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, warn};

// 常见系统字体位置
const FONT_SEARCH_PATHS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 加载字体：优先使用指定路径，其次尝试常见系统字体。
/// 都不可用时返回 None，调用方跳过文字绘制。
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
  let candidates = path
    .into_iter()
    .map(Path::to_path_buf)
    .chain(FONT_SEARCH_PATHS.iter().map(Into::into));

  for candidate in candidates {
    let Ok(data) = std::fs::read(&candidate) else {
      continue;
    };
    match FontArc::try_from_vec(data) {
      Ok(font) => {
        debug!("使用字体: {}", candidate.display());
        return Some(font);
      }
      Err(e) => warn!("字体文件无效 {}: {}", candidate.display(), e),
    }
  }

  warn!("未找到可用字体，将不绘制文字");
  None
}

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

/// 像素坐标下的检测框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelledBox<'a> {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
  pub label: &'a str,
  pub score: f32,
}

#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  color: [u8; 3],
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      color: BOX_COLOR,
    }
  }

  /// 在图像上绘制检测框和 "类别 得分" 标签，超出图像部分被裁剪
  pub fn draw_box(&self, image: &mut RgbImage, item: &LabelledBox) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = item.x1.clamp(0, w - 1);
    let y_min = item.y1.clamp(0, h - 1);
    let x_max = item.x2.clamp(0, w - 1);
    let y_max = item.y2.clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.color);
    for t in 0..BOX_THICKNESS {
      let bw = x_max - x_min - 2 * t;
      let bh = y_max - y_min - 2 * t;
      if bw <= 0 || bh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(bw as u32 + 1, bh as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", item.label, item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let text_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框上方，贴近图像顶部时放在框内
    let label_x = x_min;
    let label_y = if y_min >= text_h { y_min - text_h } else { y_min };
    let label_w = (text_w as i32).min(w - label_x);
    if label_w <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, text_h as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([0, 0, 0]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn box_outline_is_drawn_and_clipped() {
    let mut image = RgbImage::new(50, 40);
    let draw = Draw::new(None);
    draw.draw_box(
      &mut image,
      &LabelledBox {
        x1: 10,
        y1: 10,
        x2: 80,
        y2: 30,
        label: "crack",
        score: 0.9,
      },
    );
    assert_eq!(image.get_pixel(10, 20), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(49, 20), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(25, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_box_is_ignored() {
    let mut image = RgbImage::new(20, 20);
    let draw = Draw::new(None);
    draw.draw_box(
      &mut image,
      &LabelledBox {
        x1: 5,
        y1: 5,
        x2: 5,
        y2: 15,
        label: "crack",
        score: 0.5,
      },
    );
    assert!(image.pixels().all(|p| p == &Rgb([0, 0, 0])));
  }

  #[test]
  fn missing_font_path_falls_back() {
    // 只验证不会 panic；系统中是否存在字体取决于环境
    let _ = load_font(Some(Path::new("/nonexistent/font.ttf")));
  }
}
