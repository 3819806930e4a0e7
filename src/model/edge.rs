// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model/edge.rs - 基于局部对比度的 CPU 裂缝模型
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

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::{
  filter::{box_filter, gaussian_blur_f32},
  region_labelling::{Connectivity, connected_components},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model, classes_from_url},
  query_or,
};

const EDGE_BLUR_SIGMA: f32 = 1.2;
const EDGE_DARK_DELTA: u8 = 25;
const EDGE_WINDOW_RADIUS: u32 = 7;
const EDGE_MIN_LENGTH: u32 = 12;
const EDGE_MAX_ITEMS: usize = 64;

// 对比度与细长度饱和点
const CONTRAST_FULL: f32 = 60.0;
const ELONGATION_FULL: f32 = 8.0;

#[derive(Error, Debug)]
pub enum EdgeModelError {
  #[error("无效参数 {0}: {1}")]
  InvalidParameter(&'static str, String),
  #[error("输入图像为空")]
  EmptyImage,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 不依赖加速器的裂缝模型
///
/// 在局部均值下方足够暗的像素被视为候选，按 8 邻域连通后，
/// 以平均对比度与细长程度给每个连通域打分。
#[derive(Debug, Clone)]
pub struct EdgeModel {
  blur_sigma: f32,
  dark_delta: u8,
  window_radius: u32,
  min_length: u32,
  labels: Vec<String>,
}

impl Default for EdgeModel {
  fn default() -> Self {
    Self {
      blur_sigma: EDGE_BLUR_SIGMA,
      dark_delta: EDGE_DARK_DELTA,
      window_radius: EDGE_WINDOW_RADIUS,
      min_length: EDGE_MIN_LENGTH,
      labels: vec!["crack".to_string()],
    }
  }
}

impl FromUrlWithScheme for EdgeModel {
  const SCHEME: &'static str = "edge";
}

impl FromUrl for EdgeModel {
  type Error = EdgeModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EdgeModelError::SchemeMismatch);
    }

    let model = EdgeModel {
      blur_sigma: query_or(url, "blur", EDGE_BLUR_SIGMA),
      dark_delta: query_or(url, "delta", EDGE_DARK_DELTA),
      window_radius: query_or(url, "window", EDGE_WINDOW_RADIUS),
      min_length: query_or(url, "min_length", EDGE_MIN_LENGTH),
      labels: classes_from_url(url),
    };
    if !(model.blur_sigma > 0.0) {
      return Err(EdgeModelError::InvalidParameter(
        "blur",
        model.blur_sigma.to_string(),
      ));
    }
    if model.window_radius == 0 {
      return Err(EdgeModelError::InvalidParameter("window", "0".to_string()));
    }
    debug!("边缘模型参数: {:?}", model);
    Ok(model)
  }
}

#[derive(Debug, Clone, Copy)]
struct Region {
  x_min: u32,
  y_min: u32,
  x_max: u32,
  y_max: u32,
  pixels: u32,
  contrast_sum: u64,
}

impl Region {
  fn new(x: u32, y: u32) -> Self {
    Self {
      x_min: x,
      y_min: y,
      x_max: x,
      y_max: y,
      pixels: 0,
      contrast_sum: 0,
    }
  }

  fn add(&mut self, x: u32, y: u32, contrast: u8) {
    self.x_min = self.x_min.min(x);
    self.y_min = self.y_min.min(y);
    self.x_max = self.x_max.max(x);
    self.y_max = self.y_max.max(y);
    self.pixels += 1;
    self.contrast_sum += contrast as u64;
  }

  fn length(&self) -> f32 {
    let w = (self.x_max - self.x_min + 1) as f32;
    let h = (self.y_max - self.y_min + 1) as f32;
    (w * w + h * h).sqrt()
  }

  /// 长度与平均宽度之比，细线远大于团块
  fn elongation(&self) -> f32 {
    let length = self.length();
    length * length / self.pixels.max(1) as f32
  }

  fn score(&self) -> f32 {
    let contrast = self.contrast_sum as f32 / self.pixels.max(1) as f32;
    let c = (contrast / CONTRAST_FULL).min(1.0);
    let e = (self.elongation() / ELONGATION_FULL).min(1.0);
    0.4 * c + 0.6 * e
  }
}

impl EdgeModel {
  /// 暗于局部均值的像素掩码，以及每个像素的对比度
  fn dark_mask(&self, gray: &GrayImage) -> (GrayImage, GrayImage) {
    let blurred = gaussian_blur_f32(gray, self.blur_sigma);
    let local_mean = box_filter(&blurred, self.window_radius, self.window_radius);

    let (w, h) = blurred.dimensions();
    let mut mask = GrayImage::new(w, h);
    let mut contrast = GrayImage::new(w, h);
    for (x, y, pixel) in blurred.enumerate_pixels() {
      let mean = local_mean.get_pixel(x, y)[0];
      let delta = mean.saturating_sub(pixel[0]);
      if delta >= self.dark_delta {
        mask.put_pixel(x, y, Luma([255]));
        contrast.put_pixel(x, y, Luma([delta]));
      }
    }
    (mask, contrast)
  }

  fn regions(&self, mask: &GrayImage, contrast: &GrayImage) -> Vec<Region> {
    let labelled = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut regions: Vec<Option<Region>> = Vec::new();
    for (x, y, label) in labelled.enumerate_pixels() {
      let label = label[0] as usize;
      if label == 0 {
        continue;
      }
      if regions.len() < label {
        regions.resize(label, None);
      }
      regions[label - 1]
        .get_or_insert_with(|| Region::new(x, y))
        .add(x, y, contrast.get_pixel(x, y)[0]);
    }
    regions.into_iter().flatten().collect()
  }
}

impl Model for EdgeModel {
  type Error = EdgeModelError;

  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, Self::Error> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
      return Err(EdgeModelError::EmptyImage);
    }

    let gray = imageops::grayscale(image);
    let (mask, contrast) = self.dark_mask(&gray);
    let regions = self.regions(&mask, &contrast);
    debug!("候选连通域: {}", regions.len());

    let mut items: Vec<DetectItem> = regions
      .iter()
      .filter(|r| r.length() >= self.min_length as f32)
      .map(|r| (r, r.score()))
      .filter(|(_, score)| *score >= confidence)
      .map(|(r, score)| DetectItem {
        class_id: 0,
        score,
        bbox: [
          r.x_min as f32 / w as f32,
          r.y_min as f32 / h as f32,
          (r.x_max + 1) as f32 / w as f32,
          (r.y_max + 1) as f32 / h as f32,
        ],
      })
      .collect();

    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    items.truncate(EDGE_MAX_ITEMS);
    debug!("检测到 {} 处裂缝", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }

  fn labels(&self) -> &[String] {
    &self.labels
  }
}
