// 该文件是 Xunjian （巡检） 项目的一部分。
// src/detector.rs - 异常检测器
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

use std::fmt::Display;

use image::{Rgb, RgbImage, imageops};
use imageproc::contrast::equalize_histogram;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  frame::Frame,
  model::{DetectItem, Model},
  output::draw::{Draw, LabelledBox},
};

/// 像素坐标下的单个检测
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// (x1, y1, x2, y2)
  pub bbox: (i32, i32, i32, i32),
  pub confidence: f32,
  pub width: i32,
  pub height: i32,
  pub area: i64,
}

impl Detection {
  fn from_item(item: &DetectItem, width: u32, height: u32) -> Self {
    let (w, h) = (width as f32, height as f32);
    let x1 = (item.bbox[0] * w).floor() as i32;
    let y1 = (item.bbox[1] * h).floor() as i32;
    let x2 = (item.bbox[2] * w).ceil() as i32;
    let y2 = (item.bbox[3] * h).ceil() as i32;
    let (bw, bh) = (x2 - x1, y2 - y1);
    Detection {
      bbox: (x1, y1, x2, y2),
      confidence: item.score,
      width: bw,
      height: bh,
      area: bw as i64 * bh as i64,
    }
  }
}

/// 单帧检测结果
#[derive(Debug, Clone)]
pub struct DetectionResult {
  pub anomaly_count: u32,
  /// 与输入帧同尺寸，已绘制检测框
  pub annotated: RgbImage,
  pub detections: Vec<Detection>,
  pub confidence_used: f32,
}

impl DetectionResult {
  /// 零检测结果，标注图即原始帧
  pub fn clear(frame: &Frame, confidence: f32) -> Self {
    Self {
      anomaly_count: 0,
      annotated: frame.image().clone(),
      detections: Vec::new(),
      confidence_used: confidence,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("输入帧为空")]
  EmptyFrame,
}

pub trait AnomalyDetector {
  fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult, DetectError>;
}

impl<D: AnomalyDetector + ?Sized> AnomalyDetector for Box<D> {
  fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult, DetectError> {
    (**self).detect(frame, confidence)
  }
}

/// 基于 [`Model`] 的裂缝检测器
///
/// 内部失败一律降级为零检测结果，对调用方不返回错误。
pub struct CrackDetector<M> {
  model: M,
  draw: Draw,
  enhance: bool,
}

impl<M> CrackDetector<M>
where
  M: Model,
  M::Error: Display,
{
  pub fn new(model: M, draw: Draw) -> Self {
    Self {
      model,
      draw,
      enhance: false,
    }
  }

  /// 推理前对亮度做直方图均衡
  pub fn with_enhance(mut self, enhance: bool) -> Self {
    self.enhance = enhance;
    self
  }

  fn run(&self, frame: &Frame, confidence: f32) -> Result<DetectionResult, DetectError> {
    let image = frame.image();
    if image.width() == 0 || image.height() == 0 {
      return Err(DetectError::EmptyFrame);
    }

    let inferred = if self.enhance {
      self.model.infer(&enhance_contrast(image), confidence)
    } else {
      self.model.infer(image, confidence)
    };
    let result = inferred.map_err(|e| DetectError::Inference(e.to_string()))?;

    let mut annotated = image.clone();
    let mut detections = Vec::with_capacity(result.len());
    for item in result.items.iter() {
      let detection = Detection::from_item(item, image.width(), image.height());
      let (x1, y1, x2, y2) = detection.bbox;
      self.draw.draw_box(
        &mut annotated,
        &LabelledBox {
          x1,
          y1,
          x2,
          y2,
          label: self.model.label(item.class_id),
          score: item.score,
        },
      );
      detections.push(detection);
    }

    debug!("检测到 {} 处异常", detections.len());
    Ok(DetectionResult {
      anomaly_count: detections.len() as u32,
      annotated,
      detections,
      confidence_used: confidence,
    })
  }
}

impl<M> AnomalyDetector for CrackDetector<M>
where
  M: Model,
  M::Error: Display,
{
  fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult, DetectError> {
    match self.run(frame, confidence) {
      Ok(result) => Ok(result),
      Err(e) => {
        error!("检测失败，按无异常处理: {}", e);
        Ok(DetectionResult::clear(frame, confidence))
      }
    }
  }
}

/// 亮度直方图均衡，按亮度增益等比缩放三个通道以保留色相
pub fn enhance_contrast(image: &RgbImage) -> RgbImage {
  let luma = imageops::grayscale(image);
  let equalized = equalize_histogram(&luma);
  let mut out = image.clone();
  for (x, y, pixel) in out.enumerate_pixels_mut() {
    let before = luma.get_pixel(x, y)[0].max(1) as f32;
    let gain = equalized.get_pixel(x, y)[0] as f32 / before;
    let Rgb([r, g, b]) = *pixel;
    *pixel = Rgb([
      (r as f32 * gain).round().min(255.0) as u8,
      (g as f32 * gain).round().min(255.0) as u8,
      (b as f32 * gain).round().min(255.0) as u8,
    ]);
  }
  out
}
