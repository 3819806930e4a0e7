// 该文件是 Xunjian （巡检） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use tracing::warn;

const RGB_CHANNELS: usize = 3;

/// 某一时刻采集到的一帧图像（高×宽×3，8 位通道），创建后不可修改
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  timestamp_ms: Option<u64>,
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self {
      image,
      timestamp_ms: None,
    }
  }
}

impl Frame {
  pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
    self.timestamp_ms = Some(timestamp_ms);
    self
  }

  /// 由紧密排列的 RGB 数据创建帧；长度不匹配或尺寸为零时返回 None
  pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if width == 0 || height == 0 {
      return None;
    }
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      warn!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        RGB_CHANNELS * width as usize * height as usize,
        data.len()
      );
      return None;
    }
    RgbImage::from_raw(width, height, data).map(Self::from)
  }

  /// 由 BGR 排列的数据创建帧
  pub fn from_bgr(width: u32, height: u32, mut data: Vec<u8>) -> Option<Self> {
    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.swap(0, 2);
    }
    Self::from_rgb(width, height, data)
  }

  /// 解码压缩图像（PNG/JPEG），空数据或无法解码时返回 None
  pub fn decode(bytes: &[u8]) -> Option<Self> {
    if bytes.is_empty() {
      warn!("图像数据为空");
      return None;
    }
    match image::load_from_memory(bytes) {
      Ok(image) => {
        let image = image.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
          return None;
        }
        Some(Self::from(image))
      }
      Err(e) => {
        warn!("图像解码失败: {}", e);
        None
      }
    }
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn timestamp_ms(&self) -> Option<u64> {
    self.timestamp_ms
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_rgb_rejects_wrong_length() {
    assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_none());
    assert!(Frame::from_rgb(0, 2, vec![]).is_none());
    let frame = Frame::from_rgb(2, 2, vec![7; 12]).unwrap();
    assert_eq!((frame.width(), frame.height()), (2, 2));
  }

  #[test]
  fn from_bgr_swaps_channels() {
    let frame = Frame::from_bgr(1, 1, vec![1, 2, 3]).unwrap();
    assert_eq!(frame.image().get_pixel(0, 0).0, [3, 2, 1]);
  }

  #[test]
  fn decode_treats_empty_and_garbage_as_miss() {
    assert!(Frame::decode(&[]).is_none());
    assert!(Frame::decode(b"not an image").is_none());
  }

  #[test]
  fn decode_png_roundtrip() {
    let image = RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image
      .write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
      )
      .unwrap();
    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 3));
    assert_eq!(frame.image().get_pixel(1, 1).0, [10, 20, 30]);
  }
}
