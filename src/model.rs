// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model.rs - 模型
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
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod edge;
pub use self::edge::{EdgeModel, EdgeModelError};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

/// 默认允许加载的类别
pub const DEFAULT_CLASSES: [&str; 1] = ["crack"];

pub trait Model {
  type Error;

  /// 对整幅图像推理，只返回得分不低于 `confidence` 的目标
  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, Self::Error>;

  fn labels(&self) -> &[String];

  fn label(&self, class_id: u32) -> &str {
    self
      .labels()
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or("unknown")
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // 归一化坐标 [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

/// 模型加载选项
///
/// 模型文件可能声明默认白名单以外的类别。是否接受由调用方显式决定，
/// 作用范围仅限于本次加载。
#[derive(Debug, Clone)]
pub struct LoadOptions {
  pub allowed_classes: Vec<String>,
  pub allow_unlisted_classes: bool,
}

impl Default for LoadOptions {
  fn default() -> Self {
    Self {
      allowed_classes: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),
      allow_unlisted_classes: false,
    }
  }
}

impl LoadOptions {
  pub fn allow_unlisted_classes(mut self, allow: bool) -> Self {
    self.allow_unlisted_classes = allow;
    self
  }

  pub fn check_classes(&self, declared: &[String]) -> Result<(), ModelError> {
    if self.allow_unlisted_classes {
      return Ok(());
    }
    match declared
      .iter()
      .find(|name| !self.allowed_classes.contains(name))
    {
      Some(name) => Err(ModelError::UnlistedClass(name.clone())),
      None => Ok(()),
    }
  }
}

/// 从 URL 查询参数 `classes=a,b` 读取类别表，缺省为 [`DEFAULT_CLASSES`]
pub(crate) fn classes_from_url(url: &Url) -> Vec<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == "classes")
    .map(|(_, v)| {
      v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect::<Vec<_>>()
    })
    .filter(|classes| !classes.is_empty())
    .unwrap_or_else(|| DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect())
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("边缘模型错误: {0}")]
  EdgeModelError(#[from] EdgeModelError),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 模型错误: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("模型声明了未在白名单中的类别: {0}")]
  UnlistedClass(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum ModelWrapper {
  Edge(EdgeModel),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
}

impl ModelWrapper {
  pub fn from_url_with(url: &Url, options: &LoadOptions) -> Result<Self, ModelError> {
    match url.scheme() {
      EdgeModel::SCHEME => {
        let model = EdgeModel::from_url(url)?;
        options.check_classes(model.labels())?;
        Ok(ModelWrapper::Edge(model))
      }
      #[cfg(feature = "model_yolo26")]
      Yolo26Builder::SCHEME => {
        let model = Yolo26Builder::from_url(url)?.build(options)?;
        Ok(ModelWrapper::Yolo26(model))
      }
      _ => Err(ModelError::SchemeMismatch),
    }
  }
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::from_url_with(url, &LoadOptions::default())
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, Self::Error> {
    match self {
      ModelWrapper::Edge(model) => model.infer(image, confidence).map_err(ModelError::from),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.infer(image, confidence).map_err(ModelError::from),
    }
  }

  fn labels(&self) -> &[String] {
    match self {
      ModelWrapper::Edge(model) => model.labels(),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.labels(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unlisted_classes_need_explicit_opt_in() {
    let declared = vec!["crack".to_string(), "spalling".to_string()];
    let options = LoadOptions::default();
    assert!(matches!(
      options.check_classes(&declared),
      Err(ModelError::UnlistedClass(name)) if name == "spalling"
    ));
    assert!(options.allow_unlisted_classes(true).check_classes(&declared).is_ok());
  }

  #[test]
  fn wrapper_checks_declared_classes() {
    let url = Url::parse("edge://local?classes=crack,rust").unwrap();
    assert!(ModelWrapper::from_url(&url).is_err());
    let options = LoadOptions::default().allow_unlisted_classes(true);
    let model = ModelWrapper::from_url_with(&url, &options).unwrap();
    assert_eq!(model.label(1), "rust");
    assert_eq!(model.label(9), "unknown");
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("onnx:///tmp/best.onnx").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch)
    ));
  }
}
