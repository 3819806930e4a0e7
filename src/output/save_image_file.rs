// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/save_image_file.rs - 保存快照
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const PATROL_SNAPSHOT_PREFIX: &str = "detection_frame";
pub const REPLAY_SNAPSHOT_PREFIX: &str = "detection_live";

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 将当前显示的画面保存为 `<目录>/<前缀>_<帧号:04>.jpg`
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
  directory: PathBuf,
  prefix: String,
}

impl FromUrlWithScheme for SnapshotWriter {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SnapshotWriter {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let prefix = uri
      .query_pairs()
      .find(|(k, _)| k == "prefix")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| PATROL_SNAPSHOT_PREFIX.to_string());
    Ok(SnapshotWriter::new(uri.path(), prefix))
  }
}

impl SnapshotWriter {
  pub fn new(directory: impl AsRef<Path>, prefix: impl Into<String>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      prefix: prefix.into(),
    }
  }

  pub fn path_for(&self, frame_index: u64) -> PathBuf {
    self
      .directory
      .join(format!("{}_{:04}.jpg", self.prefix, frame_index))
  }

  pub fn save(&self, image: &RgbImage, frame_index: u64) -> Result<PathBuf, SaveImageFileError> {
    if !self.directory.as_os_str().is_empty() {
      std::fs::create_dir_all(&self.directory)?;
    }
    let path = self.path_for(frame_index);
    image.save(&path)?;
    info!("已保存: {}", path.display());
    Ok(path)
  }
}
