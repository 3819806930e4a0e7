// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件回放
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

//! # GStreamer 视频回放
//!
//! 以 `filesrc ! decodebin ! videoconvert` 解码任意容器格式，
//! 从 appsink 逐帧拉取 RGB 图像。appsink 不丢帧，回放中的每一帧都会被处理。
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{Acquire, FrameSource, StreamInfo},
};

const PREROLL_TIMEOUT_SECONDS: u64 = 10;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub struct VideoReplay {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: StreamInfo,
}

impl FromUrlWithScheme for VideoReplay {
  const SCHEME: &'static str = "video";
}

impl FromUrl for VideoReplay {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }
    Self::open(Path::new(url.path()))
  }
}

impl VideoReplay {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4 drop=false",
      path.display()
    );
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    // 预卷后才能查询帧率与时长
    pipeline.set_state(gst::State::Paused)?;
    let (preroll, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECONDS));
    if let Err(e) = preroll {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    let info = read_stream_info(&pipeline, &appsink);
    info!("视频信息: {:?}", info);

    pipeline.set_state(gst::State::Playing)?;
    Ok(Self {
      pipeline,
      appsink,
      info,
    })
  }
}

fn read_stream_info(pipeline: &gst::Pipeline, appsink: &gst_app::AppSink) -> StreamInfo {
  let fps = appsink
    .static_pad("sink")
    .and_then(|pad| pad.current_caps())
    .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok())
    .map(|info| info.fps())
    .filter(|fps| fps.numer() > 0 && fps.denom() > 0)
    .map(|fps| fps.numer() as f64 / fps.denom() as f64);

  let total_frames = match (pipeline.query_duration::<gst::ClockTime>(), fps) {
    (Some(duration), Some(fps)) => Some((duration.nseconds() as f64 / 1e9 * fps).round() as u64),
    _ => None,
  };

  StreamInfo { fps, total_frames }
}

impl Drop for VideoReplay {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl FrameSource for VideoReplay {
  fn acquire(&mut self) -> Acquire {
    match self.appsink.pull_sample() {
      Ok(sample) => match convert_sample(sample) {
        Ok(frame) => Acquire::Frame(frame),
        Err(e) => {
          error!("帧转换失败: {}", e);
          Acquire::Miss
        }
      },
      Err(_) if self.appsink.is_eos() => {
        debug!("视频流结束");
        Acquire::End
      }
      Err(e) => {
        error!("拉取帧失败: {}", e);
        // 管道已出错时不会再产生数据
        Acquire::End
      }
    }
  }

  fn info(&self) -> StreamInfo {
    self.info
  }
}

fn convert_sample(sample: gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row = width * 3;
  let expected = stride * (height.saturating_sub(1)) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行宽按 4 字节对齐，逐行去掉填充
  let mut packed = Vec::with_capacity(row * height);
  for y in 0..height {
    packed.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  let frame = match video_info.format() {
    gst_video::VideoFormat::Rgb => Frame::from_rgb(width as u32, height as u32, packed),
    gst_video::VideoFormat::Bgr => Frame::from_bgr(width as u32, height as u32, packed),
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }
  .ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row * height,
    actual: data.len(),
  })?;

  Ok(match buffer.pts() {
    Some(pts) => frame.with_timestamp(pts.mseconds()),
    None => frame,
  })
}
