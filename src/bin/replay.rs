// 该文件是 Xunjian （巡检） 项目的一部分。
// src/bin/replay.rs - 录像回放检测程序
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use xunjian::{
  control::{ConfidenceThreshold, parse_confidence},
  detector::CrackDetector,
  input::open_path,
  model::{LoadOptions, ModelWrapper},
  output::{HeadlessSurface, ScreenSize, Surface, draw, parse_screen_size},
  task::{LoopConfig, install_interrupt_handler, run_replay},
};

/// 对录制的视频或图像序列做裂缝检测回放
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 视频文件、图像文件或图像目录；视频需以 `--features gstreamer_input` 编译
  #[arg(value_name = "PATH")]
  pub path: PathBuf,
  /// 初始置信度阈值 (0.0 - 1.0)
  #[arg(value_name = "CONFIDENCE", default_value = "0.4", value_parser = parse_confidence)]
  pub confidence: ConfidenceThreshold,
  /// 检测模型地址
  #[arg(long, value_name = "MODEL", default_value = "edge://local")]
  pub model: Url,
  /// 快照保存目录
  #[arg(long, value_name = "DIR", default_value = ".")]
  pub save_dir: PathBuf,
  /// 图像序列的播放帧率；视频以文件自身帧率为准
  #[arg(long, default_value_t = 30.0)]
  pub fps: f64,
  /// 推理前做对比度增强
  #[arg(long)]
  pub enhance: bool,
  /// 允许加载声明了非裂缝类别的模型
  #[arg(long)]
  pub allow_unlisted_classes: bool,
  /// 标注字体文件
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 输出设备分辨率，全屏时窗口铺满该尺寸
  #[arg(long, value_name = "WxH", default_value = "1920x1080", value_parser = parse_screen_size)]
  pub screen: ScreenSize,
  /// 不打开显示窗口
  #[arg(long)]
  pub headless: bool,
}

#[cfg(feature = "window_display")]
fn make_surface(headless: bool, screen: ScreenSize) -> Box<dyn Surface> {
  if headless {
    Box::new(HeadlessSurface::default())
  } else {
    Box::new(xunjian::output::WindowSurface::new("Xunjian 回放").with_screen(screen))
  }
}

#[cfg(not(feature = "window_display"))]
fn make_surface(headless: bool, _screen: ScreenSize) -> Box<dyn Surface> {
  if !headless {
    tracing::warn!("未启用 window_display 特性，以无窗口模式运行");
  }
  Box::new(HeadlessSurface::default())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入: {}", args.path.display());
  info!("检测模型: {}", args.model);
  info!("置信度阈值: {}", args.confidence);
  info!("按键: q 退出, 空格 暂停, s 保存, f 全屏, +/- 调整阈值");

  let source = open_path(&args.path, args.fps)
    .with_context(|| format!("无法打开输入 {}", args.path.display()))?;
  let stream = source.info();
  if let Some(total) = stream.total_frames {
    info!("共 {} 帧", total);
  }

  let load_options = LoadOptions::default().allow_unlisted_classes(args.allow_unlisted_classes);
  let model = ModelWrapper::from_url_with(&args.model, &load_options)?;
  let font = draw::load_font(args.font.as_deref());
  let detector = CrackDetector::new(model, draw::Draw::new(font.clone())).with_enhance(args.enhance);

  let interrupt = install_interrupt_handler()?;
  let config = LoopConfig::replay(&args.save_dir, stream.fps).with_font(font);

  let summary = run_replay(
    source,
    detector,
    make_surface(args.headless, args.screen),
    args.confidence,
    config,
    interrupt,
  )?;
  info!("回放结束: {:?}", summary.termination);

  Ok(())
}
