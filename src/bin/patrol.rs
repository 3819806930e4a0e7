// 该文件是 Xunjian （巡检） 项目的一部分。
// src/bin/patrol.rs - 实时巡检程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xunjian::{
  FromUrl,
  control::{ConfidenceThreshold, parse_confidence},
  detector::CrackDetector,
  mission::{MissionPlan, parse_positive},
  model::{LoadOptions, ModelWrapper},
  output::{HeadlessSurface, ScreenSize, Surface, draw, parse_screen_size},
  task::{LoopConfig, PatrolOptions, install_interrupt_handler, run_patrol},
  vehicle::VehicleWrapper,
};

/// 无人机实时裂缝巡检
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 飞行器地址
  #[arg(long, value_name = "VEHICLE", default_value = "sim://local")]
  pub vehicle: Url,
  /// 检测模型地址
  #[arg(long, value_name = "MODEL", default_value = "edge://local")]
  pub model: Url,
  /// 初始置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value = "0.5", value_parser = parse_confidence)]
  pub confidence: ConfidenceThreshold,
  /// 巡航高度（米）
  #[arg(long, default_value = "10", value_parser = parse_positive)]
  pub altitude: f32,
  /// 方形航线边长（米）
  #[arg(long, default_value = "20", value_parser = parse_positive)]
  pub side: f32,
  /// 巡航速度（米/秒）
  #[arg(long, default_value = "5", value_parser = parse_positive)]
  pub speed: f32,
  /// 相机编号
  #[arg(long, default_value_t = 0)]
  pub camera: u32,
  /// 快照保存目录
  #[arg(long, value_name = "DIR", default_value = ".")]
  pub save_dir: PathBuf,
  /// 连续采集落空达到该次数后终止，默认无限重试
  #[arg(long, value_name = "COUNT")]
  pub max_misses: Option<u32>,
  /// 降落前返回起飞点
  #[arg(long)]
  pub return_home: bool,
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
    Box::new(xunjian::output::WindowSurface::new("Xunjian 巡检").with_screen(screen))
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

  info!("飞行器: {}", args.vehicle);
  info!("检测模型: {}", args.model);
  info!("置信度阈值: {}", args.confidence);
  info!("快照目录: {}", args.save_dir.display());
  info!("按键: q 退出, s 保存, f 全屏, +/- 调整阈值");

  let interrupt = install_interrupt_handler()?;
  let vehicle = VehicleWrapper::from_url(&args.vehicle)?;

  let font = draw::load_font(args.font.as_deref());
  let plan = MissionPlan {
    altitude: args.altitude,
    side: args.side,
    speed: args.speed,
    ..MissionPlan::default()
  };
  let options = PatrolOptions {
    plan,
    camera: args.camera,
    confidence: args.confidence,
    return_home: args.return_home,
    loop_config: LoopConfig::patrol(&args.save_dir)
      .with_font(font.clone())
      .with_max_misses(args.max_misses),
  };

  let model_url = args.model.clone();
  let load_options = LoadOptions::default().allow_unlisted_classes(args.allow_unlisted_classes);
  let enhance = args.enhance;
  let init_detector = move || -> Result<CrackDetector<ModelWrapper>> {
    info!("加载检测模型...");
    let model = ModelWrapper::from_url_with(&model_url, &load_options)?;
    Ok(CrackDetector::new(model, draw::Draw::new(font)).with_enhance(enhance))
  };

  let summary = run_patrol(
    vehicle,
    options,
    init_detector,
    make_surface(args.headless, args.screen),
    interrupt,
  )?;
  info!("巡检结束: {:?}", summary.termination);

  Ok(())
}
