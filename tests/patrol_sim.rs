// 该文件是 Xunjian （巡检） 项目的一部分。
// tests/patrol_sim.rs - 仿真飞行器上的完整巡检流程
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

use std::{
  sync::{Arc, atomic::AtomicBool},
  time::Duration,
};

use anyhow::Result;
use image::RgbImage;

use xunjian::{
  control::{Command, ConfidenceThreshold},
  detector::CrackDetector,
  mission::{Mission, MissionPlan},
  model::EdgeModel,
  output::{OutputError, Surface, draw::Draw, overlay::DisplayTarget},
  task::{LoopConfig, PatrolOptions, Termination, run_patrol},
  vehicle::{SimFault, SimVehicle, SimVehicleConfig, Vehicle, VehicleError},
};

/// 轮询到第 `quit_after` 次时发出退出指令
struct QuitAfter {
  quit_after: usize,
  polls: usize,
  presented: usize,
}

impl QuitAfter {
  fn new(quit_after: usize) -> Self {
    Self {
      quit_after,
      polls: 0,
      presented: 0,
    }
  }
}

impl Surface for QuitAfter {
  fn present(&mut self, _image: &RgbImage, _fullscreen: bool) -> Result<(), OutputError> {
    self.presented += 1;
    Ok(())
  }

  fn poll_command(&mut self, _wait: Duration) -> Result<Option<Command>, OutputError> {
    self.polls += 1;
    Ok((self.polls >= self.quit_after).then_some(Command::Quit))
  }

  fn close(&mut self) {}
}

fn fast_sim(fault: Option<SimFault>) -> SimVehicle {
  SimVehicle::new(SimVehicleConfig {
    width: 96,
    height: 72,
    miss_every: 4,
    climb_rate: 5.0,
    tick: Duration::from_millis(1),
    time_scale: 200.0,
    fault,
    ..SimVehicleConfig::default()
  })
  .unwrap()
}

fn options(dir: &std::path::Path) -> PatrolOptions {
  let mut loop_config = LoopConfig::patrol(dir);
  loop_config.target = DisplayTarget::REPLAY;
  PatrolOptions {
    plan: MissionPlan {
      altitude: 3.0,
      side: 4.0,
      ..MissionPlan::default()
    },
    camera: 0,
    confidence: ConfidenceThreshold::new(0.5).unwrap(),
    return_home: true,
    loop_config,
  }
}

#[test]
fn patrol_runs_until_quit_then_disconnects() -> Result<()> {
  let dir = tempfile::tempdir()?;
  let sim = fast_sim(None);

  let summary = run_patrol(
    &sim,
    options(dir.path()),
    || Ok(CrackDetector::new(EdgeModel::default(), Draw::new(None))),
    QuitAfter::new(12),
    Arc::new(AtomicBool::new(false)),
  )?;

  assert_eq!(summary.termination, Some(Termination::Quit));
  assert!(summary.frames > 0);
  // 每 4 次采集落空一次
  assert_eq!(summary.frames + summary.misses, 12);
  assert!(summary.misses >= 2);
  assert!(sim.state().is_none());
  assert!(sim.capture_frame(0).is_none());
  Ok(())
}

#[test]
fn takeoff_fault_never_loads_detector() {
  let dir = tempfile::tempdir().unwrap();
  let sim = fast_sim(Some(SimFault::Takeoff));
  let mut loaded = false;

  let result = run_patrol(
    &sim,
    options(dir.path()),
    || {
      loaded = true;
      Ok(CrackDetector::new(EdgeModel::default(), Draw::new(None)))
    },
    QuitAfter::new(1),
    Arc::new(AtomicBool::new(false)),
  );

  assert!(result.is_err());
  assert!(!loaded);
  assert!(sim.state().is_none());
}

#[test]
fn zero_speed_return_is_refused_and_mission_still_lands() -> Result<()> {
  let sim = fast_sim(None);
  let plan = MissionPlan {
    altitude: 3.0,
    side: 4.0,
    ..MissionPlan::default()
  };
  let mut mission = Mission::prepare(&sim)?;
  mission.takeoff(&plan)?;

  let started = std::time::Instant::now();
  assert!(matches!(
    mission.return_to_launch(0.0),
    Err(VehicleError::Rejected(_))
  ));
  assert!(started.elapsed() < Duration::from_secs(1));

  mission.shutdown();
  assert!(sim.state().is_none());
  Ok(())
}
