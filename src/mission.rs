// 该文件是 Xunjian （巡检） 项目的一部分。
// src/mission.rs - 任务引导与收尾
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

use thiserror::Error;
use tracing::{error, info, warn};

use crate::vehicle::{PathOptions, Vector3, Vehicle, VehicleError};

#[derive(Error, Debug)]
pub enum MissionError {
  #[error("连接飞行器失败: {0}")]
  Connection(#[source] VehicleError),
  #[error("获取 API 控制权失败: {0}")]
  Control(#[source] VehicleError),
  #[error("解锁失败: {0}")]
  Arm(#[source] VehicleError),
  #[error("无法读取飞行器状态")]
  Telemetry,
  #[error("起飞失败: {0}")]
  Takeoff(#[source] VehicleError),
  #[error("路径任务下发失败: {0}")]
  Path(#[source] VehicleError),
}

/// 任务状态，仅由 [`Mission`] 持有并经由飞行器接口修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissionState {
  pub connected: bool,
  pub armed: bool,
  pub home_position: Option<Vector3>,
}

/// 方形巡检航线
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
  pub altitude: f32,
  pub side: f32,
  pub speed: f32,
  pub lookahead: f32,
  pub adaptive_lookahead: bool,
}

impl Default for MissionPlan {
  fn default() -> Self {
    Self {
      altitude: 10.0,
      side: 20.0,
      speed: 5.0,
      lookahead: 5.0,
      adaptive_lookahead: true,
    }
  }
}

impl MissionPlan {
  /// NED 坐标系下的方形航点，起点与终点重合
  pub fn waypoints(&self) -> Vec<Vector3> {
    let z = -self.altitude;
    let side = self.side;
    vec![
      Vector3::new(0.0, 0.0, z),
      Vector3::new(side, 0.0, z),
      Vector3::new(side, side, z),
      Vector3::new(0.0, side, z),
      Vector3::new(0.0, 0.0, z),
    ]
  }

  pub fn path_options(&self) -> PathOptions {
    PathOptions {
      speed: self.speed,
      lookahead: self.lookahead,
      adaptive_lookahead: self.adaptive_lookahead,
    }
  }
}

/// clap 参数解析：高度、边长与速度必须为正的有限数
pub fn parse_positive(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|e| format!("无效的数值 '{}': {}", s, e))?;
  if value.is_finite() && value > 0.0 {
    Ok(value)
  } else {
    Err(format!("必须为正的有限数, 实际为 {}", value))
  }
}

pub struct Mission<V: Vehicle> {
  vehicle: V,
  state: MissionState,
}

impl<V: Vehicle> Mission<V> {
  /// 连接、获取控制权、解锁并确认遥测可读；任一步失败都会断开连接
  pub fn prepare(vehicle: V) -> Result<Self, MissionError> {
    let mut mission = Mission {
      vehicle,
      state: MissionState::default(),
    };

    if let Err(e) = mission.vehicle.connect() {
      error!("连接失败: {}", e);
      return Err(MissionError::Connection(e));
    }
    mission.state.connected = true;
    info!("已连接");

    if let Err(e) = mission.vehicle.enable_api_control() {
      error!("获取 API 控制权失败: {}", e);
      mission.abort();
      return Err(MissionError::Control(e));
    }
    info!("API 控制已启用");

    if let Err(e) = mission.vehicle.arm() {
      error!("解锁失败: {}", e);
      mission.abort();
      return Err(MissionError::Arm(e));
    }
    mission.state.armed = true;
    info!("已解锁");

    match mission.vehicle.state() {
      Some(state) => info!("飞行器状态: {:?}", state),
      None => {
        error!("无法读取飞行器状态");
        mission.abort();
        return Err(MissionError::Telemetry);
      }
    }

    Ok(mission)
  }

  /// 起飞并记录起飞点；失败时上锁断开
  pub fn takeoff(&mut self, plan: &MissionPlan) -> Result<(), MissionError> {
    if let Err(e) = self.vehicle.takeoff(plan.altitude) {
      error!("起飞失败: {}", e);
      self.abort();
      return Err(MissionError::Takeoff(e));
    }
    self.state.home_position = self.vehicle.state().map(|s| s.position);
    info!("起飞完成，起飞点: {:?}", self.state.home_position);
    Ok(())
  }

  /// 下发非阻塞的路径任务；失败时降落收尾
  pub fn start_path(&mut self, plan: &MissionPlan) -> Result<(), MissionError> {
    let waypoints = plan.waypoints();
    info!("开始航点任务，共 {} 个航点", waypoints.len());
    if let Err(e) = self.vehicle.start_path(&waypoints, plan.path_options()) {
      error!("路径任务下发失败: {}", e);
      self.shutdown();
      return Err(MissionError::Path(e));
    }
    Ok(())
  }

  pub fn return_to_launch(&self, speed: f32) -> Result<(), VehicleError> {
    let Some(home) = self.state.home_position else {
      warn!("起飞点未设置，无法返航");
      return Err(VehicleError::Rejected("起飞点未设置".to_string()));
    };
    info!("返航至 {}", home);
    self.vehicle.move_to(home, speed)
  }

  /// 引导阶段中止：解锁状态下先上锁，然后断开连接
  pub fn abort(&mut self) {
    if self.state.armed {
      if let Err(e) = self.vehicle.disarm() {
        error!("上锁失败: {}", e);
      }
      self.state.armed = false;
    }
    self.disconnect();
  }

  /// 降落、上锁、断开，依次执行；降落失败只记录，不影响断开
  pub fn shutdown(&mut self) {
    if !self.state.connected {
      return;
    }
    info!("降落中");
    if let Err(e) = self.vehicle.land() {
      error!("降落失败: {}", e);
    }
    if let Err(e) = self.vehicle.disarm() {
      error!("上锁失败: {}", e);
    } else {
      info!("已上锁");
    }
    self.state.armed = false;
    self.disconnect();
  }

  fn disconnect(&mut self) {
    if self.state.connected {
      self.vehicle.disconnect();
      self.state.connected = false;
      info!("已断开连接");
    }
  }

  pub fn vehicle(&self) -> &V {
    &self.vehicle
  }

  pub fn state(&self) -> &MissionState {
    &self.state
  }
}

impl<V: Vehicle> Drop for Mission<V> {
  fn drop(&mut self) {
    if self.state.connected {
      warn!("任务未正常收尾，执行降落与断开");
      self.shutdown();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Event, RecordingVehicle};

  fn launch<V: Vehicle>(mission: &mut Mission<V>) {
    let plan = MissionPlan::default();
    mission.takeoff(&plan).unwrap();
    mission.start_path(&plan).unwrap();
  }

  #[test]
  fn plan_values_must_be_positive() {
    assert_eq!(parse_positive("2.5"), Ok(2.5));
    for bad in ["0", "-5", "NaN", "inf", "fast"] {
      assert!(parse_positive(bad).is_err(), "{}", bad);
    }
  }

  #[test]
  fn square_waypoints_in_ned() {
    let plan = MissionPlan::default();
    let wps = plan.waypoints();
    assert_eq!(wps.len(), 5);
    assert_eq!(wps[0], wps[4]);
    assert_eq!(wps[2], Vector3::new(20.0, 20.0, -10.0));
    assert!(wps.iter().all(|w| w.z == -10.0));
  }

  #[test]
  fn arm_failure_disconnects_without_takeoff() {
    let vehicle = RecordingVehicle::failing_at("arm");
    let log = vehicle.log();
    let result = Mission::prepare(vehicle);
    assert!(matches!(result, Err(MissionError::Arm(_))));
    assert_eq!(
      log.events(),
      vec![
        Event::Connect,
        Event::EnableControl,
        Event::Arm,
        Event::Disconnect
      ]
    );
  }

  #[test]
  fn connect_failure_is_terminal() {
    let vehicle = RecordingVehicle::failing_at("connect");
    let log = vehicle.log();
    assert!(matches!(
      Mission::prepare(vehicle),
      Err(MissionError::Connection(_))
    ));
    assert_eq!(log.events(), vec![Event::Connect]);
  }

  #[test]
  fn launch_records_home_and_starts_path_without_waiting() {
    let vehicle = RecordingVehicle::default();
    let log = vehicle.log();
    let mut mission = Mission::prepare(vehicle).unwrap();
    launch(&mut mission);
    assert!(mission.state().home_position.is_some());
    assert!(log.events().contains(&Event::StartPath(5)));
    mission.shutdown();

    let events = log.events();
    let tail = &events[events.len() - 3..];
    assert_eq!(tail, &[Event::Land, Event::Disarm, Event::Disconnect]);
    assert!(!mission.state().connected);
  }

  #[test]
  fn land_failure_still_disconnects() {
    let vehicle = RecordingVehicle::failing_at("land");
    let log = vehicle.log();
    let mut mission = Mission::prepare(vehicle).unwrap();
    launch(&mut mission);
    mission.shutdown();
    assert_eq!(log.events().last(), Some(&Event::Disconnect));
  }

  #[test]
  fn drop_lands_connected_mission() {
    let vehicle = RecordingVehicle::default();
    let log = vehicle.log();
    {
      let mut mission = Mission::prepare(vehicle).unwrap();
      launch(&mut mission);
    }
    let events = log.events();
    assert_eq!(
      &events[events.len() - 3..],
      &[Event::Land, Event::Disarm, Event::Disconnect]
    );
  }
}
