// 该文件是 Xunjian （巡检） 项目的一部分。
// src/vehicle.rs - 飞行器接口定义
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

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod sim;
pub use self::sim::{SimFault, SimVehicle, SimVehicleConfig};

/// 本地 NED 坐标系下的三维向量（x 向北，y 向东，z 向下）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
  pub x: f32,
  pub y: f32,
  pub z: f32,
}

impl Vector3 {
  pub const fn new(x: f32, y: f32, z: f32) -> Self {
    Self { x, y, z }
  }

  pub fn distance(&self, other: &Vector3) -> f32 {
    let (dx, dy, dz) = (other.x - self.x, other.y - self.y, other.z - self.z);
    (dx * dx + dy * dy + dz * dz).sqrt()
  }
}

impl From<(f32, f32, f32)> for Vector3 {
  fn from((x, y, z): (f32, f32, f32)) -> Self {
    Self { x, y, z }
  }
}

impl fmt::Display for Vector3 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
  }
}

/// 遥测快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleState {
  pub position: Vector3,
  pub velocity: Vector3,
  pub landed: bool,
}

/// 路径跟随参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathOptions {
  pub speed: f32,
  pub lookahead: f32,
  pub adaptive_lookahead: bool,
}

impl Default for PathOptions {
  fn default() -> Self {
    Self {
      speed: 5.0,
      lookahead: 5.0,
      adaptive_lookahead: true,
    }
  }
}

#[derive(Error, Debug)]
pub enum VehicleError {
  #[error("飞行器未连接")]
  NotConnected,
  #[error("链路错误: {0}")]
  Link(String),
  #[error("指令被拒绝: {0}")]
  Rejected(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {name} 必须为正的有限数, 实际为 {value}")]
  InvalidParameter { name: &'static str, value: f32 },
  #[error("仿真地图加载错误: {0}")]
  MapLoad(#[from] image::ImageError),
}

/// 飞行器接口
///
/// 视为不透明的远程过程服务。所有方法取 `&self`，实现内部自行处理可变状态，
/// 这样感知循环在借用相机的同时，任务收尾仍可下发降落指令。
pub trait Vehicle {
  fn connect(&self) -> Result<(), VehicleError>;
  fn enable_api_control(&self) -> Result<(), VehicleError>;
  fn arm(&self) -> Result<(), VehicleError>;
  fn disarm(&self) -> Result<(), VehicleError>;

  /// 阻塞直至飞行器报告已升空
  fn takeoff(&self, altitude: f32) -> Result<(), VehicleError>;

  /// 阻塞直至飞行器报告已着陆
  fn land(&self) -> Result<(), VehicleError>;

  /// 阻塞直至到达目标点
  fn move_to(&self, position: Vector3, speed: f32) -> Result<(), VehicleError>;

  /// 下发路径跟随指令后立即返回，飞行器在自己的执行上下文中继续飞行
  fn start_path(&self, waypoints: &[Vector3], options: PathOptions) -> Result<(), VehicleError>;

  fn state(&self) -> Option<VehicleState>;

  /// 采集一帧图像；返回 None 表示本次采集落空，属于瞬时情况
  fn capture_frame(&self, camera: u32) -> Option<Frame>;

  fn disconnect(&self);
}

impl<V: Vehicle + ?Sized> Vehicle for &V {
  fn connect(&self) -> Result<(), VehicleError> {
    (**self).connect()
  }

  fn enable_api_control(&self) -> Result<(), VehicleError> {
    (**self).enable_api_control()
  }

  fn arm(&self) -> Result<(), VehicleError> {
    (**self).arm()
  }

  fn disarm(&self) -> Result<(), VehicleError> {
    (**self).disarm()
  }

  fn takeoff(&self, altitude: f32) -> Result<(), VehicleError> {
    (**self).takeoff(altitude)
  }

  fn land(&self) -> Result<(), VehicleError> {
    (**self).land()
  }

  fn move_to(&self, position: Vector3, speed: f32) -> Result<(), VehicleError> {
    (**self).move_to(position, speed)
  }

  fn start_path(&self, waypoints: &[Vector3], options: PathOptions) -> Result<(), VehicleError> {
    (**self).start_path(waypoints, options)
  }

  fn state(&self) -> Option<VehicleState> {
    (**self).state()
  }

  fn capture_frame(&self, camera: u32) -> Option<Frame> {
    (**self).capture_frame(camera)
  }

  fn disconnect(&self) {
    (**self).disconnect()
  }
}

pub enum VehicleWrapper {
  Sim(SimVehicle),
}

impl FromUrl for VehicleWrapper {
  type Error = VehicleError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SimVehicle::SCHEME => Ok(VehicleWrapper::Sim(SimVehicle::from_url(url)?)),
      _ => Err(VehicleError::SchemeMismatch),
    }
  }
}

impl VehicleWrapper {
  fn inner(&self) -> &dyn Vehicle {
    match self {
      VehicleWrapper::Sim(vehicle) => vehicle,
    }
  }
}

impl Vehicle for VehicleWrapper {
  fn connect(&self) -> Result<(), VehicleError> {
    self.inner().connect()
  }

  fn enable_api_control(&self) -> Result<(), VehicleError> {
    self.inner().enable_api_control()
  }

  fn arm(&self) -> Result<(), VehicleError> {
    self.inner().arm()
  }

  fn disarm(&self) -> Result<(), VehicleError> {
    self.inner().disarm()
  }

  fn takeoff(&self, altitude: f32) -> Result<(), VehicleError> {
    self.inner().takeoff(altitude)
  }

  fn land(&self) -> Result<(), VehicleError> {
    self.inner().land()
  }

  fn move_to(&self, position: Vector3, speed: f32) -> Result<(), VehicleError> {
    self.inner().move_to(position, speed)
  }

  fn start_path(&self, waypoints: &[Vector3], options: PathOptions) -> Result<(), VehicleError> {
    self.inner().start_path(waypoints, options)
  }

  fn state(&self) -> Option<VehicleState> {
    self.inner().state()
  }

  fn capture_frame(&self, camera: u32) -> Option<Frame> {
    self.inner().capture_frame(camera)
  }

  fn disconnect(&self) {
    self.inner().disconnect()
  }
}
