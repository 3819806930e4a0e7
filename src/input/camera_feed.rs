// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/camera_feed.rs - 机载相机
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

use tracing::debug;

use crate::{
  input::{Acquire, FrameSource},
  vehicle::{Vector3, Vehicle},
};

/// 从飞行器相机逐帧采集；实时来源不会结束
pub struct CameraFeed<V> {
  vehicle: V,
  camera: u32,
}

impl<V: Vehicle> CameraFeed<V> {
  pub fn new(vehicle: V, camera: u32) -> Self {
    Self { vehicle, camera }
  }
}

impl<V: Vehicle> FrameSource for CameraFeed<V> {
  fn acquire(&mut self) -> Acquire {
    match self.vehicle.capture_frame(self.camera) {
      Some(frame) => Acquire::Frame(frame),
      None => {
        debug!("相机 {} 本次未返回图像", self.camera);
        Acquire::Miss
      }
    }
  }

  fn position(&self) -> Option<Vector3> {
    self.vehicle.state().map(|s| s.position)
  }
}
