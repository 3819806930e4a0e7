// 该文件是 Xunjian （巡检） 项目的一部分。
// src/testing.rs - 单元测试共用的替身实现
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
  cell::{Cell, RefCell},
  collections::{HashMap, VecDeque},
  rc::Rc,
  time::Duration,
};

use image::{Rgb, RgbImage};

use crate::{
  control::Command,
  detector::{AnomalyDetector, DetectError, DetectionResult},
  frame::Frame,
  input::{Acquire, FrameSource, StreamInfo},
  output::{OutputError, Surface},
  vehicle::{PathOptions, Vector3, Vehicle, VehicleError, VehicleState},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  Connect,
  EnableControl,
  Arm,
  Disarm,
  Takeoff,
  Land,
  MoveTo,
  StartPath(usize),
  Capture,
  Disconnect,
  DetectorInit,
  Acquire,
  /// 本次检测使用的阈值（万分比）
  Detect(u16),
  Present,
  CloseSurface,
}

/// 多个替身共享的有序事件记录
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
  pub fn push(&self, event: Event) {
    self.0.borrow_mut().push(event);
  }

  pub fn events(&self) -> Vec<Event> {
    self.0.borrow().clone()
  }

  pub fn count(&self, event: &Event) -> usize {
    self.0.borrow().iter().filter(|e| *e == event).count()
  }

  pub fn position(&self, event: &Event) -> Option<usize> {
    self.0.borrow().iter().position(|e| e == event)
  }

  pub fn last_position(&self, event: &Event) -> Option<usize> {
    self.0.borrow().iter().rposition(|e| e == event)
  }
}

pub fn test_frame() -> Frame {
  Frame::from(RgbImage::from_pixel(16, 12, Rgb([90, 90, 90])))
}

/// 记录每次调用的飞行器
#[derive(Debug, Default)]
pub struct RecordingVehicle {
  log: EventLog,
  fail_at: Option<&'static str>,
  blind: bool,
  position: Cell<Vector3>,
}

impl RecordingVehicle {
  pub fn failing_at(stage: &'static str) -> Self {
    Self {
      fail_at: Some(stage),
      ..Default::default()
    }
  }

  /// 相机始终采集落空
  pub fn blind() -> Self {
    Self {
      blind: true,
      ..Default::default()
    }
  }

  pub fn log(&self) -> EventLog {
    self.log.clone()
  }

  fn step(&self, event: Event, stage: &str) -> Result<(), VehicleError> {
    self.log.push(event);
    if self.fail_at == Some(stage) {
      return Err(VehicleError::Rejected(format!("{} 失败", stage)));
    }
    Ok(())
  }
}

impl Vehicle for RecordingVehicle {
  fn connect(&self) -> Result<(), VehicleError> {
    self.step(Event::Connect, "connect")
  }

  fn enable_api_control(&self) -> Result<(), VehicleError> {
    self.step(Event::EnableControl, "control")
  }

  fn arm(&self) -> Result<(), VehicleError> {
    self.step(Event::Arm, "arm")
  }

  fn disarm(&self) -> Result<(), VehicleError> {
    self.step(Event::Disarm, "disarm")
  }

  fn takeoff(&self, altitude: f32) -> Result<(), VehicleError> {
    self.step(Event::Takeoff, "takeoff")?;
    self.position.set(Vector3::new(0.0, 0.0, -altitude));
    Ok(())
  }

  fn land(&self) -> Result<(), VehicleError> {
    self.step(Event::Land, "land")
  }

  fn move_to(&self, position: Vector3, _speed: f32) -> Result<(), VehicleError> {
    self.step(Event::MoveTo, "move_to")?;
    self.position.set(position);
    Ok(())
  }

  fn start_path(&self, waypoints: &[Vector3], _options: PathOptions) -> Result<(), VehicleError> {
    self.step(Event::StartPath(waypoints.len()), "start_path")
  }

  fn state(&self) -> Option<VehicleState> {
    Some(VehicleState {
      position: self.position.get(),
      ..Default::default()
    })
  }

  fn capture_frame(&self, _camera: u32) -> Option<Frame> {
    self.log.push(Event::Capture);
    if self.blind { None } else { Some(test_frame()) }
  }

  fn disconnect(&self) {
    self.log.push(Event::Disconnect);
  }
}

/// 预设序列的帧来源；序列用完后结束，或在 endless 模式下持续给帧
pub struct ScriptedSource {
  log: EventLog,
  script: VecDeque<Acquire>,
  endless: bool,
  info: StreamInfo,
}

impl ScriptedSource {
  pub fn new(log: EventLog, script: Vec<Acquire>) -> Self {
    Self {
      log,
      script: script.into(),
      endless: false,
      info: StreamInfo::default(),
    }
  }

  pub fn frames(log: EventLog, n: usize) -> Self {
    Self::new(log, (0..n).map(|_| Acquire::Frame(test_frame())).collect())
  }

  pub fn endless(log: EventLog) -> Self {
    Self {
      endless: true,
      ..Self::new(log, Vec::new())
    }
  }

  pub fn with_info(mut self, info: StreamInfo) -> Self {
    self.info = info;
    self
  }
}

impl FrameSource for ScriptedSource {
  fn acquire(&mut self) -> Acquire {
    self.log.push(Event::Acquire);
    match self.script.pop_front() {
      Some(step) => step,
      None if self.endless => Acquire::Frame(test_frame()),
      None => Acquire::End,
    }
  }

  fn info(&self) -> StreamInfo {
    self.info
  }
}

#[derive(Debug, Clone, Copy)]
pub enum DetectStep {
  Count(u32),
  Fail,
  Panic,
}

/// 按脚本返回异常数量的检测器；脚本用完后返回零
pub struct ScriptedDetector {
  log: EventLog,
  script: VecDeque<DetectStep>,
}

impl ScriptedDetector {
  pub fn new(log: EventLog, script: Vec<DetectStep>) -> Self {
    Self {
      log,
      script: script.into(),
    }
  }
}

impl AnomalyDetector for ScriptedDetector {
  fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult, DetectError> {
    self
      .log
      .push(Event::Detect((confidence * 10_000.0).round() as u16));
    match self.script.pop_front().unwrap_or(DetectStep::Count(0)) {
      DetectStep::Count(n) => Ok(DetectionResult {
        anomaly_count: n,
        ..DetectionResult::clear(frame, confidence)
      }),
      DetectStep::Fail => Err(DetectError::Inference("脚本注入失败".to_string())),
      DetectStep::Panic => panic!("脚本注入 panic"),
    }
  }
}

#[derive(Debug, Default)]
pub struct SurfaceRecord {
  pub waits: Vec<Duration>,
  /// (宽, 高, 全屏)
  pub presented: Vec<(u32, u32, bool)>,
  pub closed: bool,
}

/// 在第 N 次轮询时返回预设指令的显示面
pub struct ScriptedSurface {
  log: EventLog,
  commands: HashMap<usize, Command>,
  polls: usize,
  record: Rc<RefCell<SurfaceRecord>>,
}

impl ScriptedSurface {
  pub fn new(log: EventLog) -> Self {
    Self {
      log,
      commands: HashMap::new(),
      polls: 0,
      record: Rc::default(),
    }
  }

  /// 第 `poll` 次轮询（从 0 开始）返回 `command`
  pub fn on_poll(mut self, poll: usize, command: Command) -> Self {
    self.commands.insert(poll, command);
    self
  }

  pub fn record(&self) -> Rc<RefCell<SurfaceRecord>> {
    self.record.clone()
  }
}

impl Surface for ScriptedSurface {
  fn present(&mut self, image: &RgbImage, fullscreen: bool) -> Result<(), OutputError> {
    self.log.push(Event::Present);
    self
      .record
      .borrow_mut()
      .presented
      .push((image.width(), image.height(), fullscreen));
    Ok(())
  }

  fn poll_command(&mut self, wait: Duration) -> Result<Option<Command>, OutputError> {
    self.record.borrow_mut().waits.push(wait);
    let command = self.commands.get(&self.polls).copied();
    self.polls += 1;
    Ok(command)
  }

  fn close(&mut self) {
    self.log.push(Event::CloseSurface);
    self.record.borrow_mut().closed = true;
  }
}
