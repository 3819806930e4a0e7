// 该文件是 Xunjian （巡检） 项目的一部分。
// src/task.rs - 感知控制循环
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
  any::Any,
  fmt,
  panic::{self, AssertUnwindSafe},
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use ab_glyph::FontArc;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  control::{Command, ConfidenceThreshold},
  detector::{AnomalyDetector, DetectionResult},
  input::{Acquire, CameraFeed, FrameSource, StreamInfo},
  mission::{Mission, MissionPlan},
  output::{
    OutputError, PATROL_SNAPSHOT_PREFIX, REPLAY_SNAPSHOT_PREFIX, SnapshotWriter, Surface,
    overlay::{DisplayTarget, Overlay, OverlayInfo, OverlayStyle, Playback},
  },
  vehicle::Vehicle,
};

const LIVE_POLL_WAIT: Duration = Duration::from_millis(1);
const PAUSED_POLL_WAIT: Duration = Duration::from_millis(100);
const DEFAULT_REPLAY_FPS: f64 = 30.0;
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 安装 Ctrl-C 处理：第一次请求协作退出，第二次或超时后强制退出
pub fn install_interrupt_handler() -> anyhow::Result<Arc<AtomicBool>> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = flag.clone();
  ctrlc::set_handler(move || {
    if handler_flag.swap(true, Ordering::AcqRel) {
      warn!("再次收到中断信号，强制退出");
      std::process::exit(130);
    }
    info!("收到中断信号，准备退出...");
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(flag)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Running,
  Paused,
  Terminating,
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
  Quit,
  Interrupted,
  EndOfStream,
}

impl fmt::Display for Termination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Termination::Quit => write!(f, "操作员退出"),
      Termination::Interrupted => write!(f, "中断信号"),
      Termination::EndOfStream => write!(f, "输入结束"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// 处理了一帧
  Processed,
  /// 采集落空，未调用检测器
  Missed,
  /// 暂停中，未采集
  Idle,
  Terminating(Termination),
}

#[derive(Error, Debug)]
pub enum LoopError {
  #[error("显示输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("连续 {0} 次采集落空")]
  CaptureStalled(u32),
  #[error("感知循环 panic: {0}")]
  Panicked(String),
}

/// 运行期状态，只由循环线程读写
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopState {
  pub frame_count: u64,
  pub total_anomalies: u64,
  pub confidence: ConfidenceThreshold,
  pub fullscreen: bool,
  pub paused: bool,
}

impl LoopState {
  pub fn new(confidence: ConfidenceThreshold) -> Self {
    Self {
      frame_count: 0,
      total_anomalies: 0,
      confidence,
      fullscreen: false,
      paused: false,
    }
  }
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
  pub frames: u64,
  pub total_anomalies: u64,
  pub misses: u64,
  /// (帧号, 该帧异常数)，取最早出现的最大值
  pub peak: Option<(u64, u32)>,
  pub termination: Option<Termination>,
}

impl RunSummary {
  fn record(&mut self, frame_index: u64, anomalies: u32) {
    self.frames = frame_index;
    self.total_anomalies += anomalies as u64;
    if anomalies > 0 && self.peak.is_none_or(|(_, best)| anomalies > best) {
      self.peak = Some((frame_index, anomalies));
    }
  }

  pub fn average(&self) -> f64 {
    if self.frames == 0 {
      0.0
    } else {
      self.total_anomalies as f64 / self.frames as f64
    }
  }

  pub fn log(&self) {
    info!("已处理帧数: {}", self.frames);
    info!("累计检测数: {}", self.total_anomalies);
    info!("平均每帧: {:.2}", self.average());
    if self.misses > 0 {
      info!("采集落空: {} 次", self.misses);
    }
    if let Some((frame, count)) = self.peak {
      info!("单帧最多: {} 处（第 {} 帧）", count, frame);
    }
  }
}

pub struct LoopConfig {
  pub style: OverlayStyle,
  pub target: DisplayTarget,
  /// 每帧处理后的按键轮询等待
  pub poll_wait: Duration,
  pub paused_wait: Duration,
  /// 连续采集落空达到该次数即终止；None 表示无限重试
  pub max_consecutive_misses: Option<u32>,
  pub snapshots: SnapshotWriter,
  pub font: Option<FontArc>,
}

impl LoopConfig {
  pub fn patrol(save_dir: impl AsRef<Path>) -> Self {
    Self {
      style: OverlayStyle::Patrol,
      target: DisplayTarget::LIVE,
      poll_wait: LIVE_POLL_WAIT,
      paused_wait: PAUSED_POLL_WAIT,
      max_consecutive_misses: None,
      snapshots: SnapshotWriter::new(save_dir, PATROL_SNAPSHOT_PREFIX),
      font: None,
    }
  }

  /// 按源帧率节流：每帧等待 1000/fps 毫秒
  pub fn replay(save_dir: impl AsRef<Path>, fps: Option<f64>) -> Self {
    let fps = fps.filter(|f| *f > 0.0).unwrap_or(DEFAULT_REPLAY_FPS);
    Self {
      style: OverlayStyle::Replay,
      target: DisplayTarget::REPLAY,
      poll_wait: Duration::from_millis(((1000.0 / fps) as u64).max(1)),
      paused_wait: PAUSED_POLL_WAIT,
      max_consecutive_misses: None,
      snapshots: SnapshotWriter::new(save_dir, REPLAY_SNAPSHOT_PREFIX),
      font: None,
    }
  }

  pub fn with_font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn with_max_misses(mut self, max: Option<u32>) -> Self {
    self.max_consecutive_misses = max.filter(|m| *m > 0);
    self
  }
}

struct Rendered {
  annotated: RgbImage,
  info: OverlayInfo,
  image: RgbImage,
}

/// 采集、检测、汇总、渲染、呈现、轮询
pub struct PerceptionLoop<S, D, P> {
  source: S,
  detector: D,
  surface: P,
  state: LoopState,
  config: LoopConfig,
  overlay: Overlay,
  stream: StreamInfo,
  interrupt: Arc<AtomicBool>,
  last: Option<Rendered>,
  consecutive_misses: u32,
  summary: RunSummary,
  termination: Option<Termination>,
  closed: bool,
}

impl<S, D, P> PerceptionLoop<S, D, P>
where
  S: FrameSource,
  D: AnomalyDetector,
  P: Surface,
{
  pub fn new(
    source: S,
    detector: D,
    surface: P,
    state: LoopState,
    config: LoopConfig,
    interrupt: Arc<AtomicBool>,
  ) -> Self {
    let overlay = Overlay::new(config.font.clone(), config.style, config.target);
    let stream = source.info();
    Self {
      source,
      detector,
      surface,
      state,
      config,
      overlay,
      stream,
      interrupt,
      last: None,
      consecutive_misses: 0,
      summary: RunSummary::default(),
      termination: None,
      closed: false,
    }
  }

  pub fn state(&self) -> &LoopState {
    &self.state
  }

  pub fn summary(&self) -> &RunSummary {
    &self.summary
  }

  pub fn phase(&self) -> Phase {
    if self.closed {
      Phase::Terminated
    } else if self.termination.is_some() {
      Phase::Terminating
    } else if self.state.paused {
      Phase::Paused
    } else {
      Phase::Running
    }
  }

  pub fn tick(&mut self) -> Result<TickOutcome, LoopError> {
    if let Some(cause) = self.termination {
      return Ok(TickOutcome::Terminating(cause));
    }
    if self.interrupt.load(Ordering::Acquire) {
      return Ok(self.terminate(Termination::Interrupted));
    }
    if self.state.paused {
      if let Some(last) = &self.last {
        self.surface.present(&last.image, self.state.fullscreen)?;
      }
      return self.poll(self.config.paused_wait, TickOutcome::Idle);
    }

    let frame = match self.source.acquire() {
      Acquire::Frame(frame) => {
        self.consecutive_misses = 0;
        frame
      }
      Acquire::Miss => return self.on_miss(),
      Acquire::End => {
        info!("输入已结束");
        return Ok(self.terminate(Termination::EndOfStream));
      }
    };

    let index = self.state.frame_count + 1;
    let confidence = self.state.confidence.value();
    let result = match self.detector.detect(&frame, confidence) {
      Ok(result) => result,
      Err(e) => {
        error!("第 {} 帧检测出错: {}", index, e);
        DetectionResult::clear(&frame, confidence)
      }
    };

    self.state.frame_count = index;
    self.state.total_anomalies += result.anomaly_count as u64;
    self.summary.record(index, result.anomaly_count);
    if result.anomaly_count > 0 {
      warn!("第 {} 帧检测到 {} 处裂缝", index, result.anomaly_count);
    } else {
      debug!("第 {} 帧无异常", index);
    }

    let info = self.overlay_info(result.anomaly_count, frame.timestamp_ms());
    let image = self.overlay.render(&result.annotated, &info);
    self.surface.present(&image, self.state.fullscreen)?;
    self.last = Some(Rendered {
      annotated: result.annotated,
      info,
      image,
    });

    self.poll(self.config.poll_wait, TickOutcome::Processed)
  }

  /// 运行至终止，返回统计
  pub fn run(&mut self) -> Result<RunSummary, LoopError> {
    info!("感知循环开始，置信度阈值 {}", self.state.confidence);
    loop {
      if let TickOutcome::Terminating(cause) = self.tick()? {
        info!("感知循环结束: {}", cause);
        self.summary.termination = Some(cause);
        return Ok(self.summary.clone());
      }
    }
  }

  /// 与 [`Self::run`] 相同，但循环体中的 panic 被转换为错误
  pub fn run_guarded(&mut self) -> Result<RunSummary, LoopError> {
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
      Ok(outcome) => outcome,
      Err(payload) => Err(LoopError::Panicked(panic_message(payload.as_ref()))),
    };
    if let Err(e) = &outcome {
      error!("感知循环异常终止: {}", e);
    }
    self.summary.log();
    outcome
  }

  /// 关闭显示，必须先于降落与断开
  pub fn close(&mut self) {
    if !self.closed {
      self.surface.close();
      self.closed = true;
      info!("显示已关闭");
    }
  }

  fn terminate(&mut self, cause: Termination) -> TickOutcome {
    self.termination = Some(cause);
    TickOutcome::Terminating(cause)
  }

  fn on_miss(&mut self) -> Result<TickOutcome, LoopError> {
    self.consecutive_misses += 1;
    self.summary.misses += 1;
    if let Some(limit) = self.config.max_consecutive_misses
      && self.consecutive_misses >= limit
    {
      error!("连续 {} 次采集落空，终止", self.consecutive_misses);
      return Err(LoopError::CaptureStalled(self.consecutive_misses));
    }
    debug!("采集落空（连续 {} 次）", self.consecutive_misses);
    self.poll(self.config.poll_wait, TickOutcome::Missed)
  }

  fn poll(&mut self, wait: Duration, outcome: TickOutcome) -> Result<TickOutcome, LoopError> {
    if let Some(command) = self.surface.poll_command(wait)? {
      self.dispatch(command);
    }
    Ok(match self.termination {
      Some(cause) => TickOutcome::Terminating(cause),
      None => outcome,
    })
  }

  fn dispatch(&mut self, command: Command) {
    match command {
      Command::Quit => {
        info!("退出中...");
        self.termination = Some(Termination::Quit);
      }
      Command::Save => self.save_snapshot(),
      Command::ToggleFullscreen => {
        self.state.fullscreen = !self.state.fullscreen;
        info!("全屏: {}", if self.state.fullscreen { "开" } else { "关" });
      }
      Command::IncreaseConfidence => {
        self.state.confidence = self.state.confidence.increase();
        info!("置信度阈值: {}", self.state.confidence);
        self.refresh_paused_frame();
      }
      Command::DecreaseConfidence => {
        self.state.confidence = self.state.confidence.decrease();
        info!("置信度阈值: {}", self.state.confidence);
        self.refresh_paused_frame();
      }
      Command::TogglePause if self.config.style == OverlayStyle::Replay => {
        self.state.paused = !self.state.paused;
        info!("{}", if self.state.paused { "已暂停" } else { "继续播放" });
        if let Some(last) = self.last.as_mut()
          && let Some(playback) = last.info.playback.as_mut()
        {
          playback.paused = self.state.paused;
        }
        self.rerender_last();
      }
      Command::TogglePause => debug!("实时模式不支持暂停"),
    }
  }

  /// 暂停期间反复呈现的是最后一帧，阈值变化需要立即体现在画面上
  fn refresh_paused_frame(&mut self) {
    if !self.state.paused {
      return;
    }
    if let Some(last) = self.last.as_mut() {
      last.info.confidence = self.state.confidence;
    }
    self.rerender_last();
  }

  fn rerender_last(&mut self) {
    if let Some(last) = self.last.as_mut() {
      last.image = self.overlay.render(&last.annotated, &last.info);
    }
  }

  fn save_snapshot(&self) {
    let Some(last) = &self.last else {
      warn!("尚无可保存的画面");
      return;
    };
    if let Err(e) = self.config.snapshots.save(&last.image, self.state.frame_count) {
      error!("保存快照失败: {}", e);
    }
  }

  fn overlay_info(&self, frame_anomalies: u32, timestamp_ms: Option<u64>) -> OverlayInfo {
    let playback = match self.config.style {
      OverlayStyle::Replay => Some(Playback {
        paused: self.state.paused,
        fps: self.stream.fps.unwrap_or(DEFAULT_REPLAY_FPS),
        total_frames: self.stream.total_frames,
      }),
      OverlayStyle::Patrol => None,
    };
    OverlayInfo {
      frame_index: self.state.frame_count,
      timestamp_ms,
      frame_anomalies,
      total_anomalies: self.state.total_anomalies,
      confidence: self.state.confidence,
      position: self.source.position(),
      playback,
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知 panic".to_string()
  }
}

pub struct PatrolOptions {
  pub plan: MissionPlan,
  pub camera: u32,
  pub confidence: ConfidenceThreshold,
  /// 降落前先飞回起飞点
  pub return_home: bool,
  pub loop_config: LoopConfig,
}

/// 实时巡检：引导任务、初始化检测器、运行感知循环，并保证收尾
///
/// 收尾顺序固定为：关闭显示、（可选）返航、降落、上锁、断开。
pub fn run_patrol<V, D, P, F>(
  vehicle: V,
  options: PatrolOptions,
  init_detector: F,
  surface: P,
  interrupt: Arc<AtomicBool>,
) -> anyhow::Result<RunSummary>
where
  V: Vehicle,
  D: AnomalyDetector,
  P: Surface,
  F: FnOnce() -> anyhow::Result<D>,
{
  let PatrolOptions {
    plan,
    camera,
    confidence,
    return_home,
    loop_config,
  } = options;

  let mut mission = Mission::prepare(vehicle)?;
  mission.takeoff(&plan)?;

  let detector = match init_detector() {
    Ok(detector) => detector,
    Err(e) => {
      error!("检测器初始化失败: {:#}", e);
      mission.shutdown();
      return Err(e.context("检测器初始化失败"));
    }
  };
  info!("检测器已就绪");

  mission.start_path(&plan)?;

  let outcome = {
    let source = CameraFeed::new(mission.vehicle(), camera);
    let mut perception = PerceptionLoop::new(
      source,
      detector,
      surface,
      LoopState::new(confidence),
      loop_config,
      interrupt,
    );
    let outcome = perception.run_guarded();
    perception.close();
    outcome
  };

  if return_home && let Err(e) = mission.return_to_launch(plan.speed) {
    error!("返航失败: {}", e);
  }
  mission.shutdown();

  Ok(outcome?)
}

/// 回放检测：来源耗尽、操作员退出或中断时结束
pub fn run_replay<S, D, P>(
  source: S,
  detector: D,
  surface: P,
  confidence: ConfidenceThreshold,
  config: LoopConfig,
  interrupt: Arc<AtomicBool>,
) -> anyhow::Result<RunSummary>
where
  S: FrameSource,
  D: AnomalyDetector,
  P: Surface,
{
  let mut perception = PerceptionLoop::new(
    source,
    detector,
    surface,
    LoopState::new(confidence),
    config,
    interrupt,
  );
  let outcome = perception.run_guarded();
  perception.close();
  Ok(outcome?)
}
