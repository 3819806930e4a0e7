// 该文件是 Xunjian （巡检） 项目的一部分。
// src/vehicle/sim.rs - 进程内运动学仿真飞行器
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

//! # 仿真飞行器
//!
//! 在进程内模拟一架多旋翼：起飞、降落与定点飞行在调用线程中阻塞完成，
//! 路径任务则在独立线程中推进，调用方不等待其完成。
//!
//! 下视相机从地面纹理中按当前位置与高度裁切出画面。地面纹理可以来自
//! 图像文件，缺省时程序化生成带有裂缝的混凝土路面。
//!
//! ## URL Scheme
//!
//! `sim://local?width=640&height=480&miss_every=0&climb_rate=2&time_scale=1`
//!
//! - `map`: 地面纹理图像路径
//! - `ppm`: 地面纹理每米像素数，默认 16
//! - `miss_every`: 每 N 次采集模拟一次采集落空，0 表示不落空
//! - `time_scale`: 仿真时间相对墙上时间的倍率
//! - `fail`: 注入故障，取值 `connect`、`control`、`arm`、`takeoff`

use std::{
  path::PathBuf,
  str::FromStr,
  sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use tracing::{debug, info, warn};
use url::Url;

use super::{PathOptions, Vector3, Vehicle, VehicleError, VehicleState};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_or};

const PROCEDURAL_MAP_SIZE: u32 = 1024;
const DEFAULT_PIXELS_PER_METER: f32 = 16.0;
/// 地面纹理中心对应的世界坐标（北, 东），即巡检方形航线的中心
const MAP_CENTER: (f32, f32) = (10.0, 10.0);
const CAMERA_HFOV_DEG: f32 = 90.0;
const MIN_CAMERA_ALTITUDE: f32 = 1.0;
const OUTSIDE_MAP_COLOR: [u8; 3] = [70, 110, 60];
const CRACK_COLOR: [u8; 3] = [38, 36, 34];

/// 可注入的引导阶段故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
  Connect,
  Control,
  Arm,
  Takeoff,
}

impl FromStr for SimFault {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "connect" => Ok(SimFault::Connect),
      "control" => Ok(SimFault::Control),
      "arm" => Ok(SimFault::Arm),
      "takeoff" => Ok(SimFault::Takeoff),
      other => Err(format!("未知的故障类型: {}", other)),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SimVehicleConfig {
  pub width: u32,
  pub height: u32,
  pub miss_every: u64,
  /// 爬升/下降速率（米/秒）
  pub climb_rate: f32,
  /// 积分步长
  pub tick: Duration,
  pub time_scale: f32,
  pub map: Option<PathBuf>,
  pub pixels_per_meter: f32,
  pub fault: Option<SimFault>,
}

impl Default for SimVehicleConfig {
  fn default() -> Self {
    Self {
      width: 640,
      height: 480,
      miss_every: 0,
      climb_rate: 2.0,
      tick: Duration::from_millis(20),
      time_scale: 1.0,
      map: None,
      pixels_per_meter: DEFAULT_PIXELS_PER_METER,
      fault: None,
    }
  }
}

#[derive(Debug, Default)]
struct Link {
  connected: bool,
  api_control: bool,
  armed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Kinematics {
  position: Vector3,
  velocity: Vector3,
  landed: bool,
}

impl Default for Kinematics {
  fn default() -> Self {
    Self {
      position: Vector3::default(),
      velocity: Vector3::default(),
      landed: true,
    }
  }
}

struct PathRun {
  stop: Arc<AtomicBool>,
  handle: JoinHandle<()>,
}

/// 地面纹理，像素 (0, 0) 位于西北角
struct GroundMap {
  image: RgbImage,
  pixels_per_meter: f32,
  top_north: f32,
  left_east: f32,
}

impl GroundMap {
  fn new(image: RgbImage, pixels_per_meter: f32) -> Self {
    let top_north = MAP_CENTER.0 + image.height() as f32 / 2.0 / pixels_per_meter;
    let left_east = MAP_CENTER.1 - image.width() as f32 / 2.0 / pixels_per_meter;
    Self {
      image,
      pixels_per_meter,
      top_north,
      left_east,
    }
  }

  fn to_pixel(&self, north: f32, east: f32) -> (f32, f32) {
    (
      (east - self.left_east) * self.pixels_per_meter,
      (self.top_north - north) * self.pixels_per_meter,
    )
  }

  fn sample(&self, north: f32, east: f32) -> Rgb<u8> {
    let (px, py) = self.to_pixel(north, east);
    if px < 0.0 || py < 0.0 {
      return Rgb(OUTSIDE_MAP_COLOR);
    }
    let (px, py) = (px as u32, py as u32);
    if px >= self.image.width() || py >= self.image.height() {
      return Rgb(OUTSIDE_MAP_COLOR);
    }
    *self.image.get_pixel(px, py)
  }

  /// 按位置与高度渲染下视相机画面
  fn render(&self, position: Vector3, width: u32, height: u32) -> RgbImage {
    let altitude = (-position.z).max(MIN_CAMERA_ALTITUDE);
    let footprint = 2.0 * altitude * (CAMERA_HFOV_DEG.to_radians() / 2.0).tan();
    let meters_per_pixel = footprint / width as f32;
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    RgbImage::from_fn(width, height, |u, v| {
      let east = position.y + (u as f32 - cx) * meters_per_pixel;
      let north = position.x - (v as f32 - cy) * meters_per_pixel;
      self.sample(north, east)
    })
  }

  /// 程序化生成带裂缝的混凝土路面
  fn procedural(pixels_per_meter: f32) -> Self {
    let size = PROCEDURAL_MAP_SIZE;
    let mut image = RgbImage::from_fn(size, size, |x, y| {
      let n = (hash2(x / 2, y / 2) % 41) as i32 - 20;
      let v = (150 + n).clamp(0, 255) as u8;
      Rgb([v, v, v.saturating_sub(6)])
    });

    let mut map = Self {
      image: RgbImage::new(1, 1),
      pixels_per_meter,
      top_north: 0.0,
      left_east: 0.0,
    };
    map.top_north = MAP_CENTER.0 + size as f32 / 2.0 / pixels_per_meter;
    map.left_east = MAP_CENTER.1 - size as f32 / 2.0 / pixels_per_meter;

    // 裂缝沿巡检航线分布
    let seeds: [(f32, f32); 6] = [
      (0.5, 7.0),
      (8.0, 19.5),
      (19.5, 13.0),
      (14.0, 0.5),
      (19.8, 3.0),
      (3.0, 20.2),
    ];
    let mut rng = XorShift(0x9e37_79b9);
    for (north, east) in seeds {
      let (mut x, mut y) = map.to_pixel(north, east);
      let mut heading = rng.unit() * std::f32::consts::TAU;
      for _ in 0..14 {
        heading += (rng.unit() - 0.5) * 1.2;
        let len = (0.3 + rng.unit() * 0.4) * pixels_per_meter;
        let (nx, ny) = (x + heading.cos() * len, y + heading.sin() * len);
        for offset in [-1.0f32, 0.0, 1.0] {
          draw_line_segment_mut(
            &mut image,
            (x + offset, y),
            (nx + offset, ny),
            Rgb(CRACK_COLOR),
          );
          draw_line_segment_mut(
            &mut image,
            (x, y + offset),
            (nx, ny + offset),
            Rgb(CRACK_COLOR),
          );
        }
        (x, y) = (nx, ny);
      }
    }

    map.image = image;
    map
  }
}

fn hash2(x: u32, y: u32) -> u32 {
  let mut h = x
    .wrapping_mul(374_761_393)
    .wrapping_add(y.wrapping_mul(668_265_263));
  h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
  h ^ (h >> 16)
}

struct XorShift(u32);

impl XorShift {
  fn unit(&mut self) -> f32 {
    self.0 ^= self.0 << 13;
    self.0 ^= self.0 >> 17;
    self.0 ^= self.0 << 5;
    (self.0 >> 8) as f32 / (1u32 << 24) as f32
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 运动参数必须为正的有限数，否则阻塞飞行永远无法到达目标
fn positive(name: &'static str, value: f32) -> Result<f32, VehicleError> {
  if value.is_finite() && value > 0.0 {
    Ok(value)
  } else {
    Err(VehicleError::InvalidParameter { name, value })
  }
}

/// 运动指令的参数检查，失败视为指令被拒绝
fn motion(name: &'static str, value: f32) -> Result<f32, VehicleError> {
  positive(name, value).map_err(|e| {
    warn!("{}", e);
    VehicleError::Rejected(e.to_string())
  })
}

/// 朝目标前进一步，返回是否已到达
fn step_toward(k: &mut Kinematics, target: Vector3, speed: f32, dt: f32) -> bool {
  let max_step = speed * dt;
  let distance = k.position.distance(&target);
  if distance <= max_step || distance <= f32::EPSILON {
    k.position = target;
    k.velocity = Vector3::default();
    return true;
  }
  let ratio = max_step / distance;
  let p = k.position;
  let next = Vector3::new(
    p.x + (target.x - p.x) * ratio,
    p.y + (target.y - p.y) * ratio,
    p.z + (target.z - p.z) * ratio,
  );
  k.velocity = Vector3::new(
    (next.x - p.x) / dt,
    (next.y - p.y) / dt,
    (next.z - p.z) / dt,
  );
  k.position = next;
  false
}

fn follow_path(
  kinematics: Arc<Mutex<Kinematics>>,
  waypoints: Vec<Vector3>,
  speed: f32,
  tick: Duration,
  time_scale: f32,
  stop: Arc<AtomicBool>,
) {
  let dt = tick.as_secs_f32() * time_scale;
  for (index, target) in waypoints.into_iter().enumerate() {
    loop {
      if stop.load(Ordering::Acquire) {
        debug!("路径任务被中止");
        return;
      }
      let arrived = step_toward(&mut lock(&kinematics), target, speed, dt);
      if arrived {
        debug!("到达航点 {}: {}", index, target);
        break;
      }
      thread::sleep(tick);
    }
  }
  info!("路径任务完成，进入悬停");
}

pub struct SimVehicle {
  config: SimVehicleConfig,
  link: Mutex<Link>,
  kinematics: Arc<Mutex<Kinematics>>,
  path: Mutex<Option<PathRun>>,
  map: GroundMap,
  captures: AtomicU64,
}

impl FromUrlWithScheme for SimVehicle {
  const SCHEME: &'static str = "sim";
}

impl FromUrl for SimVehicle {
  type Error = VehicleError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(VehicleError::SchemeMismatch);
    }

    let defaults = SimVehicleConfig::default();
    let fault = url
      .query_pairs()
      .find(|(k, _)| k == "fail")
      .and_then(|(_, v)| match v.parse::<SimFault>() {
        Ok(fault) => Some(fault),
        Err(e) => {
          warn!("{}", e);
          None
        }
      });
    let map = url
      .query_pairs()
      .find(|(k, _)| k == "map")
      .map(|(_, v)| PathBuf::from(v.as_ref()));

    let config = SimVehicleConfig {
      width: query_or(url, "width", defaults.width),
      height: query_or(url, "height", defaults.height),
      miss_every: query_or(url, "miss_every", defaults.miss_every),
      climb_rate: query_or(url, "climb_rate", defaults.climb_rate),
      tick: Duration::from_millis(query_or(url, "tick_ms", defaults.tick.as_millis() as u64)),
      time_scale: query_or(url, "time_scale", defaults.time_scale),
      map,
      pixels_per_meter: query_or(url, "ppm", defaults.pixels_per_meter),
      fault,
    };

    SimVehicle::new(config)
  }
}

impl SimVehicle {
  pub fn new(config: SimVehicleConfig) -> Result<Self, VehicleError> {
    positive("climb_rate", config.climb_rate)?;
    positive("time_scale", config.time_scale)?;
    positive("tick_ms", config.tick.as_secs_f32())?;
    positive("ppm", config.pixels_per_meter)?;

    let map = match &config.map {
      Some(path) => {
        info!("加载仿真地面纹理: {}", path.display());
        let image = image::open(path)?.to_rgb8();
        GroundMap::new(image, config.pixels_per_meter)
      }
      None => GroundMap::procedural(config.pixels_per_meter),
    };

    Ok(Self {
      config,
      link: Mutex::new(Link::default()),
      kinematics: Arc::new(Mutex::new(Kinematics::default())),
      path: Mutex::new(None),
      map,
      captures: AtomicU64::new(0),
    })
  }

  fn inject(&self, stage: SimFault) -> Result<(), VehicleError> {
    if self.config.fault == Some(stage) {
      warn!("注入故障: {:?}", stage);
      return Err(VehicleError::Rejected(format!("仿真故障注入: {:?}", stage)));
    }
    Ok(())
  }

  fn require_connected(&self) -> Result<(), VehicleError> {
    if lock(&self.link).connected {
      Ok(())
    } else {
      Err(VehicleError::NotConnected)
    }
  }

  fn stop_path(&self) {
    if let Some(run) = lock(&self.path).take() {
      run.stop.store(true, Ordering::Release);
      if run.handle.join().is_err() {
        warn!("路径跟随线程异常退出");
      }
    }
  }

  /// 在调用线程中阻塞飞向目标点
  fn fly_blocking(&self, target: Vector3, speed: f32) {
    let dt = self.config.tick.as_secs_f32() * self.config.time_scale;
    loop {
      if step_toward(&mut lock(&self.kinematics), target, speed, dt) {
        return;
      }
      thread::sleep(self.config.tick);
    }
  }
}

impl Vehicle for SimVehicle {
  fn connect(&self) -> Result<(), VehicleError> {
    self.inject(SimFault::Connect)?;
    lock(&self.link).connected = true;
    info!("已连接仿真飞行器");
    Ok(())
  }

  fn enable_api_control(&self) -> Result<(), VehicleError> {
    self.require_connected()?;
    self.inject(SimFault::Control)?;
    lock(&self.link).api_control = true;
    Ok(())
  }

  fn arm(&self) -> Result<(), VehicleError> {
    self.require_connected()?;
    self.inject(SimFault::Arm)?;
    let mut link = lock(&self.link);
    if !link.api_control {
      return Err(VehicleError::Rejected("未获得 API 控制权".to_string()));
    }
    link.armed = true;
    Ok(())
  }

  fn disarm(&self) -> Result<(), VehicleError> {
    self.require_connected()?;
    lock(&self.link).armed = false;
    Ok(())
  }

  fn takeoff(&self, altitude: f32) -> Result<(), VehicleError> {
    self.require_connected()?;
    let altitude = motion("altitude", altitude)?;
    self.inject(SimFault::Takeoff)?;
    if !lock(&self.link).armed {
      return Err(VehicleError::Rejected("飞行器未解锁".to_string()));
    }

    let target = {
      let mut k = lock(&self.kinematics);
      k.landed = false;
      Vector3::new(k.position.x, k.position.y, -altitude)
    };
    info!("起飞至 {} 米", altitude);
    self.fly_blocking(target, self.config.climb_rate);
    Ok(())
  }

  fn land(&self) -> Result<(), VehicleError> {
    self.require_connected()?;
    self.stop_path();
    let target = {
      let k = lock(&self.kinematics);
      Vector3::new(k.position.x, k.position.y, 0.0)
    };
    self.fly_blocking(target, self.config.climb_rate);
    lock(&self.kinematics).landed = true;
    info!("仿真飞行器已着陆: {}", target);
    Ok(())
  }

  fn move_to(&self, position: Vector3, speed: f32) -> Result<(), VehicleError> {
    self.require_connected()?;
    let speed = motion("speed", speed)?;
    self.stop_path();
    self.fly_blocking(position, speed);
    Ok(())
  }

  fn start_path(&self, waypoints: &[Vector3], options: PathOptions) -> Result<(), VehicleError> {
    self.require_connected()?;
    motion("speed", options.speed)?;
    if lock(&self.kinematics).landed {
      return Err(VehicleError::Rejected("飞行器尚未起飞".to_string()));
    }
    self.stop_path();

    debug!(
      "路径参数: 速度 {} m/s, 前视距离 {} m, 自适应 {}",
      options.speed, options.lookahead, options.adaptive_lookahead
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
      let kinematics = Arc::clone(&self.kinematics);
      let waypoints = waypoints.to_vec();
      let stop = Arc::clone(&stop);
      let (tick, time_scale) = (self.config.tick, self.config.time_scale);
      thread::Builder::new()
        .name("sim-path".to_string())
        .spawn(move || follow_path(kinematics, waypoints, options.speed, tick, time_scale, stop))
        .map_err(|e| VehicleError::Link(e.to_string()))?
    };
    *lock(&self.path) = Some(PathRun { stop, handle });
    Ok(())
  }

  fn state(&self) -> Option<VehicleState> {
    if !lock(&self.link).connected {
      return None;
    }
    let k = *lock(&self.kinematics);
    Some(VehicleState {
      position: k.position,
      velocity: k.velocity,
      landed: k.landed,
    })
  }

  fn capture_frame(&self, camera: u32) -> Option<Frame> {
    if !lock(&self.link).connected {
      return None;
    }
    let count = self.captures.fetch_add(1, Ordering::Relaxed) + 1;
    if self.config.miss_every > 0 && count % self.config.miss_every == 0 {
      warn!("相机 {} 返回空图像", camera);
      return None;
    }
    let position = lock(&self.kinematics).position;
    let image = self
      .map
      .render(position, self.config.width, self.config.height);
    Some(Frame::from(image))
  }

  fn disconnect(&self) {
    self.stop_path();
    let mut link = lock(&self.link);
    if link.connected {
      *link = Link::default();
      info!("已断开仿真飞行器");
    }
  }
}

impl Drop for SimVehicle {
  fn drop(&mut self) {
    self.stop_path();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fast() -> SimVehicle {
    SimVehicle::new(SimVehicleConfig {
      width: 64,
      height: 48,
      climb_rate: 5.0,
      tick: Duration::from_millis(1),
      time_scale: 200.0,
      ..SimVehicleConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn from_url_reads_query() {
    let url = Url::parse("sim://local?width=32&height=24&miss_every=3&fail=arm").unwrap();
    let sim = SimVehicle::from_url(&url).unwrap();
    assert_eq!(sim.config.width, 32);
    assert_eq!(sim.config.miss_every, 3);
    assert_eq!(sim.config.fault, Some(SimFault::Arm));

    let url = Url::parse("airsim://127.0.0.1").unwrap();
    assert!(matches!(
      SimVehicle::from_url(&url),
      Err(VehicleError::SchemeMismatch)
    ));
  }

  #[test]
  fn takeoff_requires_arming() {
    let sim = fast();
    assert!(matches!(sim.takeoff(5.0), Err(VehicleError::NotConnected)));
    sim.connect().unwrap();
    assert!(sim.takeoff(5.0).is_err());
    sim.enable_api_control().unwrap();
    sim.arm().unwrap();
    sim.takeoff(5.0).unwrap();
    let state = sim.state().unwrap();
    assert!(!state.landed);
    assert!((state.position.z + 5.0).abs() < 1e-3);
  }

  #[test]
  fn start_path_returns_immediately_and_flies_on() {
    let sim = SimVehicle::new(SimVehicleConfig {
      width: 32,
      height: 24,
      climb_rate: 50.0,
      tick: Duration::from_millis(2),
      time_scale: 1.0,
      ..SimVehicleConfig::default()
    })
    .unwrap();
    sim.connect().unwrap();
    sim.enable_api_control().unwrap();
    sim.arm().unwrap();
    sim.takeoff(2.0).unwrap();

    let far = [Vector3::new(1000.0, 0.0, -2.0)];
    let started = std::time::Instant::now();
    sim
      .start_path(
        &far,
        PathOptions {
          speed: 1.0,
          ..PathOptions::default()
        },
      )
      .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    thread::sleep(Duration::from_millis(50));
    let moved = sim.state().unwrap().position.x;
    assert!(moved > 0.0);

    sim.land().unwrap();
    let state = sim.state().unwrap();
    assert!(state.landed);
    assert_eq!(state.position.z, 0.0);
  }

  #[test]
  fn capture_misses_every_n() {
    let sim = SimVehicle::new(SimVehicleConfig {
      width: 16,
      height: 12,
      miss_every: 3,
      ..SimVehicleConfig::default()
    })
    .unwrap();
    assert!(sim.capture_frame(0).is_none());
    sim.connect().unwrap();
    let hits: Vec<bool> = (0..6).map(|_| sim.capture_frame(0).is_some()).collect();
    assert_eq!(hits, vec![true, true, false, true, true, false]);
  }

  #[test]
  fn procedural_map_contains_cracks_on_route() {
    let map = GroundMap::procedural(DEFAULT_PIXELS_PER_METER);
    let (x, y) = map.to_pixel(0.5, 7.0);
    assert_eq!(map.image.get_pixel(x as u32, y as u32).0, CRACK_COLOR);
    assert_eq!(map.sample(500.0, 500.0).0, OUTSIDE_MAP_COLOR);
  }

  #[test]
  fn non_positive_motion_is_rejected_not_flown() {
    let sim = fast();
    sim.connect().unwrap();
    sim.enable_api_control().unwrap();
    sim.arm().unwrap();
    assert!(matches!(sim.takeoff(0.0), Err(VehicleError::Rejected(_))));
    sim.takeoff(3.0).unwrap();

    let home = Vector3::new(0.0, 0.0, -3.0);
    let started = std::time::Instant::now();
    for speed in [0.0, -2.0, f32::NAN, f32::INFINITY] {
      assert!(matches!(sim.move_to(home, speed), Err(VehicleError::Rejected(_))));
    }
    let stalled = PathOptions {
      speed: 0.0,
      ..PathOptions::default()
    };
    assert!(matches!(
      sim.start_path(&[home], stalled),
      Err(VehicleError::Rejected(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));

    // 拒绝之后仍可正常降落
    sim.land().unwrap();
    assert!(sim.state().unwrap().landed);
  }

  #[test]
  fn invalid_config_is_refused() {
    let zero_climb = SimVehicleConfig {
      climb_rate: 0.0,
      ..SimVehicleConfig::default()
    };
    assert!(matches!(
      SimVehicle::new(zero_climb),
      Err(VehicleError::InvalidParameter {
        name: "climb_rate",
        ..
      })
    ));

    for query in ["time_scale=-1", "tick_ms=0", "climb_rate=NaN"] {
      let url = Url::parse(&format!("sim://local?{}", query)).unwrap();
      assert!(
        matches!(
          SimVehicle::from_url(&url),
          Err(VehicleError::InvalidParameter { .. })
        ),
        "{}",
        query
      );
    }
  }

  #[test]
  fn injected_fault_rejects_stage() {
    let url = Url::parse("sim://local?fail=connect").unwrap();
    let sim = SimVehicle::from_url(&url).unwrap();
    assert!(matches!(sim.connect(), Err(VehicleError::Rejected(_))));
    assert!(sim.state().is_none());
  }
}
