// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model/yolo26.rs - RKNPU 上的 YOLO26 裂缝模型
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

use image::{RgbImage, imageops};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, LoadOptions, Model, ModelError, classes_from_url},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_SIZE: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl Yolo26Error {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26 {
  context: Context,
  labels: Vec<String>,
}

pub struct Yolo26Builder {
  model_path: String,
  labels: Vec<String>,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Yolo26Builder {
      model_path: url.path().to_string(),
      labels: classes_from_url(url),
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  /// 类别表先经过白名单检查，再读取模型文件
  pub fn build(self, options: &LoadOptions) -> Result<Yolo26, ModelError> {
    options.check_classes(&self.labels)?;

    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path).map_err(Yolo26Error::from)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags).map_err(Yolo26Error::from)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e).into());
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel).into());
    }

    info!("模型加载完成，类别: {:?}", self.labels);
    Ok(Yolo26 {
      context,
      labels: self.labels,
    })
  }
}

/// 按张量大小区分回归与分类输出，RKNN 的输出顺序并不固定
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    error!(
      "输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    None
  }
}

impl Yolo26 {
  fn postprocess(&self, output: rknpu::Output, confidence: f32) -> DetectResult {
    let class_num = self.labels.len();
    let input = YOLO26_INPUT_SIZE as f32;
    let mut items = Vec::new();

    for (head_idx, (&(map_h, map_w), stride)) in
      YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate()
    {
      let spatial = map_h * map_w;
      let (idx1, idx2) = (head_idx * 2, head_idx * 2 + 1);

      let (tensor1, tensor2) = match (output.get_f32(idx1), output.get_f32(idx2)) {
        (Ok(t1), Ok(t2)) => (t1, t2),
        (Err(e), _) | (_, Err(e)) => {
          error!("获取检测头 {} 的输出失败: {}", head_idx, e);
          continue;
        }
      };

      let Some((reg, cls)) =
        match_reg_cls_tensors(tensor1, tensor2, 4 * spatial, class_num * spatial)
      else {
        continue;
      };

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (max_logit, class_id) = (0..class_num)
            .map(|c| (cls[c * spatial + idx], c as u32))
            .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
          let score = sigmoid(max_logit);
          if score < confidence {
            continue;
          }

          let grid_x = w as f32 + 0.5;
          let grid_y = h as f32 + 0.5;
          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input);
          if xmin >= xmax || ymin >= ymax {
            continue;
          }

          items.push(DetectItem {
            class_id,
            score,
            bbox: [xmin / input, ymin / input, xmax / input, ymax / input],
          });
        }
      }
    }

    debug!("检测到 {} 个目标", items.len());
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

impl Model for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, Self::Error> {
    // 归一化坐标与输入尺寸无关，直接拉伸到网络输入大小
    let input = if image.dimensions() == (YOLO26_INPUT_SIZE, YOLO26_INPUT_SIZE) {
      image.clone()
    } else {
      imageops::resize(
        image,
        YOLO26_INPUT_SIZE,
        YOLO26_INPUT_SIZE,
        imageops::FilterType::Triangle,
      )
    };

    debug!("设置模型输入");
    self.context.set_input(
      0,
      input.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    Ok(self.postprocess(output, confidence))
  }

  fn labels(&self) -> &[String] {
    &self.labels
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
