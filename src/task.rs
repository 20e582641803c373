// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/task.rs - 检测任务
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

use serde::Serialize;
use tracing::info;

use crate::{
  geometry::PixelRect,
  input::SourceImage,
  model::{DetectResult, Detection, Model},
  output::Render,
};

pub const DEFAULT_TARGET: &str = "rat";
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.2;

/// 按标签子串（不区分大小写）和置信度阈值过滤检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
  pub target: String,
  pub min_confidence: f32,
}

impl Default for DetectionFilter {
  fn default() -> Self {
    DetectionFilter {
      target: DEFAULT_TARGET.to_string(),
      min_confidence: DEFAULT_MIN_CONFIDENCE,
    }
  }
}

impl DetectionFilter {
  pub fn with_target(mut self, target: impl Into<String>) -> Self {
    self.target = target.into();
    self
  }

  pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
    self.min_confidence = min_confidence;
    self
  }

  pub fn accepts(&self, detection: &Detection) -> bool {
    detection.is_target(&self.target) && detection.confidence >= self.min_confidence
  }

  pub fn apply<'a>(&self, detections: impl IntoIterator<Item = &'a Detection>) -> Vec<Detection> {
    detections
      .into_iter()
      .filter(|detection| self.accepts(detection))
      .cloned()
      .collect()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportedDetection {
  #[serde(flatten)]
  pub detection: Detection,
  pub pixels: PixelRect,
}

/// 交给渲染输出的检测报告
#[derive(Debug, Clone, Serialize)]
pub struct RatReport {
  pub source: PathBuf,
  pub width: u32,
  pub height: u32,
  pub count: usize,
  pub detections: Vec<ReportedDetection>,
}

impl RatReport {
  pub fn new(source: &SourceImage, detections: Vec<Detection>) -> Self {
    let (width, height) = (source.width(), source.height());
    let detections = detections
      .into_iter()
      .map(|detection| ReportedDetection {
        pixels: detection.bbox.to_absolute(width, height),
        detection,
      })
      .collect::<Vec<_>>();

    RatReport {
      source: source.path.clone(),
      width,
      height,
      count: detections.len(),
      detections,
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Default, Debug)]
pub struct OneShotTask {
  filter: DetectionFilter,
}

impl OneShotTask {
  pub fn with_filter(mut self, filter: DetectionFilter) -> Self {
    self.filter = filter;
    self
  }
}

impl<
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = SourceImage>,
  M: Model<Input = SourceImage, Output = DetectResult, Error = ME>,
  O: Render<SourceImage, RatReport, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Output = RatReport;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let source = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&source)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}，共 {} 个检测结果", elapsed, result.len());

    let report = RatReport::new(&source, self.filter.apply(result.iter()));
    output.render_result(&source, &report)?;
    info!("渲染完成，{} 个目标", report.count);

    Ok(report)
  }
}
