// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

pub trait Model {
  type Input: ?Sized;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单个检测结果
///
/// 只由解析器根据外部输入构造，构造后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

impl Detection {
  /// 标签是否包含 `needle`（不区分大小写）
  pub fn is_target(&self, needle: &str) -> bool {
    self
      .label
      .to_lowercase()
      .contains(&needle.to_lowercase())
  }

  pub fn is_rat(&self) -> bool {
    self.is_target("rat")
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

pub mod gemini;
pub use self::gemini::{
  DetectorError, GeminiBuilder, GeminiDetector, ServiceError, Transport, TransportError,
};
#[cfg(feature = "gemini_http")]
pub use self::gemini::HttpTransport;
