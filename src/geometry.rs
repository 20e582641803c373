// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/geometry.rs - 归一化边界框
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

/// 归一化边界框，坐标为图像宽高的比例，取值范围 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x_min: f32,
  pub y_min: f32,
  pub x_max: f32,
  pub y_max: f32,
}

/// 绝对像素坐标矩形，满足 0 <= x1 <= x2 <= width, 0 <= y1 <= y2 <= height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

fn clamp_unit(value: f32) -> f32 {
  // NaN 视为 0
  if value.is_nan() {
    0.0
  } else {
    value.clamp(0.0, 1.0)
  }
}

impl BoundingBox {
  pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      x_min,
      y_min,
      x_max,
      y_max,
    }
  }

  /// 将每个坐标独立截断到 [0, 1]，再保证 min <= max。
  ///
  /// 总是成功，且幂等。
  pub fn normalize(&self) -> BoundingBox {
    let (x1, x2) = (clamp_unit(self.x_min), clamp_unit(self.x_max));
    let (y1, y2) = (clamp_unit(self.y_min), clamp_unit(self.y_max));

    BoundingBox {
      x_min: x1.min(x2),
      y_min: y1.min(y2),
      x_max: x1.max(x2),
      y_max: y1.max(y2),
    }
  }

  /// 换算为绝对像素坐标。
  ///
  /// 先归一化，再乘以宽高，并按“四舍六入五成双”（round-half-to-even）取整，
  /// 因此结果不会越出图像边界。
  pub fn to_absolute(&self, width: u32, height: u32) -> PixelRect {
    let bbox = self.normalize();
    let scale = |value: f32, extent: u32| -> u32 {
      let pixel = (value as f64 * extent as f64).round_ties_even();
      (pixel.max(0.0) as u32).min(extent)
    };

    PixelRect {
      x1: scale(bbox.x_min, width),
      y1: scale(bbox.y_min, height),
      x2: scale(bbox.x_max, width),
      y2: scale(bbox.y_max, height),
    }
  }

  pub fn width(&self) -> f32 {
    self.x_max - self.x_min
  }

  pub fn height(&self) -> f32 {
    self.y_max - self.y_min
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }
}

impl From<[f32; 4]> for BoundingBox {
  fn from(bbox: [f32; 4]) -> Self {
    BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3])
  }
}

impl From<BoundingBox> for [f32; 4] {
  fn from(bbox: BoundingBox) -> Self {
    [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max]
  }
}

impl PixelRect {
  pub fn width(&self) -> u32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> u32 {
    self.y2 - self.y1
  }
}
