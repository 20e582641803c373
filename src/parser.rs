// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/parser.rs - 模型响应解析
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

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{geometry::BoundingBox, model::Detection};

pub mod literal;
pub mod repair;

pub use self::literal::LiteralError;

const UNKNOWN_LABEL: &str = "unknown";
const BOX_KEYS: [&str; 4] = ["x_min", "y_min", "x_max", "y_max"];

#[derive(Error, Debug)]
pub enum MalformedResponseError {
  #[error("response is not valid JSON ({source}); permissive parse also failed: {fallback}")]
  Decode {
    #[source]
    source: serde_json::Error,
    fallback: LiteralError,
  },
  #[error("malformed detection entry #{index} {entry}: {reason}")]
  Entry {
    index: usize,
    entry: String,
    reason: String,
  },
}

/// 待解析的模型输出：原始文本，或已经结构化的对象
#[derive(Debug, Clone)]
pub enum RawPayload<'a> {
  Text(&'a str),
  Structured(Value),
}

impl<'a> From<&'a str> for RawPayload<'a> {
  fn from(text: &'a str) -> Self {
    RawPayload::Text(text)
  }
}

impl<'a> From<&'a String> for RawPayload<'a> {
  fn from(text: &'a String) -> Self {
    RawPayload::Text(text.as_str())
  }
}

impl From<Value> for RawPayload<'_> {
  fn from(value: Value) -> Self {
    RawPayload::Structured(value)
  }
}

/// 将模型输出解析为检测结果列表。
///
/// 文本依次经过：去围栏、定界符重新平衡、严格 JSON、宽松字面量解析。
/// 每个条目的字段独立转换，任何一个条目转换失败则整体失败。
/// 缺少 `detections` 键或类型不符时返回空列表。
pub fn parse_detections<'a>(
  payload: impl Into<RawPayload<'a>>,
) -> Result<Vec<Detection>, MalformedResponseError> {
  let data = match payload.into() {
    RawPayload::Text(text) => decode_text(text)?,
    RawPayload::Structured(value) => value,
  };

  let entries = data
    .get("detections")
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or_default();

  let detections = entries
    .iter()
    .enumerate()
    .map(|(index, entry)| detection_from_entry(index, entry))
    .collect::<Result<Vec<_>, _>>()?;

  debug!("解析得到 {} 个检测结果", detections.len());
  Ok(detections)
}

fn decode_text(text: &str) -> Result<Value, MalformedResponseError> {
  let cleaned = repair::strip_fences(text);
  if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
    return Ok(value);
  }

  let repaired = repair::rebalance(cleaned);
  if repaired.len() != cleaned.len() {
    debug!("定界符已修复: {} -> {} 字节", cleaned.len(), repaired.len());
  }

  match serde_json::from_str::<Value>(&repaired) {
    Ok(value) => Ok(value),
    Err(strict) => {
      debug!("严格 JSON 解析失败，尝试宽松解析: {}", strict);
      literal::parse_literal(&repaired).map_err(|fallback| MalformedResponseError::Decode {
        source: strict,
        fallback,
      })
    }
  }
}

fn entry_error(index: usize, entry: &Value, reason: impl Into<String>) -> MalformedResponseError {
  MalformedResponseError::Entry {
    index,
    entry: entry.to_string(),
    reason: reason.into(),
  }
}

fn detection_from_entry(index: usize, entry: &Value) -> Result<Detection, MalformedResponseError> {
  let fields = entry
    .as_object()
    .ok_or_else(|| entry_error(index, entry, "entry is not a mapping"))?;

  let label = coerce_label(fields.get("label"));
  let confidence = match fields.get("confidence") {
    Some(value) => coerce_float(value)
      .map(saturate)
      .map_err(|reason| entry_error(index, entry, format!("confidence: {reason}")))?,
    None => 0.0,
  };
  let bbox = coerce_box(fields.get("box")).map_err(|reason| entry_error(index, entry, reason))?;

  Ok(Detection {
    label,
    confidence,
    bbox: bbox.normalize(),
  })
}

fn coerce_label(value: Option<&Value>) -> String {
  let text = match value {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  };

  match text.trim() {
    "" => UNKNOWN_LABEL.to_string(),
    trimmed => trimmed.to_string(),
  }
}

fn coerce_float(value: &Value) -> Result<f64, String> {
  let number = match value {
    Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| format!("{n} is not representable as a float"))?,
    Value::String(s) => s
      .trim()
      .parse::<f64>()
      .map_err(|_| format!("'{s}' is not a number"))?,
    Value::Bool(b) => f64::from(u8::from(*b)),
    Value::Null => return Err("expected a number, found null".to_string()),
    Value::Array(_) | Value::Object(_) => {
      return Err(format!("expected a number, found {value}"));
    }
  };

  if number.is_finite() {
    Ok(number)
  } else {
    Err(format!("{number} is not a finite number"))
  }
}

/// 超出 `f32` 范围的有限值饱和到 `±f32::MAX`
fn saturate(number: f64) -> f32 {
  number.clamp(-f64::from(f32::MAX), f64::from(f32::MAX)) as f32
}

fn is_empty_value(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::Bool(b) => !b,
    Value::Number(n) => n.as_f64() == Some(0.0),
    Value::String(s) => s.is_empty(),
    Value::Array(items) => items.is_empty(),
    Value::Object(map) => map.is_empty(),
  }
}

fn coerce_box(value: Option<&Value>) -> Result<BoundingBox, String> {
  let fields: &Map<String, Value> = match value {
    None => return Ok(BoundingBox::default()),
    Some(v) if is_empty_value(v) => return Ok(BoundingBox::default()),
    Some(Value::Object(map)) => map,
    Some(other) => return Err(format!("box is not a mapping: {other}")),
  };

  let mut coords = [0.0f32; 4];
  for (slot, key) in coords.iter_mut().zip(BOX_KEYS) {
    if let Some(v) = fields.get(key) {
      *slot = coerce_float(v)
        .map(saturate)
        .map_err(|reason| format!("box.{key}: {reason}"))?;
    }
  }

  Ok(BoundingBox::from(coords))
}
