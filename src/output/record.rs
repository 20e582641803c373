// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/output/record.rs - 检测结果记录输出
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

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::SourceImage, output::Render, task::RatReport};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的记录格式: {0}")]
  UnknownFormat(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
  Json,
  /// 每行一个检测: `label, confidence, x_min, y_min, x_max, y_max`
  Text,
}

impl std::str::FromStr for RecordFormat {
  type Err = RecordOutputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "json" => Ok(RecordFormat::Json),
      "txt" | "text" => Ok(RecordFormat::Text),
      other => Err(RecordOutputError::UnknownFormat(other.to_string())),
    }
  }
}

#[derive(Serialize)]
struct RecordDocument<'a> {
  generated_at: String,
  #[serde(flatten)]
  report: &'a RatReport,
}

/// 把检测报告写入文件，不绘制图像
pub struct RecordOutput {
  path: PathBuf,
  format: RecordFormat,
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  /// `record:///path/to/result.json?format=json`，未指定格式时按扩展名判断
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }

    let path = PathBuf::from(url.path());
    let format = match url.query_pairs().find(|(k, _)| k == "format") {
      Some((_, v)) => v.parse()?,
      None => match path.extension().and_then(|ext| ext.to_str()) {
        Some("txt") => RecordFormat::Text,
        _ => RecordFormat::Json,
      },
    };

    Ok(RecordOutput::new(path, format))
  }
}

impl RecordOutput {
  pub fn new(path: impl Into<PathBuf>, format: RecordFormat) -> Self {
    RecordOutput {
      path: path.into(),
      format,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn encode(&self, report: &RatReport) -> Result<String, RecordOutputError> {
    match self.format {
      RecordFormat::Json => {
        let document = RecordDocument {
          generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
          report,
        };
        Ok(serde_json::to_string_pretty(&document)?)
      }
      RecordFormat::Text => {
        let records = report
          .detections
          .iter()
          .map(|item| {
            let bbox = item.detection.bbox;
            format!(
              "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
              item.detection.label,
              item.detection.confidence,
              bbox.x_min,
              bbox.y_min,
              bbox.x_max,
              bbox.y_max
            )
          })
          .collect::<Vec<_>>();
        Ok(records.join("\n"))
      }
    }
  }
}

impl Render<SourceImage, RatReport> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, _frame: &SourceImage, result: &RatReport) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&self.path, self.encode(result)?)?;
    warn!("保存检测记录到文件: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;
  use crate::{
    geometry::BoundingBox,
    model::Detection,
    task::{DetectionFilter, RatReport},
  };

  fn report() -> (SourceImage, RatReport) {
    let source = SourceImage {
      path: PathBuf::from("rats.png"),
      image: RgbImage::new(100, 50),
    };
    let detections = vec![Detection {
      label: "rat".to_string(),
      confidence: 0.75,
      bbox: BoundingBox::new(0.1, 0.2, 0.5, 0.6),
    }];
    let report = RatReport::new(&source, DetectionFilter::default().apply(&detections));
    (source, report)
  }

  #[test]
  fn format_is_taken_from_query_or_extension() {
    let output = RecordOutput::from_url(&Url::parse("record:///tmp/a.txt").unwrap()).unwrap();
    assert_eq!(output.format, RecordFormat::Text);
    let output =
      RecordOutput::from_url(&Url::parse("record:///tmp/a.txt?format=json").unwrap()).unwrap();
    assert_eq!(output.format, RecordFormat::Json);
    assert!(RecordOutput::from_url(&Url::parse("record:///tmp/a?format=xml").unwrap()).is_err());
    assert!(RecordOutput::from_url(&Url::parse("image:///tmp/a.png").unwrap()).is_err());
  }

  #[test]
  fn writes_json_record() {
    let (source, report) = report();
    let dir = std::env::temp_dir().join(format!("laoshu-record-{}", std::process::id()));
    let output = RecordOutput::new(dir.join("nested/result.json"), RecordFormat::Json);
    output.render_result(&source, &report).unwrap();

    let written: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(output.path()).unwrap()).unwrap();
    assert_eq!(written["count"], 1);
    assert_eq!(written["detections"][0]["label"], "rat");
    assert_eq!(written["detections"][0]["pixels"]["x2"], 50);
    assert!(written["generated_at"].is_string());
    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn text_record_has_one_line_per_detection() {
    let (_, report) = report();
    let output = RecordOutput::new("unused.txt", RecordFormat::Text);
    assert_eq!(
      output.encode(&report).unwrap(),
      "rat, 0.7500, 0.1000, 0.2000, 0.5000, 0.6000"
    );
  }
}
