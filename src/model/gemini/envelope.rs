// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/model/gemini/envelope.rs - Gemini 请求与响应结构
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

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
  pub contents: Vec<Content>,
  pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(default)]
  pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inline_data: Option<InlineData>,
}

impl Part {
  pub fn text(text: impl Into<String>) -> Self {
    Part {
      text: Some(text.into()),
      inline_data: None,
    }
  }

  pub fn inline(mime_type: impl Into<String>, data: String) -> Self {
    Part {
      text: None,
      inline_data: Some(InlineData {
        mime_type: mime_type.into(),
        data,
      }),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
  pub mime_type: String,
  /// base64 编码的数据
  pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
  pub response_mime_type: String,
  pub max_output_tokens: u32,
  pub temperature: f32,
}

/// `generateContent` 的响应
///
/// 文本可能直接位于顶层，也可能嵌套在 candidates -> content -> parts 中。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
  #[serde(default)]
  pub text: Option<String>,
  #[serde(default)]
  pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
  #[serde(default)]
  pub content: Option<Content>,
  #[serde(default)]
  pub finish_reason: Option<String>,
}

impl ResponseEnvelope {
  pub fn from_text(text: impl Into<String>) -> Self {
    ResponseEnvelope {
      text: Some(text.into()),
      candidates: Vec::new(),
    }
  }

  /// 依次查找顶层文本和各候选项的 parts，返回第一个非空文本
  pub fn text(&self) -> Option<&str> {
    if let Some(text) = self.text.as_deref()
      && !text.is_empty()
    {
      return Some(text);
    }

    self
      .candidates
      .iter()
      .filter_map(|candidate| candidate.content.as_ref())
      .flat_map(|content| content.parts.iter())
      .filter_map(|part| part.text.as_deref())
      .find(|text| !text.is_empty())
  }

  pub fn finish_reason(&self) -> Option<&str> {
    self
      .candidates
      .iter()
      .find_map(|candidate| candidate.finish_reason.as_deref())
  }
}

/// API 错误响应体：`{"error": {"code": 429, "message": "...", "status": "RESOURCE_EXHAUSTED"}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
  pub error: ApiError,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub code: Option<u16>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}
