// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/model/gemini/transport.rs - Gemini 传输层
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

use thiserror::Error;

use super::envelope::{ApiErrorBody, GenerateRequest, ResponseEnvelope};

const TOO_MANY_REQUESTS: u16 = 429;
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("quota exhausted: {0}")]
  QuotaExhausted(String),
  #[error("HTTP {code}: {message}")]
  Status { code: u16, message: String },
  #[cfg(feature = "gemini_http")]
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("failed to decode response body: {0}")]
  Decode(#[from] serde_json::Error),
}

impl TransportError {
  /// 是否为可重试的配额耗尽错误
  pub fn is_quota_exhausted(&self) -> bool {
    matches!(self, TransportError::QuotaExhausted(_))
  }
}

/// 向推理服务发送一次请求
pub trait Transport {
  fn generate(
    &self,
    model: &str,
    request: &GenerateRequest,
  ) -> Result<ResponseEnvelope, TransportError>;
}

/// 根据 HTTP 状态码和响应体对失败进行分类
pub fn classify_failure(status: u16, body: &str) -> TransportError {
  let api_error = serde_json::from_str::<ApiErrorBody>(body)
    .ok()
    .map(|body| body.error);

  let message = api_error
    .as_ref()
    .and_then(|error| error.message.clone())
    .unwrap_or_else(|| body.trim().to_string());

  let exhausted = status == TOO_MANY_REQUESTS
    || api_error
      .as_ref()
      .and_then(|error| error.status.as_deref())
      == Some(RESOURCE_EXHAUSTED);

  if exhausted {
    TransportError::QuotaExhausted(message)
  } else {
    TransportError::Status {
      code: status,
      message,
    }
  }
}

#[cfg(feature = "gemini_http")]
pub use self::http::HttpTransport;

#[cfg(feature = "gemini_http")]
mod http {
  use std::time::Duration;

  use reqwest::blocking::Client;
  use tracing::debug;

  use super::{Transport, TransportError, classify_failure};
  use crate::model::gemini::envelope::{GenerateRequest, ResponseEnvelope};

  const API_KEY_HEADER: &str = "x-goog-api-key";

  /// 基于 reqwest 阻塞客户端的传输层，密钥只保存在本实例中
  pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
  }

  impl HttpTransport {
    pub fn new(
      api_key: String,
      endpoint: &str,
      timeout: Duration,
    ) -> Result<Self, TransportError> {
      let client = Client::builder().timeout(timeout).build()?;
      Ok(HttpTransport {
        client,
        endpoint: endpoint.trim_end_matches('/').to_string(),
        api_key,
      })
    }
  }

  impl Transport for HttpTransport {
    fn generate(
      &self,
      model: &str,
      request: &GenerateRequest,
    ) -> Result<ResponseEnvelope, TransportError> {
      let url = format!("{}/models/{}:generateContent", self.endpoint, model);
      debug!("POST {}", url);

      let response = self
        .client
        .post(&url)
        .header(API_KEY_HEADER, &self.api_key)
        .json(request)
        .send()?;

      let status = response.status();
      let body = response.text()?;
      debug!("响应状态: {}, 响应体大小: {} 字节", status, body.len());

      if status.is_success() {
        Ok(serde_json::from_str(&body)?)
      } else {
        Err(classify_failure(status.as_u16(), &body))
      }
    }
  }
}
