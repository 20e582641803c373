// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/model/gemini.rs - 基于 Gemini 的老鼠检测模型
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
  io::Cursor,
  path::{Path, PathBuf},
  time::Duration,
};

use base64::{Engine, prelude::BASE64_STANDARD};
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{SourceImage, read_rgb_image},
  model::{DetectResult, Detection, Model},
  parser::{MalformedResponseError, parse_detections},
};

pub mod envelope;
pub mod transport;

use self::envelope::{Content, GenerateRequest, GenerationConfig, Part, ResponseEnvelope};
#[cfg(feature = "gemini_http")]
pub use self::transport::HttpTransport;
pub use self::transport::{Transport, TransportError};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SECONDS: f64 = 2.0;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const EXCERPT_LIMIT: usize = 320;
const RESPONSE_MIME_TYPE: &str = "application/json";

const PROMPT: &str = "You are an expert pest-control inspector. Given an image, identify every rat you see. \
Respond with strict JSON shaped as {\"detections\": [{\"label\": \"rat\", \"confidence\": 0.97, \
\"box\": {\"x_min\": 0.1, \"y_min\": 0.2, \"x_max\": 0.3, \"y_max\": 0.4}}]}. \
Include only actual rats. Use normalized coordinates in range [0, 1]. \
Do not add Markdown, explanations, or additional keys.";

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("Gemini API request failed: {0}")]
  Request(#[source] TransportError),
  #[error("Gemini returned an empty response; unable to extract a JSON payload")]
  EmptyResponse,
  #[error(
    "Gemini returned a response that wasn't valid JSON. \
     Please retry in a few seconds or reduce the temperature.\nResponse excerpt: {excerpt}"
  )]
  MalformedResponse {
    excerpt: String,
    #[source]
    source: MalformedResponseError,
  },
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  Configuration(String),
  #[error("Image not found: {}", .0.display())]
  NotFound(PathBuf),
  #[error("Failed to read image {}: {source}", path.display())]
  ImageLoad {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("Failed to encode image for upload: {0}")]
  ImageEncode(#[source] image::ImageError),
  #[error(
    "Gemini API quota has been exhausted after {attempts} attempt(s). \
     Wait a minute or request a higher quota before trying again."
  )]
  RateLimit {
    attempts: u32,
    #[source]
    source: TransportError,
  },
  #[error(transparent)]
  Service(#[from] ServiceError),
}

impl DetectorError {
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, DetectorError::RateLimit { .. })
  }
}

/// 重试策略：仅针对配额耗尽，线性退避
#[derive(Debug, Clone, Copy, PartialEq)]
struct RetryPolicy {
  max_retries: u32,
  backoff_seconds: f64,
}

impl RetryPolicy {
  /// 超出 `Duration` 表示范围时饱和到 `Duration::MAX`
  fn delay_for(&self, attempt: u32) -> Duration {
    Duration::try_from_secs_f64(self.backoff_seconds * attempt as f64).unwrap_or(Duration::MAX)
  }
}

/// 单次调用内的重试状态，终止状态即函数返回
enum RetryState {
  Requesting { attempt: u32 },
  QuotaWait { attempt: u32, cause: TransportError },
}

pub struct GeminiBuilder {
  api_key: Option<String>,
  model: String,
  endpoint: String,
  max_output_tokens: u32,
  temperature: f32,
  max_retries: u32,
  backoff_seconds: f64,
  timeout: Duration,
}

impl Default for GeminiBuilder {
  fn default() -> Self {
    GeminiBuilder {
      api_key: None,
      model: DEFAULT_MODEL.to_string(),
      endpoint: DEFAULT_ENDPOINT.to_string(),
      max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
      temperature: DEFAULT_TEMPERATURE,
      max_retries: DEFAULT_MAX_RETRIES,
      backoff_seconds: DEFAULT_BACKOFF_SECONDS,
      timeout: DEFAULT_TIMEOUT,
    }
  }
}

impl FromUrlWithScheme for GeminiBuilder {
  const SCHEME: &'static str = "gemini";
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DetectorError> {
  value
    .parse()
    .map_err(|_| DetectorError::Configuration(format!("参数 {} 的值无效: {}", key, value)))
}

impl FromUrl for GeminiBuilder {
  type Error = DetectorError;

  /// `gemini://<model>?temperature=0&max_output_tokens=1024&max_retries=3&backoff=2.0&timeout=60`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::Configuration(format!(
        "模型地址必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = GeminiBuilder::default();
    let model = url
      .host_str()
      .filter(|host| !host.is_empty())
      .unwrap_or_else(|| url.path().trim_matches('/'));
    if !model.is_empty() {
      builder = builder.model(model);
    }

    for (key, value) in url.query_pairs() {
      builder = match key.as_ref() {
        "temperature" => builder.temperature(parse_query(&key, &value)?),
        "max_output_tokens" => builder.max_output_tokens(parse_query(&key, &value)?),
        "max_retries" => builder.max_retries(parse_query(&key, &value)?),
        "backoff" => builder.backoff_seconds(parse_query(&key, &value)?),
        "timeout" => builder.timeout(Duration::from_secs(parse_query(&key, &value)?)),
        "endpoint" => builder.endpoint(value.as_ref()),
        other => {
          warn!("忽略未知的模型参数: {}", other);
          builder
        }
      };
    }

    Ok(builder)
  }
}

impl GeminiBuilder {
  pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = Some(api_key.into());
    self
  }

  pub fn model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into();
    self
  }

  pub fn max_output_tokens(mut self, max_output_tokens: u32) -> Self {
    self.max_output_tokens = max_output_tokens;
    self
  }

  pub fn temperature(mut self, temperature: f32) -> Self {
    self.temperature = temperature;
    self
  }

  /// 至少为 1
  pub fn max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries.max(1);
    self
  }

  /// 不小于 0
  pub fn backoff_seconds(mut self, backoff_seconds: f64) -> Self {
    self.backoff_seconds = if backoff_seconds.is_nan() {
      0.0
    } else {
      backoff_seconds.max(0.0)
    };
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn take_api_key(&mut self) -> Result<String, DetectorError> {
    match self.api_key.take() {
      Some(key) if !key.trim().is_empty() => Ok(key),
      _ => Err(DetectorError::Configuration(
        "GEMINI_API_KEY is not set; an API key is required".to_string(),
      )),
    }
  }

  #[cfg(feature = "gemini_http")]
  pub fn build(mut self) -> Result<GeminiDetector<HttpTransport>, DetectorError> {
    let api_key = self.take_api_key()?;
    let transport = HttpTransport::new(api_key, &self.endpoint, self.timeout)
      .map_err(|e| DetectorError::Configuration(format!("无法创建 HTTP 客户端: {}", e)))?;
    Ok(self.assemble(transport))
  }

  /// 使用自定义传输层构建，仍然要求提供密钥
  pub fn build_with_transport<T: Transport>(
    mut self,
    transport: T,
  ) -> Result<GeminiDetector<T>, DetectorError> {
    self.take_api_key()?;
    Ok(self.assemble(transport))
  }

  fn assemble<T: Transport>(self, transport: T) -> GeminiDetector<T> {
    info!(
      "Gemini 模型: {}, 最大重试次数: {}, 退避基数: {}s",
      self.model, self.max_retries, self.backoff_seconds
    );
    GeminiDetector {
      transport,
      model: self.model,
      generation: GenerationConfig {
        response_mime_type: RESPONSE_MIME_TYPE.to_string(),
        max_output_tokens: self.max_output_tokens,
        temperature: self.temperature,
      },
      policy: RetryPolicy {
        max_retries: self.max_retries,
        backoff_seconds: self.backoff_seconds,
      },
    }
  }
}

/// 通过 Gemini 检测图像中的老鼠
pub struct GeminiDetector<T> {
  transport: T,
  model: String,
  generation: GenerationConfig,
  policy: RetryPolicy,
}

impl<T: Transport> GeminiDetector<T> {
  pub fn model_name(&self) -> &str {
    &self.model
  }

  /// 对一张图像运行检测，返回经过校验和归一化的全部检测结果（未过滤）
  pub fn detect(&self, image_path: impl AsRef<Path>) -> Result<Vec<Detection>, DetectorError> {
    let path = image_path.as_ref();
    if !path.exists() {
      error!("图像不存在: {}", path.display());
      return Err(DetectorError::NotFound(path.to_path_buf()));
    }

    let image = read_rgb_image(path).map_err(|source| DetectorError::ImageLoad {
      path: path.to_path_buf(),
      source,
    })?;
    self.detect_image(&image)
  }

  /// 对已解码的图像运行检测，不再访问文件系统
  pub fn detect_image(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    debug!("图像尺寸: {}x{}", image.width(), image.height());

    let request = self.build_request(image)?;
    let envelope = self.generate_with_retry(&request)?;

    if let Some(reason) = envelope.finish_reason() {
      debug!("结束原因: {}", reason);
    }
    let payload = envelope.text().ok_or(ServiceError::EmptyResponse)?;

    parse_detections(payload).map_err(|source| {
      error!("无法解析 Gemini 响应: {}", source);
      DetectorError::from(ServiceError::MalformedResponse {
        excerpt: summarize_payload(payload),
        source,
      })
    })
  }

  fn build_request(&self, image: &RgbImage) -> Result<GenerateRequest, DetectorError> {
    let mut png = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
      .map_err(DetectorError::ImageEncode)?;
    debug!("上传图像大小: {:.2} KB", png.len() as f64 / 1024.0);

    Ok(GenerateRequest {
      contents: vec![Content {
        role: Some("user".to_string()),
        parts: vec![
          Part::text(PROMPT),
          Part::inline("image/png", BASE64_STANDARD.encode(&png)),
        ],
      }],
      generation_config: self.generation.clone(),
    })
  }

  fn generate_with_retry(
    &self,
    request: &GenerateRequest,
  ) -> Result<ResponseEnvelope, DetectorError> {
    let mut state = RetryState::Requesting { attempt: 1 };
    loop {
      state = match state {
        RetryState::Requesting { attempt } => {
          debug!("第 {} 次请求 Gemini API", attempt);
          match self.transport.generate(&self.model, request) {
            Ok(envelope) => return Ok(envelope),
            Err(cause) if cause.is_quota_exhausted() => {
              if attempt >= self.policy.max_retries {
                error!("配额耗尽，已尝试 {} 次", attempt);
                return Err(DetectorError::RateLimit {
                  attempts: attempt,
                  source: cause,
                });
              }
              RetryState::QuotaWait { attempt, cause }
            }
            Err(cause) => {
              error!("Gemini API 请求失败: {}", cause);
              return Err(ServiceError::Request(cause).into());
            }
          }
        }
        RetryState::QuotaWait { attempt, cause } => {
          let delay = self.policy.delay_for(attempt);
          warn!(
            "配额耗尽 ({}), {:.2?} 后进行第 {} 次尝试",
            cause,
            delay,
            attempt + 1
          );
          if !delay.is_zero() {
            std::thread::sleep(delay);
          }
          RetryState::Requesting {
            attempt: attempt + 1,
          }
        }
      };
    }
  }
}

impl<T: Transport> Model for GeminiDetector<T> {
  type Input = SourceImage;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect_image(&input.image).map(DetectResult::from)
  }
}

/// 截取响应开头的一部分用于错误信息
fn summarize_payload(payload: &str) -> String {
  let text = payload.trim();
  if text.is_empty() {
    return "<empty>".to_string();
  }

  match text.char_indices().nth(EXCERPT_LIMIT) {
    Some((cut, _)) => format!("{}…", &text[..cut]),
    None => text.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, collections::VecDeque};

  use image::Rgb;

  use super::*;

  struct ScriptedTransport {
    script: RefCell<VecDeque<Result<ResponseEnvelope, TransportError>>>,
    calls: RefCell<Vec<serde_json::Value>>,
  }

  impl ScriptedTransport {
    fn new(script: Vec<Result<ResponseEnvelope, TransportError>>) -> Self {
      ScriptedTransport {
        script: RefCell::new(script.into()),
        calls: RefCell::new(Vec::new()),
      }
    }

    fn call_count(&self) -> usize {
      self.calls.borrow().len()
    }
  }

  impl Transport for &ScriptedTransport {
    fn generate(
      &self,
      _model: &str,
      request: &GenerateRequest,
    ) -> Result<ResponseEnvelope, TransportError> {
      self
        .calls
        .borrow_mut()
        .push(serde_json::to_value(request).unwrap());
      self
        .script
        .borrow_mut()
        .pop_front()
        .unwrap_or_else(|| Err(TransportError::QuotaExhausted("quota".to_string())))
    }
  }

  fn quota() -> Result<ResponseEnvelope, TransportError> {
    Err(TransportError::QuotaExhausted("quota".to_string()))
  }

  fn temp_image(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("laoshu-{}-{}.png", std::process::id(), name));
    RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]))
      .save(&path)
      .unwrap();
    path
  }

  fn detector(transport: &ScriptedTransport, max_retries: u32) -> GeminiDetector<&ScriptedTransport> {
    GeminiBuilder::default()
      .api_key("fake-key")
      .max_retries(max_retries)
      .backoff_seconds(0.0)
      .build_with_transport(transport)
      .unwrap()
  }

  #[test]
  fn quota_exhaustion_on_every_attempt_uses_the_whole_budget() {
    let image = temp_image("quota-budget");
    for max_retries in [1, 2, 3] {
      let transport = ScriptedTransport::new(vec![]);
      let err = detector(&transport, max_retries).detect(&image).unwrap_err();

      assert_eq!(transport.call_count(), max_retries as usize);
      match &err {
        DetectorError::RateLimit { attempts, source } => {
          assert_eq!(*attempts, max_retries);
          assert!(source.is_quota_exhausted());
        }
        other => panic!("unexpected error: {other}"),
      }
      assert!(err.is_rate_limited());
      assert!(err.to_string().contains("quota"));
    }
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn quota_exhaustion_then_success_recovers() {
    let image = temp_image("quota-recover");
    let transport = ScriptedTransport::new(vec![
      quota(),
      quota(),
      Ok(ResponseEnvelope::from_text(
        r#"{"detections": [{"label": "rat", "confidence": 0.8, "box": {"x_min": 0.1, "y_min": 0.1, "x_max": 0.2, "y_max": 0.2}}]}"#,
      )),
    ]);

    let detections = detector(&transport, 3).detect(&image).unwrap();
    assert_eq!(transport.call_count(), 3);
    assert_eq!(detections.len(), 1);
    assert!(detections[0].is_rat());
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn other_failures_are_not_retried() {
    let image = temp_image("no-retry");
    let transport = ScriptedTransport::new(vec![Err(TransportError::Status {
      code: 403,
      message: "permission denied".to_string(),
    })]);

    let err = detector(&transport, 3).detect(&image).unwrap_err();
    assert_eq!(transport.call_count(), 1);
    assert!(matches!(
      err,
      DetectorError::Service(ServiceError::Request(TransportError::Status { code: 403, .. }))
    ));
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn empty_response_is_a_service_error() {
    let image = temp_image("empty");
    let transport = ScriptedTransport::new(vec![Ok(ResponseEnvelope::default())]);

    let err = detector(&transport, 3).detect(&image).unwrap_err();
    assert!(matches!(
      err,
      DetectorError::Service(ServiceError::EmptyResponse)
    ));
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn unparseable_response_is_wrapped_with_excerpt() {
    let image = temp_image("not-json");
    let transport = ScriptedTransport::new(vec![Ok(ResponseEnvelope::from_text("not-json"))]);

    let err = detector(&transport, 3).detect(&image).unwrap_err();
    let message = err.to_string().to_lowercase();
    assert!(message.contains("response"));
    assert!(message.contains("json"));
    assert!(message.contains("not-json"));
    assert!(matches!(
      err,
      DetectorError::Service(ServiceError::MalformedResponse { .. })
    ));
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn missing_image_fails_before_any_request() {
    let transport = ScriptedTransport::new(vec![]);
    let err = detector(&transport, 3)
      .detect("/definitely/not/here/rat.png")
      .unwrap_err();
    assert!(matches!(err, DetectorError::NotFound(_)));
    assert_eq!(transport.call_count(), 0);
  }

  #[test]
  fn request_carries_prompt_image_and_generation_config() {
    let image = temp_image("request");
    let transport = ScriptedTransport::new(vec![Ok(ResponseEnvelope::from_text("{}"))]);

    let detections = GeminiBuilder::default()
      .api_key("fake-key")
      .temperature(0.5)
      .max_output_tokens(256)
      .build_with_transport(&transport)
      .unwrap()
      .detect(&image)
      .unwrap();
    assert!(detections.is_empty());

    let calls = transport.calls.borrow();
    let parts = &calls[0]["contents"][0]["parts"];
    assert!(parts[0]["text"].as_str().unwrap().contains("detections"));
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    assert!(!parts[1]["inlineData"]["data"].as_str().unwrap().is_empty());
    assert_eq!(calls[0]["generationConfig"]["temperature"], 0.5);
    assert_eq!(calls[0]["generationConfig"]["maxOutputTokens"], 256);
    let _ = std::fs::remove_file(image);
  }

  #[test]
  fn missing_api_key_is_a_configuration_error() {
    let transport = ScriptedTransport::new(vec![]);
    let err = GeminiBuilder::default()
      .build_with_transport(&transport)
      .err()
      .unwrap();
    assert!(matches!(err, DetectorError::Configuration(_)));

    let err = GeminiBuilder::default()
      .api_key("   ")
      .build_with_transport(&transport)
      .err()
      .unwrap();
    assert!(matches!(err, DetectorError::Configuration(_)));
  }

  #[test]
  fn builder_reads_url_and_applies_floors() {
    let url = Url::parse("gemini://gemini-2.0-flash?temperature=0.4&max_retries=0&backoff=-1&max_output_tokens=512").unwrap();
    let builder = GeminiBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model, "gemini-2.0-flash");
    assert_eq!(builder.temperature, 0.4);
    assert_eq!(builder.max_retries, 1);
    assert_eq!(builder.backoff_seconds, 0.0);
    assert_eq!(builder.max_output_tokens, 512);

    let builder = GeminiBuilder::from_url(&Url::parse("gemini:").unwrap()).unwrap();
    assert_eq!(builder.model, DEFAULT_MODEL);

    assert!(GeminiBuilder::from_url(&Url::parse("image:///m.png").unwrap()).is_err());
    assert!(
      GeminiBuilder::from_url(&Url::parse("gemini://m?max_retries=many").unwrap()).is_err()
    );
  }

  #[test]
  fn backoff_is_linear_in_attempt_number() {
    let policy = RetryPolicy {
      max_retries: 3,
      backoff_seconds: 2.0,
    };
    assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    assert_eq!(policy.delay_for(2), Duration::from_secs(4));

    let policy = RetryPolicy {
      max_retries: 3,
      backoff_seconds: f64::MAX,
    };
    assert_eq!(policy.delay_for(1), Duration::MAX);
  }

  #[test]
  fn model_uses_the_decoded_image_without_reading_the_file() {
    let transport = ScriptedTransport::new(vec![Ok(ResponseEnvelope::from_text(
      r#"{"detections": [{"label": "rat", "confidence": 0.6}]}"#,
    ))]);
    let source = SourceImage {
      path: PathBuf::from("/definitely/not/here/rat.png"),
      image: RgbImage::from_pixel(8, 6, Rgb([0, 0, 0])),
    };

    let result = detector(&transport, 1).infer(&source).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(transport.call_count(), 1);
  }

  #[test]
  fn payload_excerpt_is_bounded() {
    assert_eq!(summarize_payload("  "), "<empty>");
    assert_eq!(summarize_payload(" short "), "short");

    let long = "鼠".repeat(EXCERPT_LIMIT + 10);
    let excerpt = summarize_payload(&long);
    assert_eq!(excerpt.chars().count(), EXCERPT_LIMIT + 1);
    assert!(excerpt.ends_with('…'));
  }
}
