// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

/// Laoshu 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// 例如: gemini://gemini-2.5-flash-lite?temperature=0&max_retries=3&backoff=2
  #[arg(long, default_value = "gemini://gemini-2.5-flash-lite", value_name = "MODEL")]
  pub model: Url,

  /// 输入图像路径
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,

  /// 输出地址
  /// 支持:
  /// - log: 仅写入日志
  /// - record:///path/result.json 或 record:///path/result.txt
  #[arg(long, default_value = "log:", value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值
  #[arg(long, default_value_t = 0.2, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 目标标签（不区分大小写的子串匹配）
  #[arg(long, default_value = "rat", value_name = "LABEL")]
  pub target: String,

  /// Gemini API 密钥，不会被保存
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, value_name = "KEY")]
  pub api_key: Option<String>,
}
