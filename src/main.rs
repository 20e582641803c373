// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use laoshu::{
  FromUrl,
  input::ImageFileInput,
  model::GeminiBuilder,
  output::OutputWrapper,
  task::{DetectionFilter, OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());
  info!("输出地址: {}", args.output);
  info!("置信度阈值: {}", args.confidence);

  let input = ImageFileInput::open(&args.input)?;

  let mut builder = GeminiBuilder::from_url(&args.model)?;
  if let Some(api_key) = args.api_key {
    builder = builder.api_key(api_key);
  }
  let model = builder.build()?;

  let output = OutputWrapper::from_url(&args.output)?;

  let filter = DetectionFilter::default()
    .with_target(args.target)
    .with_min_confidence(args.confidence);
  let report = OneShotTask::default()
    .with_filter(filter)
    .run_task(input, model, output)?;

  println!("Rats detected: {}", report.count);

  Ok(())
}
