// 该文件是 Laoshu （老鼠巡检） 项目的一部分。
// src/input.rs - 图像输入
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

use image::{ImageError, ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Image not found: {}", .0.display())]
  NotFound(PathBuf),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] ImageError),
}

/// 读取图像文件并转换为 RGB8
pub fn read_rgb_image(path: &Path) -> Result<RgbImage, ImageError> {
  let image = ImageReader::open(path)
    .map_err(ImageError::IoError)?
    .with_guessed_format()
    .map_err(ImageError::IoError)?
    .decode()?;
  Ok(image.to_rgb8())
}

/// 待检测的源图像
#[derive(Debug, Clone)]
pub struct SourceImage {
  pub path: PathBuf,
  pub image: RgbImage,
}

impl SourceImage {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

pub struct ImageFileInput {
  source: Option<SourceImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    if !path.exists() {
      return Err(ImageFileInputError::NotFound(path.to_path_buf()));
    }

    let image = read_rgb_image(path)?;
    Ok(ImageFileInput {
      source: Some(SourceImage {
        path: path.to_path_buf(),
        image,
      }),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = SourceImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.source.take()
  }
}
