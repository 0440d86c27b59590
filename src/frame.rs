// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::{Rgb, RgbImage};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidSize { width: u32, height: u32 },
}

/// 视频流的分辨率和帧率，输出端按输入端的参数创建
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

/// 解码后的一帧视频（RGB, HWC 排列）
///
/// `index` 从 1 开始计数，与处理进度 `current/total` 中的 `current` 一致。
#[derive(Debug, Clone)]
pub struct VideoFrame {
  pub index: u64,
  pub image: RgbImage,
}

impl VideoFrame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  /// 纯色帧，测试和占位用
  pub fn filled(index: u64, width: u32, height: u32, color: [u8; 3]) -> Self {
    Self::new(index, RgbImage::from_pixel(width, height, Rgb(color)))
  }

  /// 从紧密排列的 RGB 数据构造帧
  pub fn from_rgb(
    index: u64,
    width: u32,
    height: u32,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let expected = expected_len(width, height)?;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let image = RgbImage::from_raw(width, height, data)
      .ok_or(FrameError::InvalidSize { width, height })?;
    Ok(Self::new(index, image))
  }

  /// 从紧密排列的 BGR 数据构造帧，按像素翻转通道顺序
  pub fn from_bgr(
    index: u64,
    width: u32,
    height: u32,
    data: &[u8],
  ) -> Result<Self, FrameError> {
    let expected = expected_len(width, height)?;
    if data.len() < expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let mut rgb = vec![0u8; expected];
    for (dst, src) in rgb
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(data[..expected].chunks_exact(RGB_CHANNELS))
    {
      dst[0] = src[2];
      dst[1] = src[1];
      dst[2] = src[0];
    }
    Self::from_rgb(index, width, height, rgb)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

fn expected_len(width: u32, height: u32) -> Result<usize, FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::InvalidSize { width, height });
  }
  Ok(RGB_CHANNELS * width as usize * height as usize)
}
