// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

#[cfg(feature = "gstreamer_output")]
use crate::frame::VideoGeometry;

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutputError, GStreamerVideoSink};

pub const OUTPUT_EXTENSION: &str = "mp4";

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  SizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出已结束，不能继续写入")]
  AlreadyFinished,
}

/// 按编码顺序接收帧的视频输出
pub trait VideoSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  /// 刷新编码器并关闭文件
  fn finish(&mut self) -> Result<(), OutputError>;
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(image)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

/// 输出路径没有 `.mp4` 后缀时补上
pub fn normalize_output_path(path: &Path) -> PathBuf {
  let has_extension = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION))
    .unwrap_or(false);
  if has_extension {
    return path.to_path_buf();
  }
  let mut name = OsString::from(path.as_os_str());
  name.push(".");
  name.push(OUTPUT_EXTENSION);
  PathBuf::from(name)
}

/// 创建与输入视频参数一致的输出文件
#[cfg(feature = "gstreamer_output")]
pub fn create_video_file(path: &Path, geometry: VideoGeometry) -> Result<GStreamerVideoSink, OutputError> {
  Ok(GStreamerVideoSink::create(path, geometry)?)
}
