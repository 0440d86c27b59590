// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/input.rs - 视频输入
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

use thiserror::Error;

use crate::frame::{FrameError, VideoFrame, VideoGeometry};

/// 可选择的输入视频扩展名
pub const SUPPORTED_INPUT_EXTENSIONS: [&str; 2] = ["mp4", "avi"];

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInputError, GStreamerInputPipelineBuilder, GStreamerVideoSource,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("不支持的视频格式 (仅支持 .mp4 / .avi): {0}")]
  UnsupportedExtension(PathBuf),
  #[error("视频文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("帧数据错误: {0}")]
  FrameError(#[from] FrameError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 按顺序读取帧的视频源
pub trait VideoSource {
  fn geometry(&self) -> VideoGeometry;

  /// 容器报告的总帧数，未知时为 0
  fn frame_count(&self) -> u64;

  /// 读取下一帧，`Ok(None)` 表示流结束
  fn next_frame(&mut self) -> Result<Option<VideoFrame>, InputError>;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
  fn geometry(&self) -> VideoGeometry {
    (**self).geometry()
  }

  fn frame_count(&self) -> u64 {
    (**self).frame_count()
  }

  fn next_frame(&mut self) -> Result<Option<VideoFrame>, InputError> {
    (**self).next_frame()
  }
}

/// 检查输入路径的扩展名（不区分大小写）
pub fn validate_input_path(path: &Path) -> Result<(), InputError> {
  let supported = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      SUPPORTED_INPUT_EXTENSIONS
        .iter()
        .any(|s| ext.eq_ignore_ascii_case(s))
    })
    .unwrap_or(false);
  if supported {
    Ok(())
  } else {
    Err(InputError::UnsupportedExtension(path.to_path_buf()))
  }
}

/// 打开视频文件
#[cfg(feature = "gstreamer_input")]
pub fn open_video_file(path: &Path) -> Result<GStreamerVideoSource, InputError> {
  validate_input_path(path)?;
  if !path.exists() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }
  let source = GStreamerInputPipelineBuilder::new()
    .file(path)
    .target_format("RGB")
    .build()?;
  Ok(source)
}
