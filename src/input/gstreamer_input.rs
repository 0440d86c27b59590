// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 通过 `decodebin` 解码视频文件，`appsink` 逐帧取出 RGB 数据。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use pitchtrack::input::{GStreamerInputPipelineBuilder, VideoSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = GStreamerInputPipelineBuilder::new()
//!     .file("match.mp4")
//!     .target_format("RGB")
//!     .build()?;
//! println!("总帧数: {}", source.frame_count());
//! while let Some(frame) = source.next_frame()? {
//!     println!("处理帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! 与需要丢帧的实时源不同，这里的 `appsink` 不丢帧，保证输出视频与输入逐帧对应。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};

use super::{InputError, VideoSource};
use crate::frame::{FrameError, VideoFrame, VideoGeometry};

const PREROLL_TIMEOUT_SECS: u64 = 10;
const FALLBACK_FPS: f64 = 25.0;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 管道中没有任何元素
  #[error("Pipeline is empty")]
  EmptyPipeline,
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
    let path = path.as_ref().to_string_lossy().into_owned();
    self.items.push(GStreamerInputBuilderItem::FileSource(path));
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  pub fn description(&self) -> Result<String, GStreamerInputError> {
    if self.items.is_empty() {
      return Err(GStreamerInputError::EmptyPipeline);
    }
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    Ok(format!(
      "{} ! appsink name=sink sync=false max-buffers=4",
      basic_pipeline
    ))
  }

  pub fn build(self) -> Result<GStreamerVideoSource, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description()?;
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 先预滚到 Paused，拿到 caps 和时长后再播放
    pipeline.set_state(gst::State::Paused)?;
    let (state_change, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    state_change?;

    let preroll = appsink.pull_preroll()?;
    let caps = preroll
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in preroll sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fraction = video_info.fps();
    let fps = if fraction.numer() > 0 && fraction.denom() > 0 {
      fraction.numer() as f64 / fraction.denom() as f64
    } else {
      warn!("视频未声明帧率，使用默认值 {}", FALLBACK_FPS);
      FALLBACK_FPS
    };

    let frame_count = pipeline
      .query_duration::<gst::ClockTime>()
      .map(|duration| (duration.nseconds() as f64 * fps / 1e9).round() as u64)
      .unwrap_or(0);

    let geometry = VideoGeometry {
      width: video_info.width(),
      height: video_info.height(),
      fps,
    };

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "视频已打开: {}x{} @ {:.2} fps, 共 {} 帧",
      geometry.width, geometry.height, geometry.fps, frame_count
    );

    Ok(GStreamerVideoSource {
      pipeline,
      appsink,
      geometry,
      frame_count,
      frame_index: 0,
    })
  }
}

/// GStreamer 视频文件输入
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  geometry: VideoGeometry,
  frame_count: u64,
  frame_index: u64,
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl VideoSource for GStreamerVideoSource {
  fn geometry(&self) -> VideoGeometry {
    self.geometry
  }

  fn frame_count(&self) -> u64 {
    self.frame_count
  }

  fn next_frame(&mut self) -> Result<Option<VideoFrame>, InputError> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => return Ok(None),
      Err(e) => return Err(GStreamerInputError::from(e).into()),
    };
    self.frame_index += 1;
    let frame = convert_sample(sample, self.frame_index)?;
    Ok(Some(frame))
  }
}

fn convert_sample(sample: gst::Sample, index: u64) -> Result<VideoFrame, InputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;
  let row_len = width as usize * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 去掉行对齐填充
  let needed = stride * (height as usize).saturating_sub(1) + row_len;
  if data.len() < needed {
    return Err(
      FrameError::LengthMismatch {
        expected: needed,
        actual: data.len(),
      }
      .into(),
    );
  }
  let mut packed = Vec::with_capacity(row_len * height as usize);
  for row in 0..height as usize {
    let start = row * stride;
    packed.extend_from_slice(&data[start..start + row_len]);
  }

  let frame = match video_info.format() {
    gst_video::VideoFormat::Rgb => VideoFrame::from_rgb(index, width, height, packed)?,
    gst_video::VideoFormat::Bgr => VideoFrame::from_bgr(index, width, height, &packed)?,
    other => return Err(GStreamerInputError::UnsupportedFormat(other).into()),
  };
  Ok(frame)
}
