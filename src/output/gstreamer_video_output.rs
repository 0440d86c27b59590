// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的帧按顺序编码为 H.264 MP4 文件，分辨率和帧率与输入视频一致。
//!
//! ```no_run
//! use pitchtrack::{frame::VideoGeometry, output::{GStreamerVideoSink, VideoSink}};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let geometry = VideoGeometry { width: 1280, height: 720, fps: 25.0 };
//! let mut sink = GStreamerVideoSink::create("annotated.mp4", geometry)?;
//! // sink.write_frame(&image)?;
//! sink.finish()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use super::{OutputError, VideoSink};
use crate::frame::VideoGeometry;

const EOS_TIMEOUT_SECS: u64 = 10;
// 帧率以 1/1000 为单位写入 caps，29.97 等非整数帧率不丢精度
const FPS_DENOMINATOR: i32 = 1000;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 推送数据错误
  #[error("Flow error: {0:?}")]
  FlowError(gst::FlowError),
  /// 参数验证错误
  #[error("Invalid geometry: {0}")]
  InvalidGeometry(String),
}

pub fn pipeline_description(path: &Path) -> String {
  format!(
    "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink location=\"{}\"",
    path.to_string_lossy()
  )
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoSink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  geometry: VideoGeometry,
  frame_duration_ns: u64,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoSink {
  pub fn create<P: AsRef<Path>>(
    path: P,
    geometry: VideoGeometry,
  ) -> Result<Self, GStreamerVideoOutputError> {
    let path = path.as_ref();
    if geometry.width == 0 || geometry.height == 0 || !(geometry.fps > 0.0) {
      return Err(GStreamerVideoOutputError::InvalidGeometry(format!(
        "{}x{} @ {}",
        geometry.width, geometry.height, geometry.fps
      )));
    }

    // Initialize GStreamer (subsequent calls are safe no-ops)
    gst::init()?;

    let pipeline_desc = pipeline_description(path);
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let fps_numerator = (geometry.fps * FPS_DENOMINATOR as f64).round() as i32;
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", geometry.width as i32)
      .field("height", geometry.height as i32)
      .field("framerate", gst::Fraction::new(fps_numerator, FPS_DENOMINATOR))
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {:.2} fps -> {}",
      geometry.width,
      geometry.height,
      geometry.fps,
      path.display()
    );

    Ok(GStreamerVideoSink {
      pipeline,
      appsrc,
      geometry,
      frame_duration_ns: (1e9 / geometry.fps).round() as u64,
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_slice(data.to_vec());
    {
      let buffer_ref = buffer.get_mut().ok_or_else(|| {
        GStreamerVideoOutputError::PipelineError("Buffer is not writable".to_string())
      })?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * self.frame_duration_ns,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_duration_ns));
    }
    self.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerVideoOutputError::FlowError)?;
    Ok(())
  }

  /// 发送 EOS 并等待封装器写完文件尾
  fn finalize(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerVideoOutputError::FlowError)?;

    let result = match self.pipeline.bus() {
      Some(bus) => match bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      ) {
        Some(message) => match message.view() {
          gst::MessageView::Error(err) => Err(GStreamerVideoOutputError::PipelineError(
            err.error().to_string(),
          )),
          _ => Ok(()),
        },
        None => {
          warn!("等待 EOS 超时，输出文件可能不完整");
          Ok(())
        }
      },
      None => Ok(()),
    };

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    result
  }
}

impl VideoSink for GStreamerVideoSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if self.finished {
      return Err(OutputError::AlreadyFinished);
    }
    let actual = (image.width(), image.height());
    let expected = (self.geometry.width, self.geometry.height);
    if actual != expected {
      return Err(OutputError::SizeMismatch { expected, actual });
    }
    self.push_frame(image.as_raw())?;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self.finalize()?;
    Ok(())
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if let Err(e) = self.finalize() {
      error!("关闭视频输出时出错: {}", e);
    }
  }
}
