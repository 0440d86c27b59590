// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/task.rs - 逐帧处理流水线
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

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_AGE},
  console::ConsoleSink,
  controller::WorkerContext,
  frame::{VideoFrame, VideoGeometry},
  input::{InputError, VideoSource},
  model::{ClassLabel, DetectResult, Model, WithLabel},
  output::{
    OutputError, VideoSink,
    draw::{Draw, DrawTracksOnImage},
  },
  session::{CancellationToken, FpsMeter, SessionStatus, round_fps},
  telemetry::{IotHubClient, Publisher, TelemetryError, report_text},
  tracker::{BoundingBox, Detection, IouTracker, Track, Tracker},
};

/// 工作线程发给前端的排队通知
#[derive(Debug)]
pub enum PipelineEvent {
  /// 状态栏文字
  Status(String),
  /// 控制台镜像文字
  Console(String),
  /// 标注后的帧
  Frame(Arc<RgbImage>),
  SaveEligibility(bool),
  /// 工作线程结束
  Finished(Result<RunSummary, PipelineError>),
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("读取视频失败: {0}")]
  Source(#[from] InputError),
  #[error("检测失败: {0:#}")]
  Detector(anyhow::Error),
  #[error("跟踪失败: {0:#}")]
  Tracker(anyhow::Error),
  #[error("写入视频失败: {0}")]
  Sink(#[from] OutputError),
  #[error("IoT Hub 消息发送失败: {0}")]
  Telemetry(#[source] TelemetryError),
  #[error("无法连接 IoT Hub: {0}")]
  TelemetryConnect(#[source] TelemetryError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
  pub confidence_threshold: f32,
  pub max_age: u32,
  /// 最多处理的帧数，`None` 表示处理到流结束
  pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      max_age: DEFAULT_MAX_AGE,
      max_frames: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub frames_processed: u64,
  pub total_frames: u64,
  /// 因停止请求而提前结束
  pub cancelled: bool,
  pub save_eligible: bool,
}

pub trait Task<S, M, T, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, source: S, model: M, tracker: T, sink: O) -> Result<Self::Output, Self::Error>;
}

/// 过滤低置信度检测并映射类别，`< threshold` 的检测被丢弃
pub fn filter_detections(result: &DetectResult, threshold: f32) -> Vec<Detection> {
  result
    .iter()
    .filter(|item| !(item.score < threshold))
    .map(|item| Detection {
      bbox: BoundingBox::from_ltrb(item.bbox),
      confidence: item.score,
      label: ClassLabel::from_label_id(item.class_id),
    })
    .collect()
}

/// `"{track_id} {class} [{x1}, {y1}, {x2}, {y2}]"`
pub fn format_track_line(track: &Track) -> String {
  let [x1, y1, x2, y2] = track.ltrb_px();
  format!("{} {} [{}, {}, {}, {}]", track.id, track.label, x1, y1, x2, y2)
}

/// 单个工作线程上的逐帧流水线：读帧、检测、过滤、跟踪、绘制、编码、发布
pub struct FramePipeline {
  config: PipelineConfig,
  token: CancellationToken,
  status: Arc<SessionStatus>,
  events: Sender<PipelineEvent>,
  console: Arc<dyn ConsoleSink>,
  publisher: Option<Box<dyn Publisher>>,
  draw: Draw,
}

impl FramePipeline {
  pub fn new(
    config: PipelineConfig,
    token: CancellationToken,
    status: Arc<SessionStatus>,
    events: Sender<PipelineEvent>,
    console: Arc<dyn ConsoleSink>,
  ) -> Self {
    Self {
      config,
      token,
      status,
      events,
      console,
      publisher: None,
      draw: Draw::default(),
    }
  }

  pub fn with_publisher(mut self, publisher: Option<Box<dyn Publisher>>) -> Self {
    self.publisher = publisher;
    self
  }

  fn send(&self, event: PipelineEvent) {
    // 前端已退出时丢弃
    let _ = self.events.send(event);
  }

  fn publish_save_eligibility(&self) {
    self.send(PipelineEvent::SaveEligibility(self.status.save_eligible()));
  }

  fn process_frames<S, M, T, O, ME, TE>(
    &self,
    source: &mut S,
    model: &M,
    tracker: &mut T,
    sink: &mut O,
  ) -> Result<bool, PipelineError>
  where
    S: VideoSource,
    M: Model<Input = VideoFrame, Output = DetectResult, Error = ME>,
    T: Tracker<Error = TE>,
    O: VideoSink,
    ME: std::error::Error + Send + Sync + 'static,
    TE: std::error::Error + Send + Sync + 'static,
  {
    let mut fps_meter = FpsMeter::new();
    let mut processed = 0u64;

    loop {
      if self.token.is_cancelled() {
        warn!("收到停止请求，退出处理循环");
        return Ok(true);
      }
      if self.config.max_frames.is_some_and(|n| processed >= n) {
        info!("达到指定帧数 {}, 退出处理循环", processed);
        return Ok(false);
      }

      let Some(frame) = source.next_frame()? else {
        info!("视频读取完毕");
        return Ok(false);
      };
      let current = self.status.advance();
      processed += 1;

      let result = model
        .infer(&frame)
        .map_err(|e| PipelineError::Detector(anyhow::Error::new(e)))?;
      let detections = filter_detections(&result, self.config.confidence_threshold);
      debug!(
        "帧 {}: 检测 {} 个，保留 {} 个",
        frame.index,
        result.len(),
        detections.len()
      );

      let tracks: Vec<Track> = tracker
        .update(&detections, &frame)
        .map_err(|e| PipelineError::Tracker(anyhow::Error::new(e)))?
        .into_iter()
        .filter(Track::is_confirmed)
        .collect();

      let mut image = frame.into_image();
      self.draw.draw_tracks_on_image(&mut image, &tracks);
      let report: Vec<String> = tracks.iter().map(format_track_line).collect();

      let fps = round_fps(fps_meter.tick(Instant::now()));

      self.send(PipelineEvent::Frame(Arc::new(image.clone())));
      sink.write_frame(&image)?;

      let total = self.status.snapshot().total_frames;
      let status_line = format!("FPS: {:.2}, Frame: {}/{}", fps, current, total);
      self.console.write_line(&status_line);
      self.console.write_line(&report_text(&report));
      self.console.write_line("");
      self.send(PipelineEvent::Status(status_line));

      self.publish_save_eligibility();

      if let Some(publisher) = &self.publisher {
        if let Err(e) = publisher.publish(&report) {
          self.console.write_line(&format!("IoT Hub 消息发送失败: {}", e));
          return Err(PipelineError::Telemetry(e));
        }
        self
          .console
          .write_line(&format!("Message sent: {}", report_text(&report)));
      }
    }
  }
}

impl<S, M, T, O, ME, TE> Task<S, M, T, O> for FramePipeline
where
  S: VideoSource,
  M: Model<Input = VideoFrame, Output = DetectResult, Error = ME>,
  T: Tracker<Error = TE>,
  O: VideoSink,
  ME: std::error::Error + Send + Sync + 'static,
  TE: std::error::Error + Send + Sync + 'static,
{
  type Output = RunSummary;
  type Error = PipelineError;

  fn run_task(
    self,
    mut source: S,
    model: M,
    mut tracker: T,
    mut sink: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始处理...");
    self.status.begin(source.frame_count());

    let outcome = self.process_frames(&mut source, &model, &mut tracker, &mut sink);

    // 无论是否出错都要关闭输出，保证容器可用
    self.status.finish();
    drop(source);
    let finished = sink.finish();
    self.publish_save_eligibility();
    if let Some(publisher) = &self.publisher {
      publisher.shutdown();
    }

    let cancelled = outcome?;
    finished?;

    let snapshot = self.status.snapshot();
    info!(
      "处理结束: {}/{} 帧{}",
      snapshot.current_frame,
      snapshot.total_frames,
      if cancelled { " (已停止)" } else { "" }
    );
    Ok(RunSummary {
      frames_processed: snapshot.current_frame,
      total_frames: snapshot.total_frames,
      cancelled,
      save_eligible: snapshot.save_eligible(),
    })
  }
}

/// 配置了设备连接字符串时连接 IoT Hub，空字符串表示不上报
pub fn connect_publisher(iot_hub_key: &str) -> Result<Option<Box<dyn Publisher>>, PipelineError> {
  if iot_hub_key.trim().is_empty() {
    return Ok(None);
  }
  let client = IotHubClient::connect(iot_hub_key).map_err(PipelineError::TelemetryConnect)?;
  Ok(Some(Box::new(client)))
}

/// 工作线程上的一次完整跟踪
///
/// 依次连接 IoT Hub、打开输入、按输入的分辨率和帧率创建输出，再逐帧处理。
/// 连接失败时不会打开任何文件。
pub fn run_tracking_job<S, M, O, ME, FS, FO>(
  ctx: WorkerContext,
  config: PipelineConfig,
  iot_hub_key: &str,
  model: M,
  open_source: FS,
  create_sink: FO,
) -> Result<RunSummary, PipelineError>
where
  S: VideoSource,
  M: Model<Input = VideoFrame, Output = DetectResult, Error = ME>,
  O: VideoSink,
  ME: std::error::Error + Send + Sync + 'static,
  FS: FnOnce(&Path) -> Result<S, InputError>,
  FO: FnOnce(&Path, VideoGeometry) -> Result<O, OutputError>,
{
  let publisher = connect_publisher(iot_hub_key)?;
  let source = open_source(&ctx.input)?;
  let sink = create_sink(&ctx.output, source.geometry())?;
  let tracker = IouTracker::with_max_age(config.max_age);

  FramePipeline::new(config, ctx.token, ctx.status, ctx.events, ctx.console)
    .with_publisher(publisher)
    .run_task(source, model, tracker, sink)
}
