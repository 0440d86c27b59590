// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info, warn};

use pitchtrack::{
  config::AppConfig,
  console::StdoutConsole,
  controller::ProcessingController,
  input::open_video_file,
  model::DetectionLog,
  output::create_video_file,
  task::{PipelineConfig, PipelineEvent, run_tracking_job},
};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  let config = AppConfig::load(&args.config)
    .with_context(|| format!("无法加载配置文件 {}", args.config.display()))?;
  let confidence_threshold = args.confidence.unwrap_or(config.confidence_threshold);
  ensure!(
    (0.0..=1.0).contains(&confidence_threshold),
    "置信度阈值 {} 超出有效范围 [0, 1]",
    confidence_threshold
  );
  let pipeline_config = PipelineConfig {
    confidence_threshold,
    max_age: config.max_age,
    max_frames: (args.max_frames > 0).then_some(args.max_frames),
  };

  info!("模型文件路径: {}", config.model_path.display());
  info!("置信度阈值: {}", pipeline_config.confidence_threshold);
  info!("轨迹最大存活帧数: {}", pipeline_config.max_age);
  info!(
    "IoT Hub 上报: {}",
    if config.telemetry_enabled() { "开启" } else { "关闭" }
  );

  let model = DetectionLog::open(&config.model_path)
    .with_context(|| format!("无法加载检测结果 {}", config.model_path.display()))?;
  info!("已加载 {} 帧检测结果", model.frame_count());

  // 工作线程的控制台输出直接镜像到终端
  let mut controller = ProcessingController::new().with_echo(Arc::new(StdoutConsole));
  controller.choose_input(&args.input)?;
  println!("{}", controller.status_text());
  controller.choose_output(&args.output);
  println!("{}", controller.status_text());

  let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
  ctrlc::set_handler(move || {
    let _ = stop_tx.try_send(());
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let iot_hub_key = config.iot_hub_key.clone();
  controller.start(move |ctx| {
    run_tracking_job(
      ctx,
      pipeline_config,
      &iot_hub_key,
      model,
      open_video_file,
      create_video_file,
    )
  })?;
  println!("{}", controller.status_text());

  let stop_timeout = Duration::from_millis(args.stop_timeout_ms);
  let mut save_eligible = false;
  loop {
    if stop_rx.try_recv().is_ok() && controller.can_stop() {
      warn!("收到中断信号，停止处理...");
      let stopped = controller.stop(stop_timeout);
      println!("{}", controller.status_text());
      if let Err(e) = stopped {
        error!("{}", e);
        return Err(e.into());
      }
    }

    let event = controller.events().recv_timeout(EVENT_POLL_INTERVAL);
    match event {
      Ok(PipelineEvent::SaveEligibility(eligible)) => save_eligible = eligible,
      // 终端前端没有预览窗口和状态栏，控制台文字已由 echo 输出
      Ok(PipelineEvent::Status(_) | PipelineEvent::Frame(_) | PipelineEvent::Console(_)) => {}
      Ok(PipelineEvent::Finished(result)) => {
        controller.reap()?;
        let summary = result?;
        info!(
          "处理结束: {}/{} 帧",
          summary.frames_processed, summary.total_frames
        );
        break;
      }
      Err(RecvTimeoutError::Timeout) => {}
      Err(RecvTimeoutError::Disconnected) => break,
    }
  }

  if save_eligible && controller.can_save() {
    if let Some(output) = controller.output() {
      println!("输出视频可保存: {}", output.display());
    }
  } else {
    println!("处理进度不足 25%，输出视频不建议保存");
  }

  Ok(())
}
