// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// tests/pipeline_run.rs - 控制器驱动的端到端处理
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

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use image::RgbImage;
use pitchtrack::{
  controller::{ProcessingController, STATUS_PAUSED},
  frame::{VideoFrame, VideoGeometry},
  input::{InputError, VideoSource},
  model::DetectionLog,
  output::{OutputError, VideoSink},
  session::CancellationToken,
  task::{
    FramePipeline, PipelineConfig, PipelineError, PipelineEvent, RunSummary, Task,
    run_tracking_job,
  },
  tracker::IouTracker,
};

const TOTAL_FRAMES: u64 = 100;
const WAIT: Duration = Duration::from_secs(10);

/// 100 帧的合成视频，可在指定帧后停住等待停止请求
struct SyntheticVideo {
  next_index: u64,
  pause_after: Option<u64>,
  token: CancellationToken,
  reached: Sender<()>,
}

impl VideoSource for SyntheticVideo {
  fn geometry(&self) -> VideoGeometry {
    VideoGeometry {
      width: 96,
      height: 64,
      fps: 25.0,
    }
  }

  fn frame_count(&self) -> u64 {
    TOTAL_FRAMES
  }

  fn next_frame(&mut self) -> Result<Option<VideoFrame>, InputError> {
    if self.pause_after == Some(self.next_index - 1) {
      let _ = self.reached.send(());
      while !self.token.is_cancelled() {
        thread::sleep(Duration::from_millis(1));
      }
      return Ok(None);
    }
    if self.next_index > TOTAL_FRAMES {
      return Ok(None);
    }
    let frame = VideoFrame::filled(self.next_index, 96, 64, [0, 120, 0]);
    self.next_index += 1;
    Ok(Some(frame))
  }
}

#[derive(Clone, Default)]
struct CountingSink {
  frames: Arc<Mutex<u64>>,
  finished: Arc<Mutex<bool>>,
}

impl VideoSink for CountingSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    assert_eq!(image.dimensions(), (96, 64));
    *self.frames.lock().unwrap() += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    *self.finished.lock().unwrap() = true;
    Ok(())
  }
}

fn detection_log() -> DetectionLog {
  let mut log = String::new();
  for frame in 1..=TOTAL_FRAMES {
    let x = 10 + frame % 5;
    log.push_str(&format!(
      "{{\"frame\": {frame}, \"boxes\": [[{x}, 10, {}, 50, 0.9, 1], [60, 20, 66, 26, 0.75, 0], [70, 30, 80, 40, 0.5, 2]]}}\n",
      x + 20
    ));
  }
  DetectionLog::from_reader(Cursor::new(log)).unwrap()
}

struct Run {
  controller: ProcessingController,
  sink: CountingSink,
  reached: crossbeam_channel::Receiver<()>,
}

fn start_run(pause_after: Option<u64>) -> Run {
  let mut controller = ProcessingController::new();
  controller.choose_input("synthetic.mp4").unwrap();
  controller.choose_output("synthetic_out");

  let sink = CountingSink::default();
  let job_sink = sink.clone();
  let (reached_tx, reached_rx) = bounded(1);
  controller
    .start(move |ctx| {
      let source = SyntheticVideo {
        next_index: 1,
        pause_after,
        token: ctx.token.clone(),
        reached: reached_tx,
      };
      FramePipeline::new(
        PipelineConfig::default(),
        ctx.token,
        ctx.status,
        ctx.events,
        ctx.console,
      )
      .run_task(source, detection_log(), IouTracker::with_max_age(50), job_sink)
    })
    .unwrap();

  Run {
    controller,
    sink,
    reached: reached_rx,
  }
}

/// 收集事件直到工作线程结束
fn drain(controller: &ProcessingController) -> (Vec<bool>, String, RunSummary) {
  let mut eligibility = Vec::new();
  let mut console = String::new();
  loop {
    match controller.events().recv_timeout(WAIT) {
      Ok(PipelineEvent::SaveEligibility(eligible)) => eligibility.push(eligible),
      Ok(PipelineEvent::Console(text)) => console.push_str(&text),
      Ok(PipelineEvent::Finished(result)) => return (eligibility, console, result.unwrap()),
      Ok(_) => {}
      Err(e) => panic!("worker did not finish: {e}"),
    }
  }
}

fn stop_after(frames: u64) -> (Run, Vec<bool>, RunSummary) {
  let mut run = start_run(Some(frames));
  run.reached.recv_timeout(WAIT).unwrap();

  let snapshot = run.controller.status().snapshot();
  assert!(snapshot.running);
  assert_eq!(snapshot.current_frame, frames);
  assert_eq!(snapshot.total_frames, TOTAL_FRAMES);
  assert!(!run.controller.status().save_eligible());
  assert!(!run.controller.can_save());

  run.controller.stop(WAIT).unwrap();
  assert_eq!(run.controller.status_text(), STATUS_PAUSED);
  let (eligibility, _, summary) = drain(&run.controller);
  (run, eligibility, summary)
}

#[test]
fn stopping_after_a_quarter_enables_save() {
  let (run, eligibility, summary) = stop_after(25);

  assert_eq!(summary.frames_processed, 25);
  assert!(summary.save_eligible);
  // 运行中每帧都不可保存，停止后的最后一次判定才可保存
  assert_eq!(eligibility.len(), 26);
  assert!(eligibility[..25].iter().all(|e| !e));
  assert_eq!(eligibility.last(), Some(&true));
  assert!(run.controller.can_save());
  assert!(run.controller.can_start());
  assert_eq!(*run.sink.frames.lock().unwrap(), 25);
  assert!(*run.sink.finished.lock().unwrap());
}

#[test]
fn stopping_before_a_quarter_keeps_save_disabled() {
  let (run, eligibility, summary) = stop_after(24);

  assert_eq!(summary.frames_processed, 24);
  assert!(!summary.save_eligible);
  assert!(eligibility.iter().all(|e| !e));
  assert!(!run.controller.can_save());
}

#[test]
fn full_run_reports_confirmed_tracks() {
  let mut run = start_run(None);
  let (eligibility, console, summary) = drain(&run.controller);
  assert!(run.controller.reap().unwrap());
  assert_eq!(run.controller.status_text(), STATUS_PAUSED);

  assert_eq!(summary.frames_processed, TOTAL_FRAMES);
  assert_eq!(summary.total_frames, TOTAL_FRAMES);
  assert!(!summary.cancelled);
  assert_eq!(eligibility.len(), TOTAL_FRAMES as usize + 1);
  assert_eq!(eligibility.last(), Some(&true));
  assert!(run.controller.can_save());
  assert_eq!(*run.sink.frames.lock().unwrap(), TOTAL_FRAMES);

  assert!(console.contains("Frame: 1/100\n[]\n\n"));
  assert!(console.contains("Frame: 100/100\n"));
  // 0.75 的足球被保留，0.5 的其他类别被丢弃
  assert!(console.contains(" Ball [60, 20, 66, 26]"));
  assert!(console.contains(" Player ["));
  assert!(!console.contains("[70, 30, 80, 40]"));
}

#[test]
fn bad_iot_hub_key_fails_before_opening_files() {
  let mut controller = ProcessingController::new();
  controller.choose_input("synthetic.mp4").unwrap();
  controller.choose_output("synthetic_out");

  let opened = Arc::new(AtomicBool::new(false));
  let created = Arc::new(AtomicBool::new(false));
  let (job_opened, job_created) = (opened.clone(), created.clone());
  controller
    .start(move |ctx| {
      run_tracking_job(
        ctx,
        PipelineConfig::default(),
        "DeviceId=camera",
        detection_log(),
        move |path: &Path| -> Result<SyntheticVideo, InputError> {
          job_opened.store(true, Ordering::SeqCst);
          Err(InputError::NotFound(path.to_path_buf()))
        },
        move |_: &Path, _: VideoGeometry| -> Result<CountingSink, OutputError> {
          job_created.store(true, Ordering::SeqCst);
          Ok(CountingSink::default())
        },
      )
    })
    .unwrap();

  let result = loop {
    match controller.events().recv_timeout(WAIT) {
      Ok(PipelineEvent::Finished(result)) => break result,
      Ok(_) => {}
      Err(e) => panic!("worker did not finish: {e}"),
    }
  };
  assert!(matches!(result, Err(PipelineError::TelemetryConnect(_))));
  assert!(!opened.load(Ordering::SeqCst));
  assert!(!created.load(Ordering::SeqCst));
  assert!(controller.reap().unwrap());
  assert!(!controller.can_save());
}
