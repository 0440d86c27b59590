// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/controller.rs - 开始/停止控制与按钮状态
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

//! 前端线程持有的处理控制器
//!
//! 每次开始处理时启动一个工作线程，停止时通过 [`CancellationToken`] 请求退出，
//! 并在给定时间内等待工作线程结束。工作线程只通过 [`PipelineEvent`] 与前端通信。
//!
//! 每次运行使用新的 [`SessionStatus`] 和事件通道，停止超时后仍在运行的旧线程
//! 写不到新一次运行的状态里。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  console::{self, ChannelConsole, ConsoleSink, TeeConsole},
  input::{InputError, validate_input_path},
  output::normalize_output_path,
  session::{CancellationToken, SessionStatus},
  task::{PipelineError, PipelineEvent, RunSummary},
};

pub const STATUS_NO_FILE: &str = "No file selected";
pub const STATUS_STARTED: &str = "Processing started...";
pub const STATUS_PAUSED: &str = "Processing paused.";

#[derive(Error, Debug)]
pub enum ControllerError {
  #[error("输入文件无效: {0}")]
  InvalidInput(#[from] InputError),
  #[error("尚未选择输入文件")]
  NoInput,
  #[error("尚未选择输出文件")]
  NoOutput,
  #[error("处理已在进行中")]
  AlreadyRunning,
  #[error("当前没有正在进行的处理")]
  NotRunning,
  #[error("上一次处理的工作线程尚未退出")]
  StillStopping,
  #[error("工作线程在 {0:?} 内未结束")]
  StopTimeout(Duration),
  #[error("工作线程异常退出")]
  WorkerPanicked,
  #[error("无法启动工作线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 传给工作线程的运行参数
pub struct WorkerContext {
  pub input: PathBuf,
  pub output: PathBuf,
  pub token: CancellationToken,
  pub status: Arc<SessionStatus>,
  pub events: Sender<PipelineEvent>,
  pub console: Arc<dyn ConsoleSink>,
}

struct Worker {
  token: CancellationToken,
  handle: JoinHandle<()>,
  done: Receiver<()>,
}

pub struct ProcessingController {
  input: Option<PathBuf>,
  output: Option<PathBuf>,
  status_text: String,
  status: Arc<SessionStatus>,
  events_tx: Sender<PipelineEvent>,
  events_rx: Receiver<PipelineEvent>,
  worker: Option<Worker>,
  // 停止超时后分离的工作线程
  detached: Option<Worker>,
  echo: Option<Arc<dyn ConsoleSink>>,
  save_enabled: bool,
}

impl Default for ProcessingController {
  fn default() -> Self {
    Self::new()
  }
}

impl ProcessingController {
  pub fn new() -> Self {
    let (events_tx, events_rx) = unbounded();
    Self {
      input: None,
      output: None,
      status_text: STATUS_NO_FILE.to_string(),
      status: Arc::new(SessionStatus::new()),
      events_tx,
      events_rx,
      worker: None,
      detached: None,
      echo: None,
      save_enabled: false,
    }
  }

  /// 工作线程的控制台输出同时写入 `echo`
  pub fn with_echo(mut self, echo: Arc<dyn ConsoleSink>) -> Self {
    self.echo = Some(echo);
    self
  }

  /// 前端读取通知的通道
  pub fn events(&self) -> &Receiver<PipelineEvent> {
    &self.events_rx
  }

  pub fn status(&self) -> &Arc<SessionStatus> {
    &self.status
  }

  pub fn status_text(&self) -> &str {
    &self.status_text
  }

  pub fn input(&self) -> Option<&Path> {
    self.input.as_deref()
  }

  pub fn output(&self) -> Option<&Path> {
    self.output.as_deref()
  }

  /// 选择输入视频，仅接受 `.mp4` / `.avi`
  pub fn choose_input<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ControllerError> {
    let path = path.as_ref();
    validate_input_path(path)?;
    self.status_text = format!("File selected: {}", path.display());
    self.input = Some(path.to_path_buf());
    Ok(())
  }

  /// 选择输出路径，缺少 `.mp4` 后缀时补上
  pub fn choose_output<P: AsRef<Path>>(&mut self, path: P) -> PathBuf {
    let path = normalize_output_path(path.as_ref());
    self.status_text = format!("Output file selected: {}", path.display());
    self.output = Some(path.clone());
    path
  }

  pub fn can_start(&self) -> bool {
    self.input.is_some() && self.worker.is_none() && !self.is_stopping()
  }

  /// 停止超时的工作线程是否仍在运行
  pub fn is_stopping(&self) -> bool {
    self
      .detached
      .as_ref()
      .is_some_and(|worker| !worker.handle.is_finished())
  }

  pub fn can_stop(&self) -> bool {
    self.worker.is_some()
  }

  pub fn can_save(&self) -> bool {
    self.save_enabled && self.worker.is_none()
  }

  /// 启动工作线程执行 `job`
  ///
  /// 工作线程内的 `tracing` 日志被转发到前端控制台；`job` 返回后发送
  /// [`PipelineEvent::Finished`]。
  pub fn start<F>(&mut self, job: F) -> Result<(), ControllerError>
  where
    F: FnOnce(WorkerContext) -> Result<RunSummary, PipelineError> + Send + 'static,
  {
    if self.worker.is_some() {
      return Err(ControllerError::AlreadyRunning);
    }
    let input = self.input.clone().ok_or(ControllerError::NoInput)?;
    let output = self.output.clone().ok_or(ControllerError::NoOutput)?;
    if let Some(detached) = self.detached.take() {
      if !detached.handle.is_finished() {
        self.detached = Some(detached);
        return Err(ControllerError::StillStopping);
      }
      if detached.handle.join().is_err() {
        warn!("上一次处理的工作线程异常退出");
      }
    }

    let (events_tx, events_rx) = unbounded();
    self.events_tx = events_tx;
    self.events_rx = events_rx;
    self.status = Arc::new(SessionStatus::new());

    let channel = ChannelConsole::new(self.events_tx.clone());
    let console: Arc<dyn ConsoleSink> = match &self.echo {
      Some(echo) => Arc::new(TeeConsole::new(channel, echo.clone())),
      None => Arc::new(channel),
    };
    let token = CancellationToken::new();
    let (done_tx, done_rx) = bounded(1);
    let context = WorkerContext {
      input,
      output,
      token: token.clone(),
      status: self.status.clone(),
      events: self.events_tx.clone(),
      console,
    };
    let events = self.events_tx.clone();

    let handle = thread::Builder::new()
      .name("pipeline".to_string())
      .spawn(move || {
        let result = {
          let _capture = console::capture(context.console.clone());
          job(context)
        };
        // 先通知控制器，前端收到 Finished 时即可回收线程
        let _ = done_tx.send(());
        let _ = events.send(PipelineEvent::Finished(result));
      })?;

    info!("处理线程已启动");
    self.worker = Some(Worker {
      token,
      handle,
      done: done_rx,
    });
    self.save_enabled = false;
    self.status_text = STATUS_STARTED.to_string();
    Ok(())
  }

  /// 请求停止并在 `timeout` 内等待工作线程结束
  ///
  /// 超时后工作线程被分离，在它退出前不能再次开始。
  pub fn stop(&mut self, timeout: Duration) -> Result<(), ControllerError> {
    let worker = self.worker.take().ok_or(ControllerError::NotRunning)?;
    worker.token.cancel();
    self.status_text = STATUS_PAUSED.to_string();

    match worker.done.recv_timeout(timeout) {
      Ok(()) | Err(RecvTimeoutError::Disconnected) => {
        let joined = worker.handle.join();
        self.save_enabled = self.status.save_eligible();
        joined.map_err(|_| ControllerError::WorkerPanicked)
      }
      Err(RecvTimeoutError::Timeout) => {
        warn!("工作线程在 {:?} 内未结束，放弃等待", timeout);
        self.save_enabled = false;
        self.detached = Some(worker);
        Err(ControllerError::StopTimeout(timeout))
      }
    }
  }

  /// 回收已自行结束（读完视频或出错）的工作线程，返回是否回收
  pub fn reap(&mut self) -> Result<bool, ControllerError> {
    let finished = match &self.worker {
      Some(worker) => worker.done.try_recv().is_ok() || worker.handle.is_finished(),
      None => return Ok(false),
    };
    if !finished {
      return Ok(false);
    }
    if let Some(worker) = self.worker.take() {
      worker
        .handle
        .join()
        .map_err(|_| ControllerError::WorkerPanicked)?;
    }
    self.save_enabled = self.status.save_eligible();
    self.status_text = STATUS_PAUSED.to_string();
    Ok(true)
  }
}

impl Drop for ProcessingController {
  fn drop(&mut self) {
    for worker in self.worker.iter().chain(self.detached.iter()) {
      worker.token.cancel();
    }
  }
}
