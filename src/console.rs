// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/console.rs - 控制台镜像输出
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

//! 控制台镜像
//!
//! 处理流水线不直接写标准输出，而是写入注入的 [`ConsoleSink`]。
//! 工作线程中的 `tracing` 日志通过 [`capture`] 在作用域内转发到同一个输出，
//! 守卫销毁后恢复原来的订阅者。

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::task::PipelineEvent;

pub trait ConsoleSink: Send + Sync {
  fn write(&self, text: &str);

  fn write_line(&self, line: &str) {
    self.write(&format!("{}\n", line));
  }
}

impl<T: ConsoleSink + ?Sized> ConsoleSink for Arc<T> {
  fn write(&self, text: &str) {
    (**self).write(text)
  }
}

/// 直接写进程标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
  fn write(&self, text: &str) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
  }
}

/// 把文本作为 [`PipelineEvent::Console`] 排队发给前端
#[derive(Debug, Clone)]
pub struct ChannelConsole {
  tx: Sender<PipelineEvent>,
}

impl ChannelConsole {
  pub fn new(tx: Sender<PipelineEvent>) -> Self {
    Self { tx }
  }
}

impl ConsoleSink for ChannelConsole {
  fn write(&self, text: &str) {
    // 前端已退出时丢弃
    let _ = self.tx.send(PipelineEvent::Console(text.to_string()));
  }
}

/// 同时写两个输出
#[derive(Debug, Clone)]
pub struct TeeConsole<A, B> {
  first: A,
  second: B,
}

impl<A, B> TeeConsole<A, B> {
  pub fn new(first: A, second: B) -> Self {
    Self { first, second }
  }
}

impl<A: ConsoleSink, B: ConsoleSink> ConsoleSink for TeeConsole<A, B> {
  fn write(&self, text: &str) {
    self.first.write(text);
    self.second.write(text);
  }
}

/// 内存缓冲输出
#[derive(Debug, Default)]
pub struct MemoryConsole {
  buffer: Mutex<String>,
}

impl MemoryConsole {
  pub fn contents(&self) -> String {
    self
      .buffer
      .lock()
      .map(|buffer| buffer.clone())
      .unwrap_or_default()
  }
}

impl ConsoleSink for MemoryConsole {
  fn write(&self, text: &str) {
    if let Ok(mut buffer) = self.buffer.lock() {
      buffer.push_str(text);
    }
  }
}

#[derive(Clone)]
pub struct ConsoleMakeWriter {
  sink: Arc<dyn ConsoleSink>,
}

impl ConsoleMakeWriter {
  pub fn new(sink: Arc<dyn ConsoleSink>) -> Self {
    Self { sink }
  }
}

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
  type Writer = ConsoleWriter;

  fn make_writer(&'a self) -> Self::Writer {
    ConsoleWriter {
      sink: self.sink.clone(),
      buffer: Vec::new(),
    }
  }
}

/// 缓冲一条日志，flush 或销毁时整体写入
pub struct ConsoleWriter {
  sink: Arc<dyn ConsoleSink>,
  buffer: Vec<u8>,
}

impl Write for ConsoleWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    if !self.buffer.is_empty() {
      self.sink.write(&String::from_utf8_lossy(&self.buffer));
      self.buffer.clear();
    }
    Ok(())
  }
}

impl Drop for ConsoleWriter {
  fn drop(&mut self) {
    let _ = self.flush();
  }
}

/// 当前线程的日志捕获守卫
pub struct ConsoleCapture {
  _guard: DefaultGuard,
}

/// 在当前线程内把 `tracing` 日志转发到 `sink`，返回的守卫销毁时恢复
pub fn capture(sink: Arc<dyn ConsoleSink>) -> ConsoleCapture {
  let subscriber = tracing_subscriber::fmt()
    .with_writer(ConsoleMakeWriter::new(sink))
    .with_ansi(false)
    .with_target(false)
    .without_time()
    .finish();
  ConsoleCapture {
    _guard: tracing::subscriber::set_default(subscriber),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn write_line_appends_newline() {
    let console = MemoryConsole::default();
    console.write_line("FPS: 0, Frame: 1/10");
    console.write("[]");
    assert_eq!(console.contents(), "FPS: 0, Frame: 1/10\n[]");
  }

  #[test]
  fn tee_writes_to_both() {
    let a = Arc::new(MemoryConsole::default());
    let b = Arc::new(MemoryConsole::default());
    let tee = TeeConsole::new(a.clone(), b.clone());
    tee.write_line("hello");
    assert_eq!(a.contents(), "hello\n");
    assert_eq!(b.contents(), "hello\n");
  }

  #[test]
  fn channel_console_queues_events() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let console = ChannelConsole::new(tx);
    console.write_line("abc");
    let Ok(PipelineEvent::Console(text)) = rx.try_recv() else {
      panic!("expected console event");
    };
    assert_eq!(text, "abc\n");
  }

  #[test]
  fn channel_console_ignores_closed_receiver() {
    let (tx, rx) = crossbeam_channel::unbounded();
    drop(rx);
    ChannelConsole::new(tx).write_line("dropped");
  }

  #[test]
  fn capture_is_scoped_to_guard() {
    let sink = Arc::new(MemoryConsole::default());
    {
      let _capture = capture(sink.clone());
      tracing::info!("captured line");
    }
    tracing::info!("after release");
    let contents = sink.contents();
    assert!(contents.contains("captured line"));
    assert!(!contents.contains("after release"));
  }
}
