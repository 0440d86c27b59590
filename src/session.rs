// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/session.rs - 处理会话状态
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// 处理进度达到该比例后允许保存输出
pub const SAVE_FRACTION: f64 = 0.25;

/// 保存资格：处理已停止且进度不低于 [`SAVE_FRACTION`]
pub fn save_eligible(current: u64, total: u64, running: bool) -> bool {
  if running || total == 0 {
    return false;
  }
  current as f64 / total as f64 >= SAVE_FRACTION
}

/// 工作线程写、前端读的会话标量状态
///
/// 前端只用它决定按钮可用性，读到的值允许滞后一帧。
#[derive(Debug, Default)]
pub struct SessionStatus {
  running: AtomicBool,
  current_frame: AtomicU64,
  total_frames: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
  pub running: bool,
  pub current_frame: u64,
  pub total_frames: u64,
}

impl SessionSnapshot {
  pub fn save_eligible(&self) -> bool {
    save_eligible(self.current_frame, self.total_frames, self.running)
  }
}

impl SessionStatus {
  pub fn new() -> Self {
    Self::default()
  }

  /// 开始新一轮处理，帧计数清零
  pub fn begin(&self, total_frames: u64) {
    self.current_frame.store(0, Ordering::Release);
    self.total_frames.store(total_frames, Ordering::Release);
    self.running.store(true, Ordering::Release);
  }

  /// 记录读到一帧，返回当前帧序号
  ///
  /// 容器报告的总帧数偏小时，把总数抬到当前序号，保证 `current <= total`。
  pub fn advance(&self) -> u64 {
    let current = self.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
    self.total_frames.fetch_max(current, Ordering::AcqRel);
    current
  }

  pub fn finish(&self) {
    self.running.store(false, Ordering::Release);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    SessionSnapshot {
      running: self.running.load(Ordering::Acquire),
      current_frame: self.current_frame.load(Ordering::Acquire),
      total_frames: self.total_frames.load(Ordering::Acquire),
    }
  }

  pub fn save_eligible(&self) -> bool {
    self.snapshot().save_eligible()
  }
}

/// 停止请求
///
/// 克隆共享同一个标志，流水线在每帧开始前检查一次。
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

/// 瞬时帧率计算
#[derive(Debug, Default, Clone, Copy)]
pub struct FpsMeter {
  last_frame_time: Option<Instant>,
}

impl FpsMeter {
  pub fn new() -> Self {
    Self::default()
  }

  /// `1 / (now - last)`；没有上一帧时间或间隔不为正时返回 0.0
  pub fn calculate_fps(&self, now: Instant) -> f64 {
    let Some(last) = self.last_frame_time else {
      return 0.0;
    };
    match now.checked_duration_since(last) {
      Some(elapsed) if !elapsed.is_zero() => 1.0 / elapsed.as_secs_f64(),
      _ => 0.0,
    }
  }

  /// 计算帧率并把 `now` 记为上一帧时间
  pub fn tick(&mut self, now: Instant) -> f64 {
    let fps = self.calculate_fps(now);
    self.last_frame_time = Some(now);
    fps
  }
}

/// 保留两位小数
pub fn round_fps(fps: f64) -> f64 {
  (fps * 100.0).round() / 100.0
}
