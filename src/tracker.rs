// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/tracker.rs - 多目标跟踪
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

use crate::{frame::VideoFrame, model::ClassLabel};

/// 像素坐标下的边界框，左上角 + 宽高
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn from_ltrb(ltrb: [f32; 4]) -> Self {
    let [left, top, right, bottom] = ltrb;
    Self::new(left, top, right - left, bottom - top)
  }

  pub fn to_ltrb(&self) -> [f32; 4] {
    [self.x, self.y, self.x + self.width, self.y + self.height]
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn is_valid(&self) -> bool {
    [self.x, self.y, self.width, self.height]
      .iter()
      .all(|v| v.is_finite())
      && self.width >= 0.0
      && self.height >= 0.0
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let [l1, t1, r1, b1] = self.to_ltrb();
    let [l2, t2, r2, b2] = other.to_ltrb();
    let inter_w = (r1.min(r2) - l1.max(l2)).max(0.0);
    let inter_h = (b1.min(b2) - t1.max(t2)).max(0.0);
    let intersection = inter_w * inter_h;
    let union = self.area() + other.area() - intersection;
    if union <= 0.0 {
      0.0
    } else {
      intersection / union
    }
  }
}

/// 经过置信度过滤后送入跟踪器的检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub confidence: f32,
  pub label: ClassLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
  /// 新建轨迹，尚未达到确认条件
  #[default]
  Tentative,
  Confirmed,
  Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
  pub id: u64,
  pub bbox: BoundingBox,
  pub label: ClassLabel,
  pub state: TrackState,
  pub hits: u32,
  pub time_since_update: u32,
}

impl Track {
  pub fn is_confirmed(&self) -> bool {
    self.state == TrackState::Confirmed
  }

  /// 取整后的 [x1, y1, x2, y2]
  pub fn ltrb_px(&self) -> [i32; 4] {
    self.bbox.to_ltrb().map(|v| v as i32)
  }
}

pub trait Tracker {
  type Error;

  fn update(&mut self, detections: &[Detection], frame: &VideoFrame)
  -> Result<Vec<Track>, Self::Error>;
}

mod iou_tracker;
pub use self::iou_tracker::{IouTracker, IouTrackerBuilder, TrackerError};
