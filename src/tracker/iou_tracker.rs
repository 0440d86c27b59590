// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/tracker/iou_tracker.rs - IoU 关联跟踪器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 基于 IoU 贪心关联的基线跟踪器
//!
//! 不做运动预测，也不提取外观特征。轨迹连续命中 `n_init` 帧后确认，
//! 未确认轨迹一旦丢失即删除，确认轨迹连续丢失超过 `max_age` 帧后删除。

use thiserror::Error;
use tracing::debug;

use super::{Detection, Track, TrackState, Tracker};
use crate::{config::DEFAULT_MAX_AGE, frame::VideoFrame};

const DEFAULT_N_INIT: u32 = 3;
const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum TrackerError {
  #[error("第 {index} 个检测框无效: {bbox:?}")]
  InvalidDetection { index: usize, bbox: [f32; 4] },
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

pub struct IouTrackerBuilder {
  max_age: u32,
  n_init: u32,
  iou_threshold: f32,
}

impl Default for IouTrackerBuilder {
  fn default() -> Self {
    Self {
      max_age: DEFAULT_MAX_AGE,
      n_init: DEFAULT_N_INIT,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

impl IouTrackerBuilder {
  pub fn max_age(mut self, max_age: u32) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn n_init(mut self, n_init: u32) -> Self {
    self.n_init = n_init;
    self
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn build(self) -> Result<IouTracker, TrackerError> {
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(TrackerError::ValidationError(format!(
        "IoU 阈值 {} 超出有效范围 [0, 1]",
        self.iou_threshold
      )));
    }
    if self.n_init == 0 {
      return Err(TrackerError::ValidationError(
        "确认帧数必须大于 0".to_string(),
      ));
    }
    Ok(IouTracker {
      max_age: self.max_age,
      n_init: self.n_init,
      iou_threshold: self.iou_threshold,
      next_id: 1,
      tracks: Vec::new(),
    })
  }
}

pub struct IouTracker {
  max_age: u32,
  n_init: u32,
  iou_threshold: f32,
  next_id: u64,
  tracks: Vec<Track>,
}

impl IouTracker {
  pub fn builder() -> IouTrackerBuilder {
    IouTrackerBuilder::default()
  }

  pub fn with_max_age(max_age: u32) -> Self {
    Self {
      max_age,
      n_init: DEFAULT_N_INIT,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      next_id: 1,
      tracks: Vec::new(),
    }
  }

  /// 按 IoU 从大到小贪心匹配，返回 (轨迹下标, 检测下标)
  fn associate(&self, detections: &[Detection]) -> Vec<(usize, usize)> {
    let mut candidates = Vec::new();
    for (t, track) in self.tracks.iter().enumerate() {
      for (d, detection) in detections.iter().enumerate() {
        let iou = track.bbox.iou(&detection.bbox);
        if iou >= self.iou_threshold && iou > 0.0 {
          candidates.push((iou, t, d));
        }
      }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut track_used = vec![false; self.tracks.len()];
    let mut det_used = vec![false; detections.len()];
    let mut matches = Vec::new();
    for (_, t, d) in candidates {
      if track_used[t] || det_used[d] {
        continue;
      }
      track_used[t] = true;
      det_used[d] = true;
      matches.push((t, d));
    }
    matches
  }
}

impl Tracker for IouTracker {
  type Error = TrackerError;

  fn update(
    &mut self,
    detections: &[Detection],
    frame: &VideoFrame,
  ) -> Result<Vec<Track>, Self::Error> {
    if let Some((index, detection)) = detections
      .iter()
      .enumerate()
      .find(|(_, d)| !d.bbox.is_valid())
    {
      return Err(TrackerError::InvalidDetection {
        index,
        bbox: detection.bbox.to_ltrb(),
      });
    }

    let matches = self.associate(detections);
    let mut track_matched = vec![false; self.tracks.len()];
    let mut det_matched = vec![false; detections.len()];

    for &(t, d) in &matches {
      track_matched[t] = true;
      det_matched[d] = true;
      let detection = &detections[d];
      let track = &mut self.tracks[t];
      track.bbox = detection.bbox;
      track.label = detection.label;
      track.hits += 1;
      track.time_since_update = 0;
      if track.state == TrackState::Tentative && track.hits >= self.n_init {
        track.state = TrackState::Confirmed;
      }
    }

    for (track, matched) in self.tracks.iter_mut().zip(track_matched) {
      if matched {
        continue;
      }
      track.time_since_update += 1;
      if track.state == TrackState::Tentative || track.time_since_update > self.max_age {
        track.state = TrackState::Deleted;
      }
    }

    for (detection, matched) in detections.iter().zip(det_matched) {
      if matched {
        continue;
      }
      let state = if self.n_init <= 1 {
        TrackState::Confirmed
      } else {
        TrackState::Tentative
      };
      self.tracks.push(Track {
        id: self.next_id,
        bbox: detection.bbox,
        label: detection.label,
        state,
        hits: 1,
        time_since_update: 0,
      });
      self.next_id += 1;
    }

    self.tracks.retain(|t| t.state != TrackState::Deleted);
    debug!(
      "第 {} 帧: {} 个检测, {} 个匹配, {} 条存活轨迹",
      frame.index,
      detections.len(),
      matches.len(),
      self.tracks.len()
    );

    Ok(self.tracks.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{model::ClassLabel, tracker::BoundingBox};

  fn det(x: f32, y: f32, label: ClassLabel) -> Detection {
    Detection {
      bbox: BoundingBox::new(x, y, 20.0, 40.0),
      confidence: 0.9,
      label,
    }
  }

  fn frame(index: u64) -> VideoFrame {
    VideoFrame::filled(index, 8, 8, [0; 3])
  }

  #[test]
  fn track_confirms_after_n_init_hits() {
    let mut tracker = IouTracker::builder().n_init(3).build().unwrap();
    for i in 1..=2 {
      let tracks = tracker.update(&[det(10.0, 10.0, ClassLabel::Player)], &frame(i)).unwrap();
      assert_eq!(tracks.len(), 1);
      assert!(!tracks[0].is_confirmed());
    }
    let tracks = tracker.update(&[det(11.0, 10.0, ClassLabel::Player)], &frame(3)).unwrap();
    assert!(tracks[0].is_confirmed());
    assert_eq!(tracks[0].id, 1);
  }

  #[test]
  fn identities_persist_for_separate_objects() {
    let mut tracker = IouTracker::builder().n_init(1).build().unwrap();
    let first = tracker
      .update(
        &[det(0.0, 0.0, ClassLabel::Player), det(200.0, 0.0, ClassLabel::Ball)],
        &frame(1),
      )
      .unwrap();
    let second = tracker
      .update(
        &[det(202.0, 1.0, ClassLabel::Ball), det(1.0, 1.0, ClassLabel::Player)],
        &frame(2),
      )
      .unwrap();
    let id_of = |tracks: &[Track], label| tracks.iter().find(|t| t.label == label).unwrap().id;
    assert_eq!(id_of(&first, ClassLabel::Player), id_of(&second, ClassLabel::Player));
    assert_eq!(id_of(&first, ClassLabel::Ball), id_of(&second, ClassLabel::Ball));
    assert_eq!(second.len(), 2);
  }

  #[test]
  fn tentative_track_is_dropped_on_miss() {
    let mut tracker = IouTracker::builder().n_init(3).build().unwrap();
    tracker.update(&[det(10.0, 10.0, ClassLabel::Player)], &frame(1)).unwrap();
    let tracks = tracker.update(&[], &frame(2)).unwrap();
    assert!(tracks.is_empty());
  }

  #[test]
  fn confirmed_track_survives_until_max_age() {
    let mut tracker = IouTracker::builder().n_init(1).max_age(2).build().unwrap();
    tracker.update(&[det(10.0, 10.0, ClassLabel::Player)], &frame(1)).unwrap();
    assert_eq!(tracker.update(&[], &frame(2)).unwrap().len(), 1);
    assert_eq!(tracker.update(&[], &frame(3)).unwrap().len(), 1);
    assert!(tracker.update(&[], &frame(4)).unwrap().is_empty());
  }

  #[test]
  fn default_max_age_comes_from_config() {
    let mut tracker = IouTracker::builder().n_init(1).build().unwrap();
    tracker.update(&[det(10.0, 10.0, ClassLabel::Player)], &frame(1)).unwrap();
    for i in 0..DEFAULT_MAX_AGE as u64 {
      assert_eq!(tracker.update(&[], &frame(i + 2)).unwrap().len(), 1);
    }
    let next = DEFAULT_MAX_AGE as u64 + 2;
    assert!(tracker.update(&[], &frame(next)).unwrap().is_empty());
  }

  #[test]
  fn label_follows_latest_detection() {
    let mut tracker = IouTracker::builder().n_init(1).build().unwrap();
    tracker.update(&[det(10.0, 10.0, ClassLabel::Player)], &frame(1)).unwrap();
    let tracks = tracker.update(&[det(10.0, 10.0, ClassLabel::Other(4))], &frame(2)).unwrap();
    assert_eq!(tracks[0].label, ClassLabel::Other(4));
  }

  #[test]
  fn non_finite_detection_is_rejected() {
    let mut tracker = IouTracker::with_max_age(50);
    let bad = Detection {
      bbox: BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0),
      confidence: 0.9,
      label: ClassLabel::Ball,
    };
    assert!(matches!(
      tracker.update(&[bad], &frame(1)),
      Err(TrackerError::InvalidDetection { index: 0, .. })
    ));
  }

  #[test]
  fn builder_validates_threshold() {
    assert!(IouTracker::builder().iou_threshold(1.5).build().is_err());
    assert!(IouTracker::builder().n_init(0).build().is_err());
  }
}
