// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/model.rs - 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }
}

pub trait WithLabel: Sized + fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 球场目标类别
///
/// 模型类别 1 为球员，0 为足球，其余类别按编号原样输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassLabel {
  Ball,
  Player,
  Other(u32),
}

impl WithLabel for ClassLabel {
  fn to_label_str(&self) -> String {
    self.to_string()
  }

  fn to_label_id(&self) -> u32 {
    match self {
      ClassLabel::Ball => 0,
      ClassLabel::Player => 1,
      ClassLabel::Other(id) => *id,
    }
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => ClassLabel::Ball,
      1 => ClassLabel::Player,
      other => ClassLabel::Other(other),
    }
  }
}

impl fmt::Display for ClassLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ClassLabel::Ball => f.write_str("Ball"),
      ClassLabel::Player => f.write_str("Player"),
      ClassLabel::Other(id) => write!(f, "{}", id),
    }
  }
}

mod detection_log;
pub use self::detection_log::{DetectionLog, ModelError};
