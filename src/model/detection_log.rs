// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/model/detection_log.rs - 检测记录回放模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 检测记录回放
//!
//! 预训练检测器离线运行后，把每帧的检测框写成 JSON Lines，每行一个对象：
//!
//! ```text
//! {"frame": 1, "boxes": [[x_min, y_min, x_max, y_max, confidence, class_id], ...]}
//! ```
//!
//! 行格式与检测器原生的 `boxes.data` 行一致。没有记录的帧视为无检测。

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{DetectItem, DetectResult, Model};
use crate::frame::VideoFrame;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行 JSON 解析失败: {source}")]
  JsonError {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
  #[error("第 {line} 行检测框无效: {reason}")]
  InvalidRow { line: usize, reason: String },
}

#[derive(Deserialize)]
struct DetectionLogLine {
  frame: u64,
  #[serde(default)]
  boxes: Vec<[f32; 6]>,
}

pub struct DetectionLog {
  frames: HashMap<u64, DetectResult>,
}

impl DetectionLog {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let log = Self::from_reader(BufReader::new(file))?;
    info!("检测记录已加载: {} ({} 帧)", path.display(), log.frames.len());
    Ok(log)
  }

  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ModelError> {
    let mut frames = HashMap::new();
    for (number, line) in reader.lines().enumerate() {
      let line_no = number + 1;
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let record: DetectionLogLine =
        serde_json::from_str(&line).map_err(|source| ModelError::JsonError {
          line: line_no,
          source,
        })?;
      let items = record
        .boxes
        .iter()
        .map(|row| parse_row(line_no, row))
        .collect::<Result<Vec<_>, _>>()?;
      frames.insert(record.frame, DetectResult::new(items));
    }
    Ok(Self { frames })
  }

  pub fn frame_count(&self) -> usize {
    self.frames.len()
  }
}

fn parse_row(line: usize, row: &[f32; 6]) -> Result<DetectItem, ModelError> {
  let [x_min, y_min, x_max, y_max, score, class_id] = *row;
  if row.iter().any(|v| !v.is_finite()) {
    return Err(ModelError::InvalidRow {
      line,
      reason: "包含非有限数值".to_string(),
    });
  }
  if class_id < 0.0 {
    return Err(ModelError::InvalidRow {
      line,
      reason: format!("类别编号为负数: {}", class_id),
    });
  }
  Ok(DetectItem {
    class_id: class_id as u32,
    score,
    bbox: [x_min, y_min, x_max, y_max],
  })
}

impl Model for DetectionLog {
  type Input = VideoFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let result = self.frames.get(&input.index).cloned().unwrap_or_default();
    debug!("第 {} 帧回放 {} 个检测框", input.index, result.len());
    Ok(result)
  }
}
