// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/config.rs - 配置文件
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MAX_AGE: u32 = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件解析失败: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

/// `data/config.json`
///
/// ```json
/// { "model_path": "data/detections.jsonl", "iot_hub_key": "" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
  pub model_path: PathBuf,
  /// IoT Hub 设备连接字符串，空字符串表示不上报
  #[serde(default)]
  pub iot_hub_key: String,
  #[serde(default = "default_confidence_threshold")]
  pub confidence_threshold: f32,
  #[serde(default = "default_max_age")]
  pub max_age: u32,
}

fn default_confidence_threshold() -> f32 {
  DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_max_age() -> u32 {
  DEFAULT_MAX_AGE
}

impl AppConfig {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::from_json(&text)?;
    info!("配置已加载: {}", path.display());
    Ok(config)
  }

  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    let config: AppConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::ValidationError(format!(
        "置信度阈值 {} 超出有效范围 [0, 1]",
        self.confidence_threshold
      )));
    }
    Ok(())
  }

  pub fn telemetry_enabled(&self) -> bool {
    !self.iot_hub_key.trim().is_empty()
  }
}
