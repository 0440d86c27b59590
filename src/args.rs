// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use pitchtrack::config::DEFAULT_CONFIG_PATH;

/// Pitchtrack 球场目标跟踪
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频文件（*.mp4, *.avi）
  #[arg(long, value_name = "VIDEO")]
  pub input: PathBuf,

  /// 输出视频文件，缺少 .mp4 后缀时自动补上
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 配置文件路径（JSON，包含 model_path 与 iot_hub_key）
  #[arg(long, default_value = DEFAULT_CONFIG_PATH, value_name = "FILE")]
  pub config: PathBuf,

  /// 覆盖配置中的置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 停止时等待工作线程结束的时间（毫秒）
  #[arg(long, default_value = "5000", value_name = "MS")]
  pub stop_timeout_ms: u64,
}
