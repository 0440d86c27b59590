// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/output/draw.rs - 跟踪结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::tracker::Track;

// 输出视频中的框线像素为 RGB(166, 45, 27)
const TRACK_COLOR: [u8; 3] = [166, 45, 27];
const LINE_THICKNESS: i32 = 2;

pub struct Draw {
  color: [u8; 3],
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: TRACK_COLOR,
      thickness: LINE_THICKNESS,
    }
  }
}

impl Draw {
  // 在图像上绘制矩形边框，ltrb 为像素坐标 [x1, y1, x2, y2]
  pub fn draw_box(&self, image: &mut RgbImage, ltrb: [i32; 4]) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let (w, h) = (image.width() as i32, image.height() as i32);

    // Clamp to image bounds
    let x_min = ltrb[0].clamp(0, w - 1);
    let y_min = ltrb[1].clamp(0, h - 1);
    let x_max = ltrb[2].clamp(0, w - 1);
    let y_max = ltrb[3].clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 由外向内逐圈加粗
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
  }
}

pub trait DrawTracksOnImage {
  fn draw_tracks_on_image(&self, image: &mut RgbImage, tracks: &[Track]);
}

impl DrawTracksOnImage for Draw {
  fn draw_tracks_on_image(&self, image: &mut RgbImage, tracks: &[Track]) {
    for track in tracks {
      self.draw_box(image, track.ltrb_px());
    }
  }
}
