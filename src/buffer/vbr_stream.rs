// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::picture::{PerType, PictureType};

/// Counts how many pictures of each type fall inside one buffer delay window
/// of a VBR streaming buffer.
///
/// Time is measured in ticks. Every source frame lasts `src_ticks` and every
/// coded frame `tgt_ticks`, so the counts stay exact when the coded frame rate
/// drops below the source rate.
#[derive(Debug, Clone)]
pub struct StreamParams {
  intra_frame_interval: u32,
  src_ticks: u32,
  tgt_ticks: u32,
  frames_in_delay_prd: u32,
  // Ticks elapsed since the last intra picture.
  offset: u64,
}

impl StreamParams {
  pub fn new(
    intra_frame_interval: u32, src_ticks: u32, tgt_ticks: u32,
    frames_in_delay_prd: u32,
  ) -> Self {
    StreamParams {
      intra_frame_interval,
      src_ticks,
      tgt_ticks,
      frames_in_delay_prd,
      offset: 0,
    }
  }

  fn ticks_per_intra(&self) -> u64 {
    self.intra_frame_interval as u64 * self.tgt_ticks as u64
  }

  /// Advances the window by one coded picture.
  pub fn update(&mut self, pic_type: PictureType) {
    let per_intra = self.ticks_per_intra();
    if per_intra == 0 {
      return;
    }
    self.offset = if pic_type == PictureType::I {
      self.tgt_ticks as u64 % per_intra
    } else {
      (self.offset + self.tgt_ticks as u64) % per_intra
    };
  }

  /// Pictures of each type in the next delay window, and the window length
  /// in frames.
  pub fn pics_in_delay(&self) -> (PerType<u32>, u32) {
    let per_intra = self.ticks_per_intra();
    let fidp = self.frames_in_delay_prd;
    if per_intra == 0 {
      return (PerType::new(0, fidp, 0), fidp);
    }
    let window = fidp as u64 * self.src_ticks as u64;
    let mut num_i = (window + self.offset + per_intra - 1) / per_intra;
    if self.offset > 0 {
      num_i = num_i.saturating_sub(1);
    }
    let num_i = num_i.min(fidp as u64) as u32;
    (PerType::new(num_i, fidp - num_i, 0), fidp)
  }

  pub fn frames_in_delay_prd(&self) -> u32 {
    self.frames_in_delay_prd
  }

  pub fn change_intra_interval(&mut self, intra_frame_interval: u32) {
    self.intra_frame_interval = intra_frame_interval;
    let per_intra = self.ticks_per_intra();
    if per_intra != 0 {
      self.offset %= per_intra;
    }
  }

  pub fn change_src_ticks(&mut self, src_ticks: u32) {
    self.src_ticks = src_ticks;
  }

  pub fn change_tgt_ticks(&mut self, tgt_ticks: u32) {
    self.tgt_ticks = tgt_ticks;
    let per_intra = self.ticks_per_intra();
    if per_intra != 0 {
      self.offset %= per_intra;
    }
  }

  pub fn change_frames_in_delay(&mut self, frames_in_delay_prd: u32) {
    self.frames_in_delay_prd = frames_in_delay_prd;
  }
}
