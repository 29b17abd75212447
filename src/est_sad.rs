// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::picture::{PerType, PictureType};
use crate::util::mul_div;

/// Predicts the SAD of the next frame of each type before it is coded.
#[derive(Debug, Clone)]
pub struct SadEstimator {
  use_est_intra_sad: bool,
  prev_frame_sad: PerType<u32>,
  // Sum of P-frame SADs in the intra interval being coded.
  cur_ifi_p_sad: u64,
  num_p_in_cur_ifi: u32,
  // Average P-frame SAD of the last two completed intra intervals.
  n1_ifi_avg_sad: u32,
  n2_ifi_avg_sad: u32,
  num_ifi_encoded: u32,
}

impl SadEstimator {
  /// When `use_est_intra_sad` is set, the I-frame SAD is extrapolated from
  ///  the P-frame trend across intra intervals. Otherwise the intra cost
  ///  measured on every frame stands in for it.
  pub fn new(use_est_intra_sad: bool) -> Self {
    SadEstimator {
      use_est_intra_sad,
      prev_frame_sad: PerType::splat(0),
      cur_ifi_p_sad: 0,
      num_p_in_cur_ifi: 0,
      n1_ifi_avg_sad: 0,
      n2_ifi_avg_sad: 0,
      num_ifi_encoded: 0,
    }
  }

  pub fn reset(&mut self) {
    *self = SadEstimator::new(self.use_est_intra_sad);
  }

  pub fn estimate(&self, pic_type: PictureType) -> u32 {
    if !self.use_est_intra_sad || pic_type != PictureType::I {
      return self.prev_frame_sad[pic_type];
    }
    let prev_i = self.prev_frame_sad[PictureType::I];
    // The (n-1)th interval is the last complete one; scale the previous
    //  I SAD by how much the P SAD moved between it and the (n-2)th.
    if self.num_ifi_encoded < 2 || self.n2_ifi_avg_sad == 0 {
      return prev_i;
    }
    mul_div(
      prev_i as i64,
      self.n1_ifi_avg_sad as i64,
      self.n2_ifi_avg_sad as i64,
    )
    .clamp(0, u32::MAX as i64) as u32
  }

  pub fn update_actual(&mut self, sad: u32, pic_type: PictureType) {
    self.prev_frame_sad[pic_type] = sad;
    if !self.use_est_intra_sad {
      return;
    }
    match pic_type {
      PictureType::I => {
        self.num_ifi_encoded += 1;
        if self.num_ifi_encoded >= 2 && self.num_p_in_cur_ifi > 0 {
          let avg = (self.cur_ifi_p_sad / self.num_p_in_cur_ifi as u64)
            .min(u32::MAX as u64) as u32;
          self.n2_ifi_avg_sad = self.n1_ifi_avg_sad;
          self.n1_ifi_avg_sad = avg;
        }
        self.cur_ifi_p_sad = 0;
        self.num_p_in_cur_ifi = 0;
      }
      PictureType::P => {
        self.cur_ifi_p_sad += sad as u64;
        self.num_p_in_cur_ifi += 1;
      }
      PictureType::B => {}
    }
  }

  /// Feeds the per-frame intra cost as the I estimate.
  ///
  /// Has no effect when intra SAD estimation is enabled.
  pub fn update_actual_for_intra(&mut self, intra_cost: u32) {
    if !self.use_est_intra_sad {
      self.prev_frame_sad[PictureType::I] = intra_cost;
    }
  }

  /// Average P SAD of the two most recent complete intra intervals.
  pub fn interval_history(&self) -> (u32, u32) {
    (self.n1_ifi_avg_sad, self.n2_ifi_avg_sad)
  }
}
