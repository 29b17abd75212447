// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

// Above this frame QP the modulated value would leave the codec's range.
const MAX_MODULATED_FRAME_QP: i32 = 100;

/// Adapts the frame QP to the spatial activity of each macroblock.
///
/// Busy blocks mask quantization noise and get a coarser QP; flat blocks get
/// a finer one. The adjustment is bounded by a factor of 2 either way around
/// the frame QP, and upward by 3/2 of it.
#[derive(Debug, Clone, Default)]
pub struct MbQpModulator {
  frame_qp: i32,
  avg_activity: i32,
}

impl MbQpModulator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }

  /// Starts a new frame coded at `qp`.
  pub fn init_frame(&mut self, qp: u8) {
    self.frame_qp = qp as i32;
  }

  /// Records the mean activity of the frame just coded; it weights the next
  ///  frame's blocks.
  pub fn update_average_activity(&mut self, avg_activity: i32) {
    self.avg_activity = avg_activity.max(0);
  }

  pub fn frame_qp(&self) -> u8 {
    self.frame_qp as u8
  }

  pub fn average_activity(&self) -> i32 {
    self.avg_activity
  }

  /// QP of a block with the given activity, as `(model_qp, encode_qp)`.
  ///
  /// The model QP feeds the rate model; the encode QP is what the block is
  /// coded with. They are equal here; the split leaves room for a codec
  /// specific mapping of the second one.
  pub fn mb_qp(&self, activity: i32) -> (u8, u8) {
    let frame_qp = self.frame_qp;
    let avg = self.avg_activity as i64;
    if avg == 0 || frame_qp >= MAX_MODULATED_FRAME_QP {
      return (frame_qp as u8, frame_qp as u8);
    }
    let a = activity.max(0) as i64;
    let num = 2 * a + avg;
    let den = a + 2 * avg;
    let qp = (num * frame_qp as i64 + den / 2) / den;
    let qp = qp.min(3 * frame_qp as i64 / 2) as u8;
    (qp, qp)
  }
}
