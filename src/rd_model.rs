// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use arrayvec::ArrayVec;
use itertools::{Itertools, MinMaxResult};

/// Number of coded frames retained per picture type.
pub const MAX_FRAMES_MODELLED: usize = 20;

// At most this many of the newest frames take part in the window fit.
const MAX_ACTIVE_FRAMES: usize = 16;

// Frames sharing a QP beyond this count are dropped from the window so one
//  static stretch of video does not dominate the fit.
const MAX_FRAMES_PER_QP: u8 = 3;

const MIN_FRAMES_FOR_WINDOW_FIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation {
  bits: u32,
  sad: u32,
  qp: u8,
  skips: u32,
}

/// Rate model of one picture type: `bits = coeff * sad / qp`.
///
/// The active coefficient always comes from the newest frame with a non-zero
/// SAD. A least-squares fit over a filtered window of older frames is kept
/// alongside it for inspection, but never drives the quantizer choice.
#[derive(Debug, Clone)]
pub struct RdModel {
  frames: ArrayVec<Observation, MAX_FRAMES_MODELLED>,
  // Slot the next observation is written to once the ring is full.
  next: usize,
  coeff: f64,
  windowed: Option<f64>,
}

impl Default for RdModel {
  fn default() -> Self {
    RdModel::new()
  }
}

impl RdModel {
  pub fn new() -> Self {
    RdModel { frames: ArrayVec::new(), next: 0, coeff: 0.0, windowed: None }
  }

  pub fn reset(&mut self) {
    *self = RdModel::new();
  }

  /// Number of frames currently held.
  pub fn num_frames(&self) -> usize {
    self.frames.len()
  }

  /// The coefficient used by [`RdModel::estimate_qp`].
  pub fn coefficient(&self) -> f64 {
    self.coeff
  }

  /// The coefficient of the filtered window fit, once enough frames are held.
  pub fn windowed_coefficient(&self) -> Option<f64> {
    self.windowed
  }

  pub fn add_observation(&mut self, bits: u32, qp: u8, sad: u32, skips: u32) {
    let obs = Observation { bits, sad, qp, skips };
    if self.frames.is_full() {
      self.frames[self.next] = obs;
    } else {
      self.frames.push(obs);
    }
    self.next = (self.next + 1) % MAX_FRAMES_MODELLED;

    if sad != 0 && qp != 0 {
      self.coeff = bits as f64 * qp as f64 / sad as f64;
    }
    self.windowed = self.fit_window();
  }

  /// Quantizer expected to spend `target_bits` on a frame of SAD `est_sad`.
  ///
  /// The result is always within `[min_qp, max_qp]`. A non-positive target or
  /// a degenerate model yields `max_qp`.
  pub fn estimate_qp(
    &self, target_bits: i32, est_sad: u32, min_qp: u8, max_qp: u8,
  ) -> u8 {
    if target_bits <= 0 {
      return max_qp;
    }
    let qp = self.coeff * est_sad as f64 / target_bits as f64;
    if qp.is_nan() || qp <= 0.0 {
      return max_qp;
    }
    let qp = qp.round();
    if qp >= max_qp as f64 {
      max_qp
    } else {
      (qp as u8).max(min_qp).min(max_qp)
    }
  }

  // Indices of held frames, newest first.
  fn newest_first(&self) -> impl Iterator<Item = usize> + '_ {
    let len = self.frames.len();
    let newest = (self.next + MAX_FRAMES_MODELLED - 1) % MAX_FRAMES_MODELLED;
    (0..len.min(MAX_ACTIVE_FRAMES)).map(move |i| (newest + len - i) % len)
  }

  fn fit_window(&self) -> Option<f64> {
    let active: ArrayVec<usize, MAX_ACTIVE_FRAMES> =
      self.newest_first().collect();

    let (min_pos, max_pos) =
      match active.iter().position_minmax_by_key(|&&i| self.frames[i].qp) {
        MinMaxResult::NoElements => return None,
        MinMaxResult::OneElement(p) => (p, p),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
      };

    let mut per_qp = [0u8; 256];
    let mut num = 0.0;
    let mut den = 0.0;
    let mut kept = 0;
    for (pos, &i) in active.iter().enumerate() {
      let f = &self.frames[i];
      let always = pos == 0 || pos == min_pos || pos == max_pos;
      if !always && per_qp[f.qp as usize] >= MAX_FRAMES_PER_QP {
        continue;
      }
      per_qp[f.qp as usize] += 1;
      if f.sad == 0 || f.qp == 0 {
        continue;
      }
      let x = f.sad as f64 / f.qp as f64;
      num += f.bits as f64 * x;
      den += x * x;
      kept += 1;
    }

    trace!(
      "rd window: {} of {} frames kept, {} skips in newest",
      kept,
      active.len(),
      self.frames[active[0]].skips
    );

    if kept < MIN_FRAMES_FOR_WINDOW_FIT || den <= 0.0 {
      None
    } else {
      Some(num / den)
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use quickcheck::quickcheck;

  #[test]
  fn empty_model_returns_max_qp() {
    let m = RdModel::new();
    assert_eq!(m.estimate_qp(10_000, 5000, 10, 40), 40);
  }

  #[test]
  fn single_point_inverts() {
    let mut m = RdModel::new();
    // bits = c * sad / qp => c = 20000 * 30 / 6000 = 100
    m.add_observation(20_000, 30, 6000, 0);
    assert_eq!(m.coefficient(), 100.0);
    assert_eq!(m.estimate_qp(20_000, 6000, 1, 51), 30);
    assert_eq!(m.estimate_qp(40_000, 6000, 1, 51), 15);
    assert_eq!(m.estimate_qp(40_000, 6000, 20, 51), 20);
    assert_eq!(m.estimate_qp(0, 6000, 20, 51), 51);
    assert_eq!(m.estimate_qp(-5, 6000, 20, 51), 51);
    assert_eq!(m.estimate_qp(5000, 0, 20, 51), 51);
  }

  #[test]
  fn newest_frame_drives_coefficient() {
    let mut m = RdModel::new();
    m.add_observation(20_000, 30, 6000, 0);
    m.add_observation(10_000, 30, 6000, 0);
    assert_eq!(m.coefficient(), 50.0);
    // Zero SAD frames keep the previous coefficient.
    m.add_observation(10_000, 30, 0, 0);
    assert_eq!(m.coefficient(), 50.0);
  }

  #[test]
  fn ring_keeps_capacity() {
    let mut m = RdModel::new();
    for i in 0..(MAX_FRAMES_MODELLED * 2) {
      m.add_observation(1000 + i as u32, 20 + (i % 5) as u8, 500, 0);
    }
    assert_eq!(m.num_frames(), MAX_FRAMES_MODELLED);
    let last = (MAX_FRAMES_MODELLED * 2 - 1) as f64;
    let last_qp = (20 + (MAX_FRAMES_MODELLED * 2 - 1) % 5) as f64;
    assert_eq!(m.coefficient(), (1000.0 + last) * last_qp / 500.0);
  }

  #[test]
  fn window_fit_needs_enough_frames() {
    let mut m = RdModel::new();
    m.add_observation(10_000, 20, 2000, 0);
    m.add_observation(10_000, 20, 2000, 0);
    assert_eq!(m.windowed_coefficient(), None);
    m.add_observation(10_000, 20, 2000, 0);
    // All three frames sit on the model exactly.
    let w = m.windowed_coefficient().unwrap();
    assert!((w - 100.0).abs() < 1e-9);
    // The window is diagnostic only.
    m.add_observation(5_000, 20, 2000, 0);
    assert_eq!(m.coefficient(), 50.0);
  }

  #[test]
  fn window_caps_frames_per_qp() {
    let mut m = RdModel::new();
    for _ in 0..10 {
      m.add_observation(10_000, 20, 2000, 0);
    }
    m.add_observation(40_000, 10, 2000, 0);
    // Newest (qp 10, c = 200) plus at most three qp 20 frames (c = 100),
    //  one of which is kept as the max-QP frame.
    let w = m.windowed_coefficient().unwrap();
    assert!(w > 100.0 && w < 200.0);
  }

  quickcheck! {
    fn qp_always_in_bounds(
      obs: Vec<(u32, u8, u32)>, target: i32, sad: u32, a: u8, b: u8
    ) -> bool {
      let (min_qp, max_qp) = if a <= b { (a, b) } else { (b, a) };
      let mut m = RdModel::new();
      for (bits, qp, s) in obs {
        m.add_observation(bits, qp, s, 0);
      }
      let qp = m.estimate_qp(target, sad, min_qp, max_qp);
      min_qp <= qp && qp <= max_qp
    }

    fn qp_monotonic_in_target(
      bits: u32, qp: u8, sad: u32, est_sad: u32, t1: i32, t2: i32
    ) -> bool {
      let mut m = RdModel::new();
      m.add_observation(bits, qp, sad, 0);
      let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
      m.estimate_qp(hi, est_sad, 1, 51) <= m.estimate_qp(lo, est_sad, 1, 51)
    }
  }
}
