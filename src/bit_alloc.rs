// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::buffer::MAX_NUM_DRAIN_RATES;
use crate::error_bits::ErrorBits;
use crate::gop::PictureScheduler;
use crate::picture::{PerType, PictureType};
use crate::util::{mul_div_i32, SaturatingAccumulate};

/// GOPs per allocation period in the storage modes.
pub const ALLOC_PERIOD_VBR: i32 = 1;
/// GOPs per allocation period in the streaming and constant bitrate modes.
pub const ALLOC_PERIOD_CBR: i32 = 1;

// A scene change widens the period to at most this many GOPs.
const MAX_NUM_GOPS_IN_PERIOD: i32 = 3;

// Relative cost of the picture types, Q4.
pub(crate) const K_Q: u32 = 4;
pub(crate) const I_TO_P_RATIO: i32 = 19;
pub(crate) const P_TO_B_RATIO: i32 = 32;
// Bit ratio between I and P pictures when no model is available yet.
const I_TO_P_BIT_RATIO: i64 = 5;

/// Remaining bits in the allocation period.
#[derive(Debug, Clone)]
struct RemainingBits {
  bits: i64,
  tot_frames_in_gop: i32,
  num_gops: i32,
  bits_per_frame: i32,
}

impl RemainingBits {
  fn new(sched: &PictureScheduler, bits_per_frame: i32, num_gops: i32) -> Self {
    let tot_frames_in_gop = sched.frames_in_gop().total();
    RemainingBits {
      bits: bits_per_frame as i64 * tot_frames_in_gop as i64 * num_gops as i64,
      tot_frames_in_gop,
      num_gops,
      bits_per_frame,
    }
  }

  // The GOP size changes after the first picture of a GOP with a new intra
  //  interval; every GOP of the period grows or shrinks by the same amount.
  fn check_gop_size(&mut self, sched: &PictureScheduler) {
    let tot = sched.frames_in_gop().total();
    if tot != self.tot_frames_in_gop {
      let delta_frames = self.num_gops as i64 * (tot - self.tot_frames_in_gop) as i64;
      self.bits.accumulate(delta_frames * self.bits_per_frame as i64);
      self.tot_frames_in_gop = tot;
    }
  }

  fn update(&mut self, sched: &PictureScheduler, bits: i64) {
    self.check_gop_size(sched);
    self.bits.accumulate(bits);
  }

  fn change(
    &mut self, sched: &PictureScheduler, bits_per_frame: i32, num_gops: i32,
  ) {
    if bits_per_frame != self.bits_per_frame {
      let rem_frames = (self.num_gops - 1) as i64 * self.tot_frames_in_gop as i64
        + sched.remaining_frames_in_gop().total() as i64;
      self
        .bits
        .accumulate((bits_per_frame - self.bits_per_frame) as i64 * rem_frames);
    }
    if num_gops != self.num_gops {
      let delta_frames =
        self.tot_frames_in_gop as i64 * (num_gops - self.num_gops) as i64;
      self.bits.accumulate(bits_per_frame as i64 * delta_frames);
    }
    self.num_gops = num_gops;
    self.bits_per_frame = bits_per_frame;
  }
}

/// Splits the bits of the allocation period among its pictures.
#[derive(Debug, Clone)]
pub struct BitAllocator {
  rbip: RemainingBits,
  k: PerType<i32>,
  prev_header_bits: PerType<i32>,
  bits_per_frame: i32,
  num_gops_in_period: i32,
  actual_num_gops_in_period: i32,
  saved_bits: i64,
  max_bits_per_frame: [i32; MAX_NUM_DRAIN_RATES],
  min_bits_per_frame: i32,
  error_bits: ErrorBits,
  frame_rate: u32,
  bitrate: u32,
  peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
}

impl BitAllocator {
  pub fn new(
    sched: &PictureScheduler, num_gops_in_period: i32, bitrate: u32,
    frame_rate: u32, peak_bitrate: [u32; MAX_NUM_DRAIN_RATES], min_bitrate: u32,
  ) -> Self {
    let bits_per_frame = mul_div_i32(bitrate as i64, 1000, frame_rate as i64);
    let max_bits_per_frame = peak_bitrate
      .map(|peak| mul_div_i32(peak as i64, 1000, frame_rate as i64));
    BitAllocator {
      rbip: RemainingBits::new(sched, bits_per_frame, num_gops_in_period),
      k: PerType::new(
        1 << K_Q,
        I_TO_P_RATIO,
        (P_TO_B_RATIO * I_TO_P_RATIO) >> K_Q,
      ),
      prev_header_bits: PerType::splat(0),
      bits_per_frame,
      num_gops_in_period,
      actual_num_gops_in_period: num_gops_in_period,
      saved_bits: 0,
      max_bits_per_frame,
      min_bits_per_frame: mul_div_i32(min_bitrate as i64, 1000, frame_rate as i64),
      error_bits: ErrorBits::new(frame_rate, bitrate),
      frame_rate,
      bitrate,
      peak_bitrate,
    }
  }

  /// Texture bits for the next picture of type `pic_type`.
  ///
  /// The texture budget of the period is shared in proportion to the
  /// estimated complexity `coeff * sad / K` of every remaining picture. While
  /// any relevant complexity is still unknown, intra pictures get a fixed
  /// multiple of the inter share instead.
  pub fn estimate_texture_bits(
    &mut self, sched: &PictureScheduler, rd_coeffs: PerType<f64>,
    est_sads: PerType<u32>, pic_type: PictureType,
  ) -> i32 {
    let gops = self.num_gops_in_period;
    let frames_in_gop = sched.frames_in_gop();
    let mut rem_frames = sched.remaining_frames_in_gop();
    for t in PictureType::ALL {
      rem_frames[t] += frames_in_gop[t] * (gops - 1);
    }
    let frames_in_period = frames_in_gop.map(|n| n * gops);

    self.rbip.update(sched, 0);
    let mut rem_texture_bits = self.rbip.bits;
    for (t, n) in rem_frames.iter() {
      rem_texture_bits.accumulate(-(n as i64 * self.prev_header_bits[t] as i64));
    }

    let max_consumable_bits = rem_frames
      .iter()
      .map(|(t, n)| {
        n as i64 * self.max_bits_per_frame[t.drain_index()] as i64
      })
      .sum::<i64>();
    let rem_texture_bits = rem_texture_bits.min(max_consumable_bits);

    let complexity = PictureType::ALL.map(|t| {
      rd_coeffs[t] * est_sads[t] as f64 * (1 << K_Q) as f64 / self.k[t] as f64
    });
    let complexity = PerType(complexity);
    let known = complexity[PictureType::I] != 0.0
      && complexity[PictureType::P] != 0.0
      && (frames_in_period[PictureType::B] == 0
        || complexity[PictureType::B] != 0.0);

    let est = if known {
      let weighted: f64 =
        rem_frames.iter().map(|(t, n)| n as f64 * complexity[t]).sum();
      if weighted > 0.0 {
        (rem_texture_bits as f64 * complexity[pic_type] / weighted) as i64
      } else {
        0
      }
    } else {
      let rem = I_TO_P_BIT_RATIO * rem_frames[PictureType::I] as i64
        + rem_frames[PictureType::P] as i64
        + rem_frames[PictureType::B] as i64;
      let per_frame = rem_texture_bits.checked_div(rem).unwrap_or(0);
      if pic_type == PictureType::I {
        per_frame.saturating_mul(I_TO_P_BIT_RATIO)
      } else {
        per_frame
      }
    };
    // A negative target would drive the model the wrong way.
    est.clamp(0, i32::MAX as i64) as i32
  }

  /// Header bits expected for the next picture of this type.
  pub fn estimate_header_bits(&self, pic_type: PictureType) -> i32 {
    self.prev_header_bits[pic_type]
  }

  /// Charges a coded picture to the period.
  pub fn update_consumed(
    &mut self, sched: &PictureScheduler, total_frame_bits: i32,
    header_bits: i32, pic_type: PictureType, is_scene_change: bool,
    last_frame_in_gop: bool,
  ) {
    let error_bits = self.error_bits.get();
    self
      .rbip
      .update(sched, error_bits as i64 - total_frame_bits as i64);

    if is_scene_change {
      // A scene cut coded as P costs what an I does.
      self.prev_header_bits[PictureType::I] = header_bits;
      if self.num_gops_in_period < MAX_NUM_GOPS_IN_PERIOD {
        self.num_gops_in_period =
          (self.num_gops_in_period + 2).min(MAX_NUM_GOPS_IN_PERIOD);
        self.rbip.change(sched, self.bits_per_frame, self.num_gops_in_period);
        debug!("allocation period widened to {} GOPs", self.num_gops_in_period);
      }
    } else {
      self.prev_header_bits[pic_type] = header_bits;
    }

    if last_frame_in_gop {
      let gop_bits =
        sched.frames_in_gop().total() as i64 * self.bits_per_frame as i64;
      if self.num_gops_in_period > self.actual_num_gops_in_period {
        self.num_gops_in_period -= 1;
        self.rbip.change(sched, self.bits_per_frame, self.num_gops_in_period);
      }
      self.rbip.update(sched, gop_bits);
    }

    self.error_bits.update();
  }

  /// Keeps the remaining bits between what the minimum rate promises and what
  /// the buffer can drain in the period, banking the difference.
  pub fn check_and_update(
    &mut self, sched: &PictureScheduler, max_bits_per_frame: i32,
  ) {
    let frames =
      self.num_gops_in_period as i64 * sched.frames_in_gop().total() as i64;
    let max_drain_bits = max_bits_per_frame as i64 * frames;
    let min_bits = self.min_bits_per_frame as i64 * frames;
    let rem = self.rbip.bits;

    if rem > max_drain_bits {
      self.saved_bits.accumulate(rem - max_drain_bits);
      self.rbip.bits = max_drain_bits;
    } else if rem < min_bits {
      self.saved_bits.accumulate(rem - min_bits);
      self.rbip.bits = min_bits;
    } else if self.saved_bits < 0 {
      let allocated = self.saved_bits.min(max_drain_bits - rem);
      self.rbip.bits.accumulate(allocated);
      self.saved_bits.accumulate(-allocated);
    }
  }

  /// Re-plans the rest of the period for a new bitrate or frame rate.
  pub fn change_remaining_bits(
    &mut self, sched: &PictureScheduler, bitrate: u32, frame_rate: u32,
    peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
  ) {
    let bits_per_frame = mul_div_i32(bitrate as i64, 1000, frame_rate as i64);
    self.max_bits_per_frame = peak_bitrate
      .map(|peak| mul_div_i32(peak as i64, 1000, frame_rate as i64));
    self.rbip.change(sched, bits_per_frame, self.num_gops_in_period);
    self.bits_per_frame = bits_per_frame;
    self.error_bits.change_bitrate(bitrate);
    self.error_bits.change_frame_rate(frame_rate);
    self.frame_rate = frame_rate;
    self.bitrate = bitrate;
    self.peak_bitrate = peak_bitrate;
  }

  /// Re-plans the period for the coded frame rate after frame skipping,
  /// keeping the bitrate.
  pub fn change_frame_rate_for_allocation(
    &mut self, sched: &PictureScheduler, frame_rate: u32,
    peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
  ) {
    self.change_remaining_bits(sched, self.bitrate, frame_rate, peak_bitrate);
  }

  pub fn change_peak_bitrate(&mut self, peak_bitrate: [u32; MAX_NUM_DRAIN_RATES]) {
    let frame_rate = self.frame_rate as i64;
    self.max_bits_per_frame =
      peak_bitrate.map(|peak| mul_div_i32(peak as i64, 1000, frame_rate));
    self.peak_bitrate = peak_bitrate;
  }

  /// Gives back the budget of the pictures a forced I cut from the GOP.
  pub fn credit_forced_gop(&mut self, sched: &PictureScheduler) {
    let frames = sched.frames_in_forced_gop() as i64;
    self.rbip.update(sched, self.bits_per_frame as i64 * frames);
  }

  pub fn remaining_bits_in_period(&mut self, sched: &PictureScheduler) -> i32 {
    self.rbip.update(sched, 0);
    self.rbip.bits.clamp(i32::MIN as i64, i32::MAX as i64) as i32
  }

  pub fn frame_rate(&self) -> u32 {
    self.frame_rate
  }

  pub fn bitrate(&self) -> u32 {
    self.bitrate
  }

  pub fn peak_bitrate(&self) -> [u32; MAX_NUM_DRAIN_RATES] {
    self.peak_bitrate
  }

  pub fn bits_per_frame(&self) -> i32 {
    self.bits_per_frame
  }

  pub fn max_bits_per_frame(&self, pic_type: PictureType) -> i32 {
    self.max_bits_per_frame[pic_type.drain_index()]
  }

  pub fn num_gops_in_period(&self) -> i32 {
    self.num_gops_in_period
  }

  pub fn saved_bits(&self) -> i64 {
    self.saved_bits
  }
}

#[cfg(test)]
mod test {
  use super::*;

  const BITRATE: u32 = 1_000_000;
  const FRAME_RATE: u32 = 25000;

  fn setup(intra: i32) -> (PictureScheduler, BitAllocator) {
    let sched = PictureScheduler::new(intra, 1, 1, true);
    let ba = BitAllocator::new(
      &sched,
      ALLOC_PERIOD_CBR,
      BITRATE,
      FRAME_RATE,
      [BITRATE * 4; 2],
      0,
    );
    (sched, ba)
  }

  #[test]
  fn period_starts_with_one_gop_of_bits() {
    let (sched, mut ba) = setup(25);
    assert_eq!(ba.bits_per_frame(), 40_000);
    assert_eq!(ba.remaining_bits_in_period(&sched), 1_000_000);
  }

  #[test]
  fn fixed_ratio_without_model() {
    let (sched, mut ba) = setup(25);
    let zero = PerType::splat(0.0);
    let sads = PerType::splat(0);
    let i = ba.estimate_texture_bits(&sched, zero, sads, PictureType::I);
    let p = ba.estimate_texture_bits(&sched, zero, sads, PictureType::P);
    assert_eq!(p, 1_000_000 / 29);
    assert_eq!(i, p * 5);
  }

  #[test]
  fn complexity_weighted_share() {
    let (sched, mut ba) = setup(25);
    let coeffs = PerType::splat(1.0);
    // Equal complexity once the type constants are applied.
    let sads = PerType::new(1600, 1900, 0);
    let i = ba.estimate_texture_bits(&sched, coeffs, sads, PictureType::I);
    let p = ba.estimate_texture_bits(&sched, coeffs, sads, PictureType::P);
    assert_eq!(i, 40_000);
    assert_eq!(p, 40_000);
    let sads = PerType::new(3200, 1900, 0);
    let i = ba.estimate_texture_bits(&sched, coeffs, sads, PictureType::I);
    assert_eq!(i, 1_000_000 * 2 / 26);
  }

  #[test]
  fn header_bits_come_off_the_top() {
    let (sched, mut ba) = setup(25);
    ba.update_consumed(&sched, 40_000, 1000, PictureType::P, false, false);
    let zero = PerType::splat(0.0);
    let p = ba.estimate_texture_bits(&sched, zero, PerType::splat(0), PictureType::P);
    assert_eq!(ba.estimate_header_bits(PictureType::P), 1000);
    assert_eq!(p, (1_000_000 - 24 * 1000) / 29);
  }

  #[test]
  fn scene_change_widens_period() {
    let (sched, mut ba) = setup(25);
    ba.update_consumed(&sched, 100_000, 500, PictureType::P, true, false);
    assert_eq!(ba.num_gops_in_period(), 3);
    assert_eq!(ba.estimate_header_bits(PictureType::I), 500);
    assert_eq!(
      ba.remaining_bits_in_period(&sched),
      1_000_000 - 100_000 + 2 * 25 * 40_000
    );
    ba.update_consumed(&sched, 40_000, 0, PictureType::P, false, true);
    assert_eq!(ba.num_gops_in_period(), 2);
    assert_eq!(
      ba.remaining_bits_in_period(&sched),
      1_000_000 - 100_000 + 2 * 25 * 40_000 - 40_000 - 25 * 40_000 + 25 * 40_000
    );
  }

  #[test]
  fn excess_bits_are_banked() {
    let (sched, mut ba) = setup(25);
    ba.check_and_update(&sched, 20_000);
    assert_eq!(ba.remaining_bits_in_period(&sched), 500_000);
    assert_eq!(ba.saved_bits(), 500_000);
  }

  #[test]
  fn deficit_is_repaid() {
    let sched = PictureScheduler::new(25, 1, 1, true);
    let mut ba =
      BitAllocator::new(&sched, 1, BITRATE, FRAME_RATE, [BITRATE * 4; 2], BITRATE / 2);
    ba.update_consumed(&sched, 800_000, 0, PictureType::I, false, false);
    ba.check_and_update(&sched, 160_000);
    assert_eq!(ba.remaining_bits_in_period(&sched), 500_000);
    assert_eq!(ba.saved_bits(), -300_000);
    ba.update_consumed(&sched, -1_000_000, 0, PictureType::P, false, false);
    ba.check_and_update(&sched, 160_000);
    assert_eq!(ba.saved_bits(), 0);
    assert_eq!(ba.remaining_bits_in_period(&sched), 1_200_000);
  }

  #[test]
  fn bitrate_change_rescales_remaining_frames() {
    let (sched, mut ba) = setup(25);
    ba.change_remaining_bits(&sched, BITRATE * 2, FRAME_RATE, [BITRATE * 8; 2]);
    assert_eq!(ba.bits_per_frame(), 80_000);
    assert_eq!(ba.remaining_bits_in_period(&sched), 2_000_000);
    assert_eq!(ba.max_bits_per_frame(PictureType::I), 320_000);
    ba.change_frame_rate_for_allocation(&sched, 50000, [BITRATE * 8; 2]);
    assert_eq!(ba.bits_per_frame(), 40_000);
    assert_eq!(ba.remaining_bits_in_period(&sched), 1_000_000);
  }
}
