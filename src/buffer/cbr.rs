// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::{BufferStatus, MAX_NUM_DRAIN_RATES};
use crate::error_bits::ErrorBits;
use crate::picture::{PerType, PictureType};
use crate::util::{mul_div, mul_div_i32, saturate_i32, SaturatingAccumulate};

/// Encoder output buffer of the constant bitrate and VBR streaming modes.
///
/// The model tracks the encoder buffer fullness (EBF), which grows by every
/// coded frame and drains at a constant rate per frame interval. Callers reason
/// about the decoder buffer, so statuses are reported with overflow and
/// underflow swapped.
#[derive(Debug, Clone)]
pub struct CbrBuffer {
  size: i32,
  ebf: i32,
  drain_bits_per_frame: [i32; MAX_NUM_DRAIN_RATES],
  upper_threshold: PerType<i32>,
  lower_threshold: PerType<i32>,
  // Padding is required when the buffer would fall below this level. Only
  //  constant bitrate streams pad.
  stuffing_threshold: Option<i32>,
  error_bits: [ErrorBits; MAX_NUM_DRAIN_RATES],
  bitrate: [u32; MAX_NUM_DRAIN_RATES],
  max_delay: u32,
  pics_in_delay: PerType<u32>,
  frame_rate: u32,
  max_vbv_size: u32,
}

impl CbrBuffer {
  /// Creates a buffer of `delay` milliseconds at the given drain rates.
  ///
  /// With all `pics_in_delay` zero the buffer runs in constant bitrate mode
  /// and is sized `bitrate * delay`. Otherwise it is a VBR streaming buffer
  /// sized by the pictures of each type that fit in one delay period.
  pub fn new(
    delay: u32, frame_rate: u32, bitrate: [u32; MAX_NUM_DRAIN_RATES],
    pics_in_delay: PerType<u32>, max_vbv_size: u32,
  ) -> Self {
    let mut buf = CbrBuffer {
      size: 0,
      ebf: 0,
      drain_bits_per_frame: [0; MAX_NUM_DRAIN_RATES],
      upper_threshold: PerType::splat(0),
      lower_threshold: PerType::splat(0),
      stuffing_threshold: None,
      error_bits: [
        ErrorBits::new(frame_rate, bitrate[0]),
        ErrorBits::new(frame_rate, bitrate[1]),
      ],
      bitrate,
      max_delay: delay,
      pics_in_delay,
      frame_rate,
      max_vbv_size,
    };
    buf.set_drain_rates();
    buf.set_size();
    buf
  }

  fn is_cbr_mode(&self) -> bool {
    self.pics_in_delay.0.iter().all(|&n| n == 0)
  }

  fn set_drain_rates(&mut self) {
    for i in 0..MAX_NUM_DRAIN_RATES {
      self.drain_bits_per_frame[i] =
        mul_div_i32(self.bitrate[i] as i64, 1000, self.frame_rate as i64);
    }
  }

  fn set_size(&mut self) {
    let size = if self.is_cbr_mode() {
      mul_div(self.bitrate[0] as i64, self.max_delay as i64, 1000)
    } else {
      self
        .pics_in_delay
        .iter()
        .map(|(t, n)| n as i64 * self.drain_bits_per_frame[t.drain_index()] as i64)
        .sum()
    };
    self.size = saturate_i32(size.min(self.max_vbv_size as i64));
    self.set_thresholds();
    self.ebf = self.ebf.clamp(0, self.size);
  }

  // Intra pictures only need room for the estimation error of one frame.
  //  Inter pictures keep four frames of headroom for the spike of a scene
  //  change coded as P.
  fn set_thresholds(&mut self) {
    let half = self.size >> 1;
    let i_margin = self.drain_bits_per_frame[0];
    let p_margin = self.drain_bits_per_frame[1].saturating_mul(4);
    for t in PictureType::ALL {
      let margin = if t == PictureType::I { i_margin } else { p_margin };
      self.upper_threshold[t] = self.size.saturating_sub(margin).max(half);
      self.lower_threshold[t] = 0;
    }
    self.stuffing_threshold =
      if self.is_cbr_mode() { Some(self.lower_threshold[PictureType::P]) } else { None };
  }

  fn drain(&self, pic_type: PictureType) -> i32 {
    let idx = pic_type.drain_index();
    self.drain_bits_per_frame[idx].saturating_add(self.error_bits[idx].get())
  }

  /// Status of the decoder buffer if the next frame had `bits` bits, along
  /// with the number of bits that would still fit.
  pub fn status(&self, bits: i32, pic_type: PictureType) -> (BufferStatus, i32) {
    let mut cur = self.ebf;
    cur.accumulate(bits);
    let encoder_status;
    if cur > self.size {
      encoder_status = BufferStatus::Overflow;
      cur = self.size;
    } else {
      cur.accumulate(-self.drain(pic_type));
      encoder_status =
        if cur < 0 { BufferStatus::Underflow } else { BufferStatus::Normal };
      cur = cur.max(0);
    }
    // An overflowing encoder buffer starves the decoder and vice versa.
    let status = match encoder_status {
      BufferStatus::Overflow => BufferStatus::Underflow,
      BufferStatus::Underflow => BufferStatus::Overflow,
      s => s,
    };
    (status, self.size - cur)
  }

  pub fn update(&mut self, bits: i32, pic_type: PictureType) {
    let mut ebf = self.ebf;
    ebf.accumulate(bits.max(0));
    ebf.accumulate(-self.drain(pic_type));
    self.ebf = ebf.clamp(0, self.size);
    for eb in self.error_bits.iter_mut() {
      eb.update();
    }
  }

  /// Padding needed after a frame of `bits` bits to keep the buffer above the
  /// stuffing threshold.
  pub fn bits_to_stuff(&self, bits: i32, pic_type: PictureType) -> i32 {
    match self.stuffing_threshold {
      Some(threshold) => {
        let mut after = self.ebf;
        after.accumulate(bits);
        after.accumulate(-self.drain(pic_type));
        threshold.saturating_sub(after).max(0)
      }
      None => 0,
    }
  }

  /// Clips a frame target between what fills the buffer to its upper
  /// threshold and what keeps it above the lower one.
  pub fn constrain_cbr(&self, target: i32, pic_type: PictureType) -> i32 {
    let max_bits = self.upper_threshold[pic_type].saturating_sub(self.ebf).max(0);
    let min_bits = self.lower_threshold[pic_type]
      .saturating_sub(self.ebf.saturating_sub(self.drain_bits_per_frame[pic_type.drain_index()]))
      .max(0);
    if target > max_bits {
      max_bits
    } else if target < min_bits {
      min_bits
    } else {
      target
    }
  }

  /// Clips a frame target to the upper threshold only.
  pub fn constrain_vbr_streaming(&self, target: i32, pic_type: PictureType) -> i32 {
    target.min(self.upper_threshold[pic_type].saturating_sub(self.ebf).max(0))
  }

  pub fn size(&self) -> i32 {
    self.size
  }

  pub fn fullness(&self) -> i32 {
    self.ebf
  }

  pub fn max_delay(&self) -> u32 {
    self.max_delay
  }

  pub fn pics_in_delay(&self) -> PerType<u32> {
    self.pics_in_delay
  }

  pub fn upper_threshold(&self, pic_type: PictureType) -> i32 {
    self.upper_threshold[pic_type]
  }

  pub fn drain_bits_per_frame(&self, pic_type: PictureType) -> i32 {
    self.drain_bits_per_frame[pic_type.drain_index()]
  }

  pub fn change_bitrate(&mut self, bitrate: [u32; MAX_NUM_DRAIN_RATES]) {
    self.bitrate = bitrate;
    for (eb, &rate) in self.error_bits.iter_mut().zip(bitrate.iter()) {
      eb.change_bitrate(rate);
    }
    self.set_drain_rates();
    self.set_size();
  }

  pub fn change_frame_rate(&mut self, frame_rate: u32) {
    self.frame_rate = frame_rate;
    for eb in self.error_bits.iter_mut() {
      eb.change_frame_rate(frame_rate);
    }
    self.set_drain_rates();
    self.set_size();
  }

  pub fn change_buffer_delay(&mut self, delay: u32) {
    self.max_delay = delay;
    self.set_size();
  }

  pub fn update_pics_in_delay(&mut self, pics_in_delay: PerType<u32>) {
    if self.pics_in_delay != pics_in_delay {
      self.pics_in_delay = pics_in_delay;
      self.set_size();
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use quickcheck::quickcheck;

  fn cbr(bitrate: u32, delay: u32, max_vbv: u32) -> CbrBuffer {
    CbrBuffer::new(delay, 30000, [bitrate; 2], PerType::splat(0), max_vbv)
  }

  #[test]
  fn size_from_bitrate_and_delay() {
    assert_eq!(cbr(1_000_000, 1000, u32::MAX).size(), 1_000_000);
    assert_eq!(cbr(1_000_000, 1000, 600_000).size(), 600_000);
    assert_eq!(cbr(1_000_000, 500, u32::MAX).size(), 500_000);
  }

  #[test]
  fn streaming_size_from_pictures_in_delay() {
    let buf = CbrBuffer::new(
      1000,
      30000,
      [3_000_000, 1_500_000],
      PerType::new(1, 29, 0),
      u32::MAX,
    );
    assert_eq!(buf.size(), 100_000 + 29 * 50_000);
    // Streaming buffers never pad.
    assert_eq!(buf.bits_to_stuff(0, PictureType::P), 0);
  }

  #[test]
  fn intra_threshold_is_higher() {
    let buf = cbr(1_000_000, 1000, u32::MAX);
    assert_eq!(buf.upper_threshold(PictureType::I), 1_000_000 - 33_333);
    assert_eq!(buf.upper_threshold(PictureType::P), 1_000_000 - 4 * 33_333);
    assert_eq!(buf.upper_threshold(PictureType::B), 1_000_000 - 4 * 33_333);
  }

  #[test]
  fn polarity_is_inverted() {
    let buf = cbr(1_000_000, 1000, u32::MAX);
    // Too many bits overflow the encoder buffer, which starves the decoder.
    assert_eq!(buf.status(2_000_000, PictureType::I).0, BufferStatus::Underflow);
    // Too few bits drain the encoder buffer, which floods the decoder.
    assert_eq!(buf.status(0, PictureType::P).0, BufferStatus::Overflow);
    let (status, room) = buf.status(33_333, PictureType::P);
    assert_eq!(status, BufferStatus::Normal);
    assert_eq!(room, 1_000_000);
  }

  #[test]
  fn stuffs_below_threshold() {
    let mut buf = cbr(1_000_000, 1000, u32::MAX);
    assert_eq!(buf.bits_to_stuff(10_000, PictureType::P), 23_333);
    buf.update(100_000, PictureType::I);
    assert_eq!(buf.fullness(), 66_667);
    assert_eq!(buf.bits_to_stuff(0, PictureType::P), 0);
  }

  #[test]
  fn constrain_keeps_target_between_thresholds() {
    let mut buf = cbr(1_000_000, 1000, u32::MAX);
    assert_eq!(buf.constrain_cbr(5_000_000, PictureType::I), 966_667);
    assert_eq!(buf.constrain_cbr(1000, PictureType::P), 33_333);
    buf.update(950_000, PictureType::I);
    assert_eq!(buf.fullness(), 916_667);
    assert_eq!(buf.constrain_cbr(5_000_000, PictureType::P), 0);
    assert_eq!(buf.constrain_vbr_streaming(5_000_000, PictureType::I), 50_000);
  }

  quickcheck! {
    fn fullness_stays_in_bounds(
      bitrate: u32, delay: u16, frames: Vec<(u32, bool)>
    ) -> bool {
      let bitrate = bitrate % 50_000_000 + 1000;
      let delay = delay as u32 % 10_000 + 1;
      let mut buf = cbr(bitrate, delay, u32::MAX);
      frames.into_iter().all(|(bits, intra)| {
        let t = if intra { PictureType::I } else { PictureType::P };
        buf.update((bits % 100_000_000) as i32, t);
        0 <= buf.fullness() && buf.fullness() <= buf.size()
      })
    }
  }
}
