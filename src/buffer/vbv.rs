// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use super::BufferStatus;
use crate::error_bits::ErrorBits;
use crate::picture::PictureType;
use crate::util::{mul_div_i32, SaturatingAccumulate};

// Desired fullness trajectory of the DVD compliant mode, in percent.
const DVD_MAX_FULLNESS_PCT: i64 = 95;
const DVD_MIN_FULLNESS_PCT: i64 = 10;

/// Decoder buffer model for storage (VBR) modes.
///
/// The decoder fills at the peak rate and the buffer starts full. A frame can
/// never take more than what the decoder holds by the time it is decoded.
#[derive(Debug, Clone)]
pub struct StorageVbv {
  max_size: i32,
  fullness: i32,
  max_bits_inflow_per_frame: i32,
  max_bits_per_tgt_frame: i32,
  max_bitrate: u32,
  frame_rate: u32,
  error_bits: ErrorBits,
}

impl StorageVbv {
  pub fn new(max_bitrate: u32, frame_rate: u32, max_size: u32) -> Self {
    let inflow = mul_div_i32(max_bitrate as i64, 1000, frame_rate as i64);
    let max_size = max_size.min(i32::MAX as u32) as i32;
    StorageVbv {
      max_size,
      fullness: max_size,
      max_bits_inflow_per_frame: inflow,
      max_bits_per_tgt_frame: inflow,
      max_bitrate,
      frame_rate,
      error_bits: ErrorBits::new(frame_rate, max_bitrate),
    }
  }

  // Fullness when the next frame is removed: one frame interval of inflow
  //  later, capped at the buffer size.
  fn fullness_at_decode(&self) -> i32 {
    let mut cur = self.fullness;
    cur.accumulate(self.max_bits_inflow_per_frame);
    cur.accumulate(self.error_bits.get());
    cur.min(self.max_size)
  }

  /// Removes a decoded frame of `bits` from the buffer.
  pub fn update(&mut self, bits: i32) {
    let mut cur = self.fullness_at_decode();
    cur.accumulate(-bits.max(0));
    self.fullness = cur.clamp(0, self.max_size);
    self.error_bits.update();
  }

  /// Status of the buffer if the next frame had `bits` bits, along with the
  /// largest frame that would not underflow it.
  pub fn status(&self, bits: i32) -> (BufferStatus, i32) {
    let avail = self.fullness_at_decode();
    let after = avail.saturating_sub(bits);
    let status = if after < 0 {
      BufferStatus::Underflow
    } else if after > self.max_size {
      BufferStatus::Overflow
    } else if after < self.max_size >> 2 {
      BufferStatus::Caution
    } else {
      BufferStatus::Normal
    };
    (status, avail)
  }

  /// Largest frame the decoder can consume next without underflowing.
  pub fn max_target_bits(&self) -> i32 {
    self.fullness_at_decode()
  }

  /// Frame budget that keeps the buffer on the DVD fullness trajectory.
  ///
  /// Intra pictures may drain the buffer to its floor; other pictures ramp the
  /// fullness back toward the ceiling over the rest of the GOP.
  pub fn max_target_bits_dvd(
    &self, rem_bits_in_gop: i32, rem_frames_in_gop: i32, pic_type: PictureType,
  ) -> i32 {
    let vbv_size = self.max_size as i64;
    let dbf_max = DVD_MAX_FULLNESS_PCT * vbv_size / 100;
    let dbf_min = DVD_MIN_FULLNESS_PCT * vbv_size / 100;
    let dbf_prev = self.fullness as i64;
    let rem_bits = rem_bits_in_gop.max(0) as i64;
    let rem_frames = rem_frames_in_gop.max(1) as i64;

    let desired = if pic_type == PictureType::I {
      dbf_min
    } else {
      (dbf_max - rem_bits / rem_frames - dbf_prev) / rem_frames + dbf_prev
    };
    let next = (dbf_prev + self.max_bits_inflow_per_frame as i64).min(vbv_size);
    (next - desired).clamp(0, i32::MAX as i64) as i32
  }

  /// Fullness after the next frame of `bits` bits is decoded.
  pub fn fullness_with(&self, bits: u32) -> i32 {
    self.fullness_at_decode().saturating_sub(bits.min(i32::MAX as u32) as i32)
  }

  pub fn fullness(&self) -> i32 {
    self.fullness
  }

  pub fn max_size(&self) -> i32 {
    self.max_size
  }

  pub fn max_bits_per_tgt_frame(&self) -> i32 {
    self.max_bits_per_tgt_frame
  }

  pub fn max_bits_inflow_per_frame(&self) -> i32 {
    self.max_bits_inflow_per_frame
  }

  pub fn change_frame_rate(&mut self, frame_rate: u32) {
    self.max_bits_inflow_per_frame =
      mul_div_i32(self.max_bitrate as i64, 1000, frame_rate as i64);
    self.error_bits.change_frame_rate(frame_rate);
    self.frame_rate = frame_rate;
  }

  pub fn change_bitrate(&mut self, max_bitrate: u32) {
    self.max_bits_inflow_per_frame =
      mul_div_i32(max_bitrate as i64, 1000, self.frame_rate as i64);
    self.error_bits.change_bitrate(max_bitrate);
    self.max_bitrate = max_bitrate;
  }

  /// Re-derives the per-frame ceiling for an effective coded frame rate that
  ///  differs from the source rate.
  pub fn change_max_bits_per_target_frame(&mut self, tgt_frame_rate: u32) {
    self.max_bits_per_tgt_frame =
      mul_div_i32(self.max_bitrate as i64, 1000, tgt_frame_rate as i64);
  }
}
