// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::util::mul_div_i32;

// Frame rates are in frames per 1000 seconds, so every frame moves the
//  accumulator by 1000 and one second of frames adds up to the frame rate.
const FRAME_RATE_INCREMENT: i32 = 1000;

/// Tracks the truncation error of `bitrate * 1000 / frame_rate`.
///
/// Integer bits-per-frame under-counts the bitrate by up to one bit per frame.
/// Summed over one second of frames the shortfall is exact, and it is handed
/// back to the buffer models once per second.
#[derive(Debug, Clone)]
pub struct ErrorBits {
  max_tgt_frame_rate: i32,
  tgt_frame_rate: i32,
  accum_frame_rate: i32,
  accum_bitrate: i32,
  bitrate: i32,
  compute_error_bits: bool,
}

impl ErrorBits {
  /// Creates an accumulator for `bitrate` bits/s at `frame_rate` frames per
  /// 1000 seconds.
  pub fn new(frame_rate: u32, bitrate: u32) -> Self {
    ErrorBits {
      max_tgt_frame_rate: frame_rate as i32,
      tgt_frame_rate: frame_rate as i32,
      accum_frame_rate: 0,
      accum_bitrate: 0,
      bitrate: bitrate as i32,
      compute_error_bits: false,
    }
  }

  /// Advances by one frame.
  pub fn update(&mut self) {
    let bits_per_frame =
      mul_div_i32(self.bitrate as i64, 1000, self.tgt_frame_rate as i64);

    if self.compute_error_bits {
      self.accum_bitrate = 0;
      self.accum_frame_rate = 0;
    }

    self.accum_frame_rate += FRAME_RATE_INCREMENT;
    self.accum_bitrate = self.accum_bitrate.saturating_add(bits_per_frame);

    self.compute_error_bits = self.accum_frame_rate >= self.max_tgt_frame_rate;
  }

  /// The correction owed for the current frame.
  ///
  /// Non-zero only on the frame that closes a one second window.
  pub fn get(&self) -> i32 {
    if self.compute_error_bits {
      self.bitrate.saturating_sub(self.accum_bitrate)
    } else {
      0
    }
  }

  pub fn change_frame_rate(&mut self, frame_rate: u32) {
    self.max_tgt_frame_rate = frame_rate as i32;
    self.tgt_frame_rate = frame_rate as i32;
  }

  pub fn change_bitrate(&mut self, bitrate: u32) {
    self.bitrate = bitrate as i32;
  }
}

#[cfg(test)]
mod test {
  use super::ErrorBits;
  use quickcheck::quickcheck;

  #[test]
  fn reports_once_per_second() {
    // 1 Mbps at 30 fps truncates to 33333 bits per frame, 10 bits short
    //  over a second.
    let mut eb = ErrorBits::new(30000, 1_000_000);
    let mut reported = Vec::new();
    for _ in 0..90 {
      eb.update();
      reported.push(eb.get());
    }
    for (i, &e) in reported.iter().enumerate() {
      if (i + 1) % 30 == 0 {
        assert_eq!(e, 10, "frame {}", i);
      } else {
        assert_eq!(e, 0, "frame {}", i);
      }
    }
  }

  #[test]
  fn exact_division_has_no_error() {
    let mut eb = ErrorBits::new(25000, 1_000_000);
    for _ in 0..100 {
      eb.update();
      assert_eq!(eb.get(), 0);
    }
  }

  quickcheck! {
    fn one_second_sums_to_bitrate(fps: u8, bitrate: u32) -> bool {
      let fps = (fps as u32 % 60) + 1;
      let bitrate = bitrate % 100_000_000 + 1;
      let mut eb = ErrorBits::new(fps * 1000, bitrate);
      let bpf = (bitrate as u64 * 1000 / (fps as u64 * 1000)) as i64;
      let mut total = 0i64;
      for _ in 0..fps {
        eb.update();
        total += bpf + eb.get() as i64;
      }
      total == bitrate as i64
    }
  }
}
