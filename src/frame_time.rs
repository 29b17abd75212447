// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Source to target frame-rate conversion and time codes.

use crate::util::{lcm, mul_div};

/// Decides which source frames to drop when the target frame rate is below
/// the source frame rate.
///
/// Both clocks count in units of `1 / lcm(src, tgt)`, so each frame interval is
/// an integer number of ticks and the clocks meet again after a whole period.
#[derive(Debug, Clone)]
pub struct FrameTime {
  src_frame_rate: u32,
  tgt_frame_rate: u32,
  common_time_base: u64,
  src_incr: u64,
  tgt_incr: u64,
  src_time: u64,
  tgt_time: u64,
  // Frames that must be coded whatever the clocks say, because the caller
  //  already jumped the time stamps past them.
  frames_not_to_skip: i64,
}

impl FrameTime {
  pub fn new(src_frame_rate: u32, tgt_frame_rate: u32) -> Self {
    let mut ft = FrameTime {
      src_frame_rate,
      tgt_frame_rate,
      common_time_base: 0,
      src_incr: 0,
      tgt_incr: 0,
      src_time: 0,
      tgt_time: 0,
      frames_not_to_skip: 0,
    };
    ft.set_base();
    ft
  }

  fn set_base(&mut self) {
    let (src, tgt) = (self.src_frame_rate as u64, self.tgt_frame_rate as u64);
    self.common_time_base = lcm(src, tgt);
    self.src_incr = self.common_time_base.checked_div(src).unwrap_or(0);
    self.tgt_incr = self.common_time_base.checked_div(tgt).unwrap_or(0);
    self.src_time = 0;
    self.tgt_time = 0;
  }

  /// Advances by one source frame whose time stamp moved `delta_time_stamp`
  /// frame intervals.
  ///
  /// Returns whether the frame should be skipped and whether a skip was
  /// cancelled to keep decode time stamps monotonic.
  pub fn should_skip(&mut self, delta_time_stamp: i32) -> (bool, bool) {
    let mut skip = self.tgt_time > self.src_time
      && self.tgt_time >= self.src_time + self.src_incr;

    self.frames_not_to_skip += delta_time_stamp as i64 - 1;
    let mut not_skipped_for_dts = false;
    if self.frames_not_to_skip > 0 && skip {
      skip = false;
      not_skipped_for_dts = true;
      self.frames_not_to_skip -= 1;
    }

    self.src_time += self.src_incr;
    if !skip {
      self.tgt_time += self.tgt_incr;
    }

    let base = self.common_time_base;
    if base != 0 && self.src_time >= base && self.tgt_time >= base {
      self.src_time -= base;
      self.tgt_time -= base;
    }
    (skip, not_skipped_for_dts)
  }

  pub fn src_frame_rate(&self) -> u32 {
    self.src_frame_rate
  }

  pub fn tgt_frame_rate(&self) -> u32 {
    self.tgt_frame_rate
  }

  /// Ticks of the common base per source frame.
  pub fn src_ticks(&self) -> u32 {
    self.src_incr.min(u32::MAX as u64) as u32
  }

  /// Ticks of the common base per coded frame.
  pub fn tgt_ticks(&self) -> u32 {
    self.tgt_incr.min(u32::MAX as u64) as u32
  }

  pub fn change_src_frame_rate(&mut self, src_frame_rate: u32) {
    self.src_frame_rate = src_frame_rate;
    self.set_base();
  }

  pub fn change_tgt_frame_rate(&mut self, tgt_frame_rate: u32) {
    self.tgt_frame_rate = tgt_frame_rate;
    self.set_base();
  }
}

// Time codes are stored in 16 bits.
const MAX_TIME_STAMP_RESOLUTION: u32 = 60000;

/// Generates `(seconds, ticks)` time codes for source frames.
#[derive(Debug, Clone)]
pub struct TimeStamp {
  resolution: u32,
  resolution_halved: bool,
  src_frame_rate: u32,
  incr: u32,
  incr_rem: u32,
  rem_accum: u32,
  seconds: u32,
  ticks: u32,
}

impl TimeStamp {
  pub fn new(max_frame_rate: u32, src_frame_rate: u32) -> Self {
    let resolution_halved = max_frame_rate > MAX_TIME_STAMP_RESOLUTION;
    let resolution =
      if resolution_halved { max_frame_rate >> 1 } else { max_frame_rate };
    let mut ts = TimeStamp {
      resolution,
      resolution_halved,
      src_frame_rate,
      incr: 0,
      incr_rem: 0,
      rem_accum: 0,
      seconds: 0,
      ticks: 0,
    };
    ts.set_increment();
    ts
  }

  fn set_increment(&mut self) {
    let num = self.resolution as u64 * 1000;
    let den = self.src_frame_rate as u64;
    if den == 0 {
      self.incr = 0;
      self.incr_rem = 0;
    } else {
      self.incr = (num / den) as u32;
      self.incr_rem = (num % den) as u32;
    }
    self.rem_accum = 0;
  }

  /// Advances by one source frame.
  pub fn update(&mut self) {
    let mut ticks = self.ticks as u64 + self.incr as u64;
    self.rem_accum += self.incr_rem;
    if self.src_frame_rate != 0 && self.rem_accum >= self.src_frame_rate {
      self.rem_accum -= self.src_frame_rate;
      ticks += 1;
    }
    if self.resolution != 0 {
      self.seconds =
        self.seconds.wrapping_add((ticks / self.resolution as u64) as u32);
      ticks %= self.resolution as u64;
    }
    self.ticks = ticks as u32;
  }

  pub fn get(&self) -> (u32, u32) {
    (self.seconds, self.ticks)
  }

  /// Ticks per second.
  pub fn resolution(&self) -> u32 {
    self.resolution
  }

  pub fn is_resolution_halved(&self) -> bool {
    self.resolution_halved
  }

  pub fn change_src_frame_rate(&mut self, src_frame_rate: u32) {
    self.src_frame_rate = src_frame_rate;
    self.set_increment();
  }
}

/// Measures the effective coded frame rate over one second windows of source
/// frames.
#[derive(Debug, Clone)]
pub struct PulldownRate {
  src_frame_rate: u32,
  window: u32,
  src_in_window: u32,
  coded_in_window: u32,
  average: u32,
}

impl PulldownRate {
  pub fn new(src_frame_rate: u32) -> Self {
    PulldownRate {
      src_frame_rate,
      window: (src_frame_rate / 1000 + (src_frame_rate % 1000 != 0) as u32)
        .max(1),
      src_in_window: 0,
      coded_in_window: 0,
      average: src_frame_rate,
    }
  }

  /// Counts one source frame. Returns `true` when a window closed with a new
  /// average.
  pub fn update(&mut self, coded: bool) -> bool {
    self.src_in_window += 1;
    if coded {
      self.coded_in_window += 1;
    }
    if self.src_in_window < self.window {
      return false;
    }
    let average = mul_div(
      self.coded_in_window as i64,
      self.src_frame_rate as i64,
      self.window as i64,
    ) as u32;
    self.src_in_window = 0;
    self.coded_in_window = 0;
    let changed = average != self.average;
    self.average = average;
    changed
  }

  /// Effective coded frame rate, in frames per 1000 seconds.
  pub fn average(&self) -> u32 {
    self.average
  }

  pub fn change_src_frame_rate(&mut self, src_frame_rate: u32) {
    *self = PulldownRate::new(src_frame_rate);
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn equal_rates_never_skip() {
    let mut ft = FrameTime::new(30000, 30000);
    for _ in 0..100 {
      assert_eq!(ft.should_skip(1), (false, false));
    }
  }

  #[test]
  fn half_rate_skips_every_other_frame() {
    let mut ft = FrameTime::new(30000, 15000);
    let skips: Vec<bool> = (0..8).map(|_| ft.should_skip(1).0).collect();
    assert_eq!(skips, [false, true, false, true, false, true, false, true]);
  }

  #[test]
  fn skip_ratio_over_a_period() {
    let mut ft = FrameTime::new(30000, 25000);
    let coded = (0..300).filter(|_| !ft.should_skip(1).0).count();
    assert_eq!(coded, 250);
  }

  #[test]
  fn time_stamp_jump_cancels_skip() {
    let mut ft = FrameTime::new(30000, 15000);
    assert_eq!(ft.should_skip(1), (false, false));
    assert_eq!(ft.should_skip(2), (false, true));
  }

  #[test]
  fn time_stamp_carries_seconds() {
    let mut ts = TimeStamp::new(30000, 30000);
    for _ in 0..45 {
      ts.update();
    }
    assert_eq!(ts.get(), (1, 15000));
  }

  #[test]
  fn high_resolution_is_halved() {
    let ts = TimeStamp::new(120000, 60000);
    assert!(ts.is_resolution_halved());
    assert_eq!(ts.resolution(), 60000);
    let ts = TimeStamp::new(60000, 60000);
    assert!(!ts.is_resolution_halved());
  }

  #[test]
  fn ntsc_time_stamps_stay_exact() {
    let mut ts = TimeStamp::new(30000, 29970);
    for _ in 0..2997 {
      ts.update();
    }
    assert_eq!(ts.get(), (100, 0));
  }

  #[test]
  fn pulldown_reports_effective_rate() {
    let mut pd = PulldownRate::new(30000);
    assert_eq!(pd.average(), 30000);
    let mut changed = false;
    for i in 0..30 {
      changed = pd.update(i % 5 != 0);
    }
    assert!(changed);
    assert_eq!(pd.average(), 24000);
    for i in 0..30 {
      changed = pd.update(i % 5 != 0);
    }
    assert!(!changed);
  }

  #[test]
  fn pulldown_window_rounds_up_fractional_rates() {
    // 29.97 fps averages over 30 source frames.
    let mut pd = PulldownRate::new(29970);
    for _ in 0..29 {
      assert!(!pd.update(true));
    }
    assert!(pd.update(false));
    assert_eq!(pd.average(), 28971);
  }
}
