// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use num_traits::SaturatingAdd;

/// Computes `x * y / z` with a 64-bit intermediate product.
///
/// Returns 0 when `z` is 0; callers only pass a zero divisor when the
/// corresponding quantity (frame rate, frame count) is itself degenerate.
#[inline]
pub fn mul_div(x: i64, y: i64, z: i64) -> i64 {
  (x as i128 * y as i128).checked_div(z as i128).map_or(0, saturate_i64)
}

/// Same as [`mul_div`], saturated into the 32-bit bit-count domain.
#[inline]
pub fn mul_div_i32(x: i64, y: i64, z: i64) -> i32 {
  saturate_i32(mul_div(x, y, z))
}

#[inline]
pub fn saturate_i32(v: i64) -> i32 {
  v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[inline]
fn saturate_i64(v: i128) -> i64 {
  v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Rounded right shift of a Qn value.
#[inline]
pub const fn round_shift(v: i32, shift: u32) -> i32 {
  (v + (1 << (shift - 1))) >> shift
}

/// Overflow-free accumulation into a bit counter.
///
/// Buffer fullness and remaining-bit counters are all summed through this
/// trait so the saturation rule lives in exactly one place.
pub trait SaturatingAccumulate<Rhs = Self> {
  fn accumulate(&mut self, rhs: Rhs);
}

impl<T: SaturatingAdd> SaturatingAccumulate for T {
  #[inline]
  fn accumulate(&mut self, rhs: T) {
    *self = self.saturating_add(&rhs);
  }
}

impl SaturatingAccumulate<i32> for i64 {
  #[inline]
  fn accumulate(&mut self, rhs: i32) {
    *self = self.saturating_add(rhs as i64);
  }
}

pub const fn gcd(mut a: u64, mut b: u64) -> u64 {
  while b != 0 {
    let t = a % b;
    a = b;
    b = t;
  }
  a
}

pub const fn lcm(a: u64, b: u64) -> u64 {
  if a == 0 || b == 0 {
    return 0;
  }
  a / gcd(a, b) * b
}

#[cfg(test)]
mod test {
  use super::*;
  use quickcheck::quickcheck;

  #[test]
  fn mul_div_vectors() {
    assert_eq!(mul_div(1_000_000, 1000, 30000), 33333);
    assert_eq!(mul_div(i32::MAX as i64, 1000, 1), 2_147_483_647_000);
    assert_eq!(mul_div_i32(i32::MAX as i64, 1000, 1), i32::MAX);
    assert_eq!(mul_div(5, 7, 0), 0);
  }

  #[test]
  fn lcm_of_common_rates() {
    assert_eq!(lcm(30000, 25000), 150000);
    assert_eq!(lcm(60000, 30000), 60000);
    assert_eq!(gcd(30000, 29970), 30);
  }

  #[test]
  fn accumulate_saturates_every_width() {
    let mut wide = i64::MAX - 1;
    wide.accumulate(5i64);
    assert_eq!(wide, i64::MAX);
    wide.accumulate(i32::MIN);
    assert_eq!(wide, i64::MAX + i32::MIN as i64);
    let mut count = u32::MAX;
    count.accumulate(1u32);
    assert_eq!(count, u32::MAX);
  }

  quickcheck! {
    fn accumulate_never_wraps(a: i32, b: i32) -> bool {
      let mut acc = a;
      acc.accumulate(b);
      acc as i64 == (a as i64 + b as i64).clamp(i32::MIN as i64, i32::MAX as i64)
    }
  }
}
