// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Leaky-bucket models of the decoder input buffer.

use std::fmt;

pub mod cbr;
pub mod vbr_stream;
pub mod vbv;

/// Number of distinct drain rates (peak bitrates): one for intra pictures and
///  one shared by P and B pictures.
pub const MAX_NUM_DRAIN_RATES: usize = 2;

/// State of the simulated decoder buffer after a frame of a given size.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferStatus {
  /// The frame fits.
  Normal,
  /// The decoder would run out of data.
  Underflow,
  /// The decoder would receive more data than it can hold.
  Overflow,
  /// The frame fits, but leaves the storage buffer below a quarter full.
  Caution,
}

impl fmt::Display for BufferStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::BufferStatus::*;
    match self {
      Normal => write!(f, "normal"),
      Underflow => write!(f, "underflow"),
      Overflow => write!(f, "overflow"),
      Caution => write!(f, "caution"),
    }
  }
}
