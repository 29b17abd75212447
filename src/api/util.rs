// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::util::saturate_i32;
use std::fmt;

/// The number of macroblock classes statistics are gathered for.
pub const MB_TYPES: usize = 2;

/// Macroblock class of a [`FrameStats`] entry.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum MbType {
  /// Intra coded macroblocks.
  Intra = 0,
  /// Inter coded macroblocks.
  Inter = 1,
}

/// Statistics of a coded picture, gathered by the encode pipeline.
///
/// Per-macroblock quantities are split by [`MbType`].
#[derive(Debug, Default, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameStats {
  /// Sum of absolute differences of the residual.
  pub sad: [u32; MB_TYPES],
  /// Bits of the whole picture.
  pub total_bits: i32,
  /// Bits spent outside the residual: headers, modes and motion vectors.
  pub header_bits: i32,
  /// Bits of the residual.
  pub texture_bits: [i32; MB_TYPES],
  /// Sum of the QP of every macroblock.
  pub qp_sum: [i32; MB_TYPES],
  /// Macroblocks coded.
  pub mb_count: [i32; MB_TYPES],
  /// Mean spatial activity of the picture, or 0 when not measured.
  pub avg_activity: i32,
  /// The picture starts a new scene.
  pub is_scene_change: bool,
  /// Cost of coding the picture as intra.
  pub intra_cost: i32,
}

impl FrameStats {
  /// Residual SAD of the whole picture.
  pub fn frame_sad(&self) -> u32 {
    self.sad.iter().fold(0u32, |acc, &s| acc.saturating_add(s))
  }

  /// Residual bits of the whole picture.
  pub fn frame_texture_bits(&self) -> i32 {
    self.texture_bits.iter().fold(0i32, |acc, &b| acc.saturating_add(b))
  }

  /// Mean macroblock QP, or `None` if no macroblock was coded.
  pub fn average_qp(&self) -> Option<i32> {
    let mbs: i64 = self.mb_count.iter().map(|&n| n as i64).sum();
    let qp: i64 = self.qp_sum.iter().map(|&q| q as i64).sum();
    qp.checked_div(mbs).map(saturate_i32)
  }
}

/// Outcome of a peak bitrate change.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum PeakRateStatus {
  /// The change was accepted.
  Ok,
  /// The change was rejected.
  Fail,
  /// The change replaced one still waiting to take effect. The newest value
  /// wins.
  BenignErr,
}

impl fmt::Display for PeakRateStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::PeakRateStatus::*;
    match self {
      Ok => write!(f, "ok"),
      Fail => write!(f, "failed"),
      BenignErr => write!(f, "replaced a pending change"),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn totals_over_mb_types() {
    let stats = FrameStats {
      sad: [1000, 3000],
      texture_bits: [2000, 6000],
      qp_sum: [300, 900],
      mb_count: [10, 30],
      ..Default::default()
    };
    assert_eq!(stats.frame_sad(), 4000);
    assert_eq!(stats.frame_texture_bits(), 8000);
    assert_eq!(stats.average_qp(), Some(30));
    assert_eq!(FrameStats::default().average_qp(), None);
  }

  #[test]
  fn average_qp_of_large_totals() {
    // The QP sum exceeds i32 once the two macroblock types are added.
    let stats = FrameStats {
      qp_sum: [2_000_000_000, 2_000_000_000],
      mb_count: [40_000_000, 40_000_000],
      ..Default::default()
    };
    assert_eq!(stats.average_qp(), Some(50));
  }
}
