// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use itertools::Itertools;

use crate::buffer::MAX_NUM_DRAIN_RATES;
use crate::picture::PerType;

use std::fmt;
use std::str::FromStr;

/// Largest quantizer scale the rate model works in.
pub const MAX_QP: u8 = 228;
/// Largest supported frame rate, in frames per 1000 seconds.
pub const MAX_FRAME_RATE: u32 = 240_000;

/// Rate control algorithm.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum RcMode {
  /// Variable bitrate against a pre-filled storage buffer.
  VbrStorage,
  /// [`RcMode::VbrStorage`] steering the buffer along the fullness
  /// trajectory of optical disc authoring.
  VbrStorageDvd,
  /// Variable bitrate against a streaming buffer drained at peak rates.
  VbrStreaming,
  /// No rate control; every picture uses its initial QP.
  ConstQp,
  /// Constant bitrate without picture reordering delay.
  CbrLowDelay,
  /// Constant bitrate.
  #[default]
  CbrNonLowDelay,
}

impl RcMode {
  /// Names accepted by [`FromStr`].
  pub const VARIANTS: [&'static str; 6] =
    ["storage", "dvd", "streaming", "cqp", "cbr-ld", "cbr"];

  /// Modes that simulate the storage VBV.
  pub const fn is_storage(self) -> bool {
    matches!(self, RcMode::VbrStorage | RcMode::VbrStorageDvd)
  }

  /// Modes that simulate the encoder output buffer at constant drain rates.
  pub const fn is_cbr(self) -> bool {
    matches!(self, RcMode::CbrLowDelay | RcMode::CbrNonLowDelay)
  }

  pub(crate) const fn is_vbr(self) -> bool {
    matches!(
      self,
      RcMode::VbrStorage | RcMode::VbrStorageDvd | RcMode::VbrStreaming
    )
  }
}

impl fmt::Display for RcMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::RcMode::*;
    let name = match self {
      VbrStorage => "storage",
      VbrStorageDvd => "dvd",
      VbrStreaming => "streaming",
      ConstQp => "cqp",
      CbrLowDelay => "cbr-ld",
      CbrNonLowDelay => "cbr",
    };
    write!(f, "{}", name)
  }
}

impl FromStr for RcMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    use self::RcMode::*;
    match s.to_ascii_lowercase().as_str() {
      "storage" => Ok(VbrStorage),
      "dvd" => Ok(VbrStorageDvd),
      "streaming" => Ok(VbrStreaming),
      "cqp" => Ok(ConstQp),
      "cbr-ld" => Ok(CbrLowDelay),
      "cbr" => Ok(CbrNonLowDelay),
      _ => Err(format!(
        "unknown rate control mode {} (expected one of {})",
        s,
        RcMode::VARIANTS.iter().join(", ")
      )),
    }
  }
}

/// Rate control configuration
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RateControlConfig {
  pub(crate) mode: RcMode,
  pub(crate) bitrate: u32,
  pub(crate) peak_bitrate: Option<[u32; MAX_NUM_DRAIN_RATES]>,
  pub(crate) min_bitrate: u32,
  pub(crate) frame_rate: u32,
  pub(crate) src_frame_rate: Option<u32>,
  pub(crate) max_frame_rate: Option<u32>,
  pub(crate) buffer_delay: u32,
  pub(crate) max_vbv_size: u32,
  pub(crate) init_qp: PerType<u8>,
  pub(crate) min_qp: PerType<u8>,
  pub(crate) max_qp: PerType<u8>,
  pub(crate) mb_level_rc: bool,
  pub(crate) use_est_intra_sad: bool,
}

impl Default for RateControlConfig {
  fn default() -> Self {
    RateControlConfig {
      mode: RcMode::default(),
      bitrate: 0,
      peak_bitrate: None,
      min_bitrate: 0,
      frame_rate: 30000,
      src_frame_rate: None,
      max_frame_rate: None,
      buffer_delay: 1000,
      max_vbv_size: 20_000_000,
      init_qp: PerType::new(40, 42, 44),
      min_qp: PerType::splat(1),
      max_qp: PerType::splat(MAX_QP),
      mb_level_rc: false,
      use_est_intra_sad: false,
    }
  }
}

impl RateControlConfig {
  /// Create a default rate control configuration
  ///
  /// The default mode is constant bitrate at 30 frames per second with a
  /// one second buffer. A target bitrate must be set before use.
  pub fn new() -> Self {
    Default::default()
  }

  /// Set the rate control algorithm
  pub const fn with_mode(mut self, mode: RcMode) -> Self {
    self.mode = mode;
    self
  }

  /// Set the target average bitrate, in bits per second
  pub const fn with_bitrate(mut self, bitrate: u32) -> Self {
    self.bitrate = bitrate;
    self
  }

  /// Set the drain rates of the buffer, for intra and for inter pictures
  ///
  /// Defaults to the average bitrate.
  pub const fn with_peak_bitrate(
    mut self, peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
  ) -> Self {
    self.peak_bitrate = Some(peak_bitrate);
    self
  }

  /// Set the bitrate the allocation period is never planned below
  pub const fn with_min_bitrate(mut self, min_bitrate: u32) -> Self {
    self.min_bitrate = min_bitrate;
    self
  }

  /// Set the coded frame rate, in frames per 1000 seconds
  pub const fn with_frame_rate(mut self, frame_rate: u32) -> Self {
    self.frame_rate = frame_rate;
    self
  }

  /// Set the frame rate of the source, in frames per 1000 seconds
  ///
  /// Source frames beyond the coded frame rate are skipped. Defaults to the
  /// coded frame rate.
  pub const fn with_src_frame_rate(mut self, src_frame_rate: u32) -> Self {
    self.src_frame_rate = Some(src_frame_rate);
    self
  }

  /// Set the highest frame rate of the session, which fixes the time code
  /// resolution
  pub const fn with_max_frame_rate(mut self, max_frame_rate: u32) -> Self {
    self.max_frame_rate = Some(max_frame_rate);
    self
  }

  /// Set the buffer delay, in milliseconds
  pub const fn with_buffer_delay(mut self, buffer_delay: u32) -> Self {
    self.buffer_delay = buffer_delay;
    self
  }

  /// Set the largest buffer size, in bits
  pub const fn with_max_vbv_size(mut self, max_vbv_size: u32) -> Self {
    self.max_vbv_size = max_vbv_size;
    self
  }

  /// Set the QP of each picture type before the models have data
  pub const fn with_init_qp(mut self, init_qp: PerType<u8>) -> Self {
    self.init_qp = init_qp;
    self
  }

  /// Set the QP range of each picture type
  pub const fn with_qp_range(
    mut self, min_qp: PerType<u8>, max_qp: PerType<u8>,
  ) -> Self {
    self.min_qp = min_qp;
    self.max_qp = max_qp;
    self
  }

  /// Enable activity based macroblock QP modulation
  pub const fn with_mb_level_rc(mut self, enable: bool) -> Self {
    self.mb_level_rc = enable;
    self
  }

  /// Extrapolate the intra SAD from the inter SAD trend instead of using the
  /// intra cost of every frame
  pub const fn with_est_intra_sad(mut self, enable: bool) -> Self {
    self.use_est_intra_sad = enable;
    self
  }

  /// The rate control algorithm.
  pub const fn mode(&self) -> RcMode {
    self.mode
  }

  /// Drain rates, falling back to the average bitrate.
  pub(crate) fn peak_bitrate(&self) -> [u32; MAX_NUM_DRAIN_RATES] {
    self.peak_bitrate.unwrap_or([self.bitrate; MAX_NUM_DRAIN_RATES])
  }

  pub(crate) fn src_frame_rate(&self) -> u32 {
    self.src_frame_rate.unwrap_or(self.frame_rate)
  }

  pub(crate) fn max_frame_rate(&self) -> u32 {
    self
      .max_frame_rate
      .unwrap_or_else(|| self.frame_rate.max(self.src_frame_rate()))
  }
}

impl fmt::Display for RateControlConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    let peak = self.peak_bitrate();
    let pairs = [
      ("mode", self.mode.to_string()),
      ("bitrate", self.bitrate.to_string()),
      ("peak_bitrate", format!("{}/{}", peak[0], peak[1])),
      ("min_bitrate", self.min_bitrate.to_string()),
      ("frame_rate", self.frame_rate.to_string()),
      ("src_frame_rate", self.src_frame_rate().to_string()),
      ("buffer_delay", self.buffer_delay.to_string()),
      ("max_vbv_size", self.max_vbv_size.to_string()),
      ("init_qp", self.init_qp.0.iter().join("/")),
      ("min_qp", self.min_qp.0.iter().join("/")),
      ("max_qp", self.max_qp.0.iter().join("/")),
      ("mb_level_rc", self.mb_level_rc.to_string()),
    ];
    write!(
      f,
      "{}",
      pairs.iter().map(|pair| format!("{}={}", pair.0, pair.1)).join(" ")
    )
  }
}
