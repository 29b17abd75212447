// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use crate::api::{Layout, RateControl};
use crate::gop::MAX_INTER_FRAME_INTERVAL;
use crate::picture::PictureType;

mod gop;
pub use gop::*;

mod rate;
pub use rate::*;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The coded frame rate is invalid.
  #[error("invalid frame rate {actual} (expected > 0, <= {max})")]
  InvalidFrameRate {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The source frame rate is invalid.
  #[error("invalid source frame rate {actual} (expected > 0, <= {max})")]
  InvalidSrcFrameRate {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The rate control needs a target bitrate in order to produce results
  #[error("The rate control requires a target bitrate")]
  TargetBitrateNeeded,
  /// A peak bitrate is lower than the average bitrate.
  #[error("invalid peak bitrate {actual} (expected >= {min})")]
  PeakBelowAverage {
    /// The actual value.
    actual: u32,
    /// The minimal supported value.
    min: u32,
  },
  /// The intra interval is zero.
  #[error("invalid intra interval {0} (expected > 0)")]
  InvalidIntraInterval(u32),
  /// The inter interval is invalid.
  #[error("invalid inter interval {actual} (expected >= 1, <= {max})")]
  InvalidInterInterval {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The maximal inter interval exceeds the reorder buffer.
  #[error("invalid max inter interval {actual} (expected >= 1, <= {max})")]
  InvalidMaxInterInterval {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The QP range of a picture type is empty or beyond the model range.
  #[error(
    "invalid {pic_type} QP range {min}..={max} (expected min <= max <= {limit})"
  )]
  InvalidQpRange {
    /// The picture type.
    pic_type: PictureType,
    /// The configured minimum.
    min: u8,
    /// The configured maximum.
    max: u8,
    /// The maximal supported value.
    limit: u8,
  },
  /// The initial QP of a picture type is outside its range.
  #[error("invalid {pic_type} initial QP {actual} (expected >= {min}, <= {max})")]
  InvalidInitQp {
    /// The picture type.
    pic_type: PictureType,
    /// The actual value.
    actual: u8,
    /// The minimal supported value.
    min: u8,
    /// The maximal supported value.
    max: u8,
  },
  /// The buffer delay is zero in a rate controlled mode.
  #[error("The rate control requires a buffer delay")]
  BufferDelayNeeded,
  /// The largest buffer size is zero.
  #[error("invalid max VBV size {0} (expected > 0)")]
  InvalidVbvSize(u32),
}

/// Contains the rate control configuration.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
  /// Bitrate, frame rate, buffer and QP settings.
  pub(crate) rate: RateControlConfig,
  /// Picture type pattern.
  pub(crate) gop: GopConfig,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the rate control configuration
  pub const fn with_rate(mut self, rate: RateControlConfig) -> Self {
    self.rate = rate;
    self
  }

  /// Set the GOP configuration
  pub const fn with_gop(mut self, gop: GopConfig) -> Self {
    self.gop = gop;
    self
  }

  /// The rate control configuration.
  pub const fn rate(&self) -> &RateControlConfig {
    &self.rate
  }

  /// The GOP configuration.
  pub const fn gop(&self) -> &GopConfig {
    &self.gop
  }

  /// Creates a [`RateControl`] with this configuration.
  ///
  /// This lays out the state and binds it to blocks it describes itself.
  /// Callers that supply their own blocks go through [`Layout`] instead.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid.
  ///
  /// # Examples
  ///
  /// ```
  /// use ratectl::prelude::*;
  ///
  /// # fn main() -> Result<(), InvalidConfig> {
  /// let cfg = Config::new()
  ///   .with_rate(RateControlConfig::new().with_bitrate(1_000_000));
  /// let rc = cfg.new_context()?;
  /// # Ok(())
  /// # }
  /// ```
  pub fn new_context(&self) -> Result<RateControl, InvalidConfig> {
    Ok(Layout::new(self)?.into_context())
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` for the first setting found out of range.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let rc = &self.rate;
    let gop = &self.gop;

    if rc.frame_rate == 0 || rc.frame_rate > MAX_FRAME_RATE {
      return Err(InvalidFrameRate { actual: rc.frame_rate, max: MAX_FRAME_RATE });
    }
    let src_frame_rate = rc.src_frame_rate();
    if src_frame_rate == 0 || src_frame_rate > MAX_FRAME_RATE {
      return Err(InvalidSrcFrameRate {
        actual: src_frame_rate,
        max: MAX_FRAME_RATE,
      });
    }

    if gop.intra_interval == 0 {
      return Err(InvalidIntraInterval(gop.intra_interval));
    }
    let max_inter = MAX_INTER_FRAME_INTERVAL as u32;
    if gop.max_inter_interval == 0 || gop.max_inter_interval > max_inter {
      return Err(InvalidMaxInterInterval {
        actual: gop.max_inter_interval,
        max: max_inter,
      });
    }
    if gop.inter_interval == 0 || gop.inter_interval > gop.max_inter_interval {
      return Err(InvalidInterInterval {
        actual: gop.inter_interval,
        max: gop.max_inter_interval,
      });
    }

    for t in PictureType::ALL {
      let (min, max) = (rc.min_qp[t], rc.max_qp[t]);
      if min > max || max > MAX_QP {
        return Err(InvalidQpRange { pic_type: t, min, max, limit: MAX_QP });
      }
      if !(min..=max).contains(&rc.init_qp[t]) {
        return Err(InvalidInitQp { pic_type: t, actual: rc.init_qp[t], min, max });
      }
    }

    if rc.mode == RcMode::ConstQp {
      return Ok(());
    }

    if rc.bitrate == 0 {
      return Err(TargetBitrateNeeded);
    }
    for peak in rc.peak_bitrate() {
      if peak < rc.bitrate {
        return Err(PeakBelowAverage { actual: peak, min: rc.bitrate });
      }
    }
    if rc.buffer_delay == 0 {
      return Err(BufferDelayNeeded);
    }
    if rc.max_vbv_size == 0 {
      return Err(InvalidVbvSize(rc.max_vbv_size));
    }

    Ok(())
  }
}
