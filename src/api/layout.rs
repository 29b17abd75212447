// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::api::config::{Config, InvalidConfig, RcMode};
use crate::api::context::RateControl;
use crate::bit_alloc::BitAllocator;
use crate::buffer::cbr::CbrBuffer;
use crate::buffer::vbr_stream::StreamParams;
use crate::buffer::vbv::StorageVbv;
use crate::est_sad::SadEstimator;
use crate::frame_time::{FrameTime, PulldownRate, TimeStamp};
use crate::gop::PictureScheduler;
use crate::mb_qp::MbQpModulator;
use crate::rd_model::RdModel;

use std::mem::{align_of, size_of};

/// Most blocks a layout describes.
pub const MAX_MEM_BLOCKS: usize = 12;

/// Lifetime class of a state block.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum MemRegion {
  /// Kept for the whole session.
  Persistent,
  /// Rebuilt from the persistent state whenever it is needed.
  Scratch,
}

/// One block of controller state.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MemBlock {
  /// Bytes needed.
  pub size: usize,
  /// Required alignment, a power of two.
  pub alignment: usize,
  /// Lifetime class.
  pub region: MemRegion,
}

impl MemBlock {
  fn of<T>(region: MemRegion) -> Self {
    MemBlock { size: size_of::<T>(), alignment: align_of::<T>(), region }
  }
}

/// A mismatch between the blocks a [`Layout`] described and the ones
/// supplied to [`Layout::bind`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum BindError {
  /// A different number of blocks was supplied.
  #[error("got {actual} memory blocks (expected {expected})")]
  CountMismatch {
    /// The actual value.
    actual: usize,
    /// The expected value.
    expected: usize,
  },
  /// A block is smaller than described.
  #[error("memory block {index} has {actual} bytes (expected >= {min})")]
  TooSmall {
    /// Position of the block.
    index: usize,
    /// The actual value.
    actual: usize,
    /// The minimal supported value.
    min: usize,
  },
  /// A block has a weaker alignment than described.
  #[error("memory block {index} is aligned to {actual} (expected {required})")]
  Misaligned {
    /// Position of the block.
    index: usize,
    /// The actual value.
    actual: usize,
    /// The required alignment.
    required: usize,
  },
  /// A block belongs to a different region than described.
  #[error("memory block {index} is {actual:?} (expected {expected:?})")]
  WrongRegion {
    /// Position of the block.
    index: usize,
    /// The actual value.
    actual: MemRegion,
    /// The expected value.
    expected: MemRegion,
  },
}

/// The state blocks of a validated configuration.
///
/// Obtained with [`Layout::new`]; the only way to a [`RateControl`] goes
/// through it, so nothing can be bound before it is laid out.
///
/// # Examples
///
/// ```
/// use ratectl::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cfg = Config::new()
///   .with_rate(RateControlConfig::new().with_bitrate(1_000_000));
/// let layout = Layout::new(&cfg)?;
/// let blocks = layout.blocks().to_vec();
/// let rc = layout.bind(&blocks)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
  config: Config,
  blocks: ArrayVec<MemBlock, MAX_MEM_BLOCKS>,
}

impl Layout {
  /// Validates `cfg` and describes the state it needs.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid.
  pub fn new(cfg: &Config) -> Result<Self, InvalidConfig> {
    cfg.validate()?;

    use MemRegion::*;
    let mode = cfg.rate().mode();
    let mut blocks = ArrayVec::new();
    blocks.push(MemBlock::of::<PictureScheduler>(Persistent));
    blocks.push(MemBlock::of::<BitAllocator>(Persistent));
    blocks.push(MemBlock::of::<[RdModel; 3]>(Persistent));
    blocks.push(MemBlock::of::<SadEstimator>(Persistent));
    match mode {
      RcMode::VbrStorage | RcMode::VbrStorageDvd => {
        blocks.push(MemBlock::of::<StorageVbv>(Persistent));
      }
      RcMode::VbrStreaming => {
        blocks.push(MemBlock::of::<CbrBuffer>(Persistent));
        blocks.push(MemBlock::of::<StreamParams>(Persistent));
      }
      RcMode::CbrLowDelay | RcMode::CbrNonLowDelay => {
        blocks.push(MemBlock::of::<CbrBuffer>(Persistent));
      }
      RcMode::ConstQp => {}
    }
    blocks.push(MemBlock::of::<MbQpModulator>(Scratch));
    blocks.push(MemBlock::of::<FrameTime>(Persistent));
    blocks.push(MemBlock::of::<TimeStamp>(Persistent));
    blocks.push(MemBlock::of::<PulldownRate>(Persistent));

    Ok(Layout { config: *cfg, blocks })
  }

  /// One block per sub-module state.
  pub fn blocks(&self) -> &[MemBlock] {
    &self.blocks
  }

  /// Checks that `blocks` satisfies this layout and builds the context.
  ///
  /// # Errors
  ///
  /// Returns `BindError` for the first block that does not match.
  pub fn bind(self, blocks: &[MemBlock]) -> Result<RateControl, BindError> {
    if blocks.len() != self.blocks.len() {
      return Err(BindError::CountMismatch {
        actual: blocks.len(),
        expected: self.blocks.len(),
      });
    }
    for (index, (got, want)) in blocks.iter().zip(self.blocks.iter()).enumerate()
    {
      if got.size < want.size {
        return Err(BindError::TooSmall {
          index,
          actual: got.size,
          min: want.size,
        });
      }
      if got.alignment < want.alignment || got.alignment % want.alignment != 0
      {
        return Err(BindError::Misaligned {
          index,
          actual: got.alignment,
          required: want.alignment,
        });
      }
      if got.region != want.region {
        return Err(BindError::WrongRegion {
          index,
          actual: got.region,
          expected: want.region,
        });
      }
    }
    Ok(self.into_context())
  }

  /// Builds the context on the blocks this layout described itself.
  pub fn into_context(self) -> RateControl {
    debug!("binding {} memory blocks", self.blocks.len());
    RateControl::from_valid_config(&self.config)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::config::RateControlConfig;
  use pretty_assertions::assert_eq;

  fn layout(mode: RcMode) -> Layout {
    let cfg = Config::new().with_rate(
      RateControlConfig::new().with_mode(mode).with_bitrate(1_000_000),
    );
    Layout::new(&cfg).unwrap()
  }

  #[test]
  fn block_count_follows_mode() {
    assert_eq!(layout(RcMode::ConstQp).blocks().len(), 8);
    assert_eq!(layout(RcMode::VbrStorage).blocks().len(), 9);
    assert_eq!(layout(RcMode::CbrNonLowDelay).blocks().len(), 9);
    assert_eq!(layout(RcMode::VbrStreaming).blocks().len(), 10);
  }

  #[test]
  fn blocks_are_sane() {
    for block in layout(RcMode::VbrStreaming).blocks() {
      assert!(block.size > 0);
      assert!(block.alignment.is_power_of_two());
    }
  }

  #[test]
  fn invalid_config_has_no_layout() {
    let cfg = Config::new();
    assert_eq!(Layout::new(&cfg).unwrap_err(), InvalidConfig::TargetBitrateNeeded);
  }
}
