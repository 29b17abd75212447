// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! `ratectl` is the bitrate control engine of a block-based video encoder.
//!
//! Given a target bitrate, frame rate, GOP structure and buffer delay, it
//! decides frame by frame which picture type to code next, which quantizer to
//! use and whether a source frame should be skipped or padded, so that the
//! coded stream stays inside a leaky-bucket (VBV) model of the decoder.
//!
//! The encode pipeline drives it through [`RateControl`]:
//!
//! ```no_run
//! use ratectl::prelude::*;
//!
//! let cfg = Config::new().with_rate(
//!   RateControlConfig::new()
//!     .with_mode(RcMode::CbrNonLowDelay)
//!     .with_bitrate(2_000_000),
//! );
//! let mut rc = cfg.new_context().unwrap();
//!
//! for id in 0..60 {
//!   rc.register_arrival(id);
//!   let pic = rc.picture_type();
//!   if let Some(kind) = pic.picture_type() {
//!     let qp = rc.frame_qp(kind, i32::MAX);
//!     // ... encode the picture with `qp` and gather `FrameStats` ...
//!     # let stats = FrameStats::default();
//!     rc.post_encode_update(kind, &stats);
//!   }
//! }
//! ```

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::unreadable_literal)]
#![warn(clippy::expl_impl_clone_on_copy)]
#![warn(clippy::linkedlist)]
#![warn(clippy::map_flatten)]
#![warn(clippy::mem_forget)]
#![warn(clippy::mut_mut)]
#![warn(clippy::mutex_integer)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_continue)]
#![warn(clippy::path_buf_push_overwrite)]
#![warn(clippy::range_plus_one)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;

pub(crate) mod util;

mod api;
mod bit_alloc;
mod buffer;
mod error_bits;
mod est_sad;
mod frame_time;
mod gop;
mod mb_qp;
mod picture;
mod rd_model;

pub use crate::api::*;
pub use crate::picture::*;

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::picture::*;
}

/// Low-level building blocks of the controller.
///
/// These are the sub-modules the [`RateControl`] façade composes. They are
/// exposed for callers that run a custom frame loop or want to test a single
/// model in isolation.
pub mod components {
  pub use crate::bit_alloc::{BitAllocator, ALLOC_PERIOD_CBR, ALLOC_PERIOD_VBR};
  pub use crate::buffer::cbr::CbrBuffer;
  pub use crate::buffer::vbr_stream::StreamParams;
  pub use crate::buffer::vbv::StorageVbv;
  pub use crate::error_bits::ErrorBits;
  pub use crate::est_sad::SadEstimator;
  pub use crate::frame_time::{FrameTime, PulldownRate, TimeStamp};
  pub use crate::gop::{
    distribution, GopDistribution, PictureScheduler, MAX_INTER_FRAME_INTERVAL,
  };
  pub use crate::mb_qp::MbQpModulator;
  pub use crate::rd_model::{RdModel, MAX_FRAMES_MODELLED};
}
