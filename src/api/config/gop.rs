// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt;

/// Group of pictures configuration
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct GopConfig {
  /// Pictures from one I picture to the next.
  pub intra_interval: u32,
  /// Distance between reference pictures; `inter_interval - 1` B pictures
  /// sit between two references.
  pub inter_interval: u32,
  /// Largest inter interval the session may switch to. Sizes the reorder
  /// buffer.
  pub max_inter_interval: u32,
  /// Whether B pictures at the end of a GOP predict only from the past.
  pub closed: bool,
}

impl Default for GopConfig {
  fn default() -> Self {
    GopConfig {
      intra_interval: 30,
      inter_interval: 1,
      max_inter_interval: 1,
      closed: true,
    }
  }
}

impl GopConfig {
  /// Create a default GOP configuration: one I picture every 30, no B
  /// pictures.
  pub fn new() -> Self {
    Default::default()
  }

  /// Set the intra interval
  pub const fn with_intra_interval(mut self, intra_interval: u32) -> Self {
    self.intra_interval = intra_interval;
    self
  }

  /// Set the inter interval, raising the maximum to match when needed
  pub const fn with_inter_interval(mut self, inter_interval: u32) -> Self {
    self.inter_interval = inter_interval;
    if self.max_inter_interval < inter_interval {
      self.max_inter_interval = inter_interval;
    }
    self
  }

  /// Set the largest inter interval
  pub const fn with_max_inter_interval(mut self, max_inter_interval: u32) -> Self {
    self.max_inter_interval = max_inter_interval;
    self
  }

  /// Set whether GOPs are closed
  pub const fn with_closed(mut self, closed: bool) -> Self {
    self.closed = closed;
    self
  }
}

impl fmt::Display for GopConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    write!(
      f,
      "keyint={} inter={} max_inter={} closed_gop={}",
      self.intra_interval,
      self.inter_interval,
      self.max_inter_interval,
      self.closed
    )
  }
}
