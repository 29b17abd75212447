// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Coding type of a picture.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PictureType {
  /// Intra coded picture.
  I = 0,
  /// Forward predicted picture.
  P = 1,
  /// Bidirectionally predicted picture.
  B = 2,
}

/// The number of picture types for which per-type state is tracked.
pub const PICTURE_TYPES: usize = 3;

impl PictureType {
  /// All picture types, in index order.
  pub const ALL: [PictureType; PICTURE_TYPES] =
    [PictureType::I, PictureType::P, PictureType::B];

  /// Returns whether other pictures may predict from this one.
  #[inline]
  pub const fn is_reference(self) -> bool {
    !matches!(self, PictureType::B)
  }

  /// Index of the drain rate (peak bitrate) that applies to this type.
  ///
  /// Intra pictures drain at the first rate, everything else at the second.
  #[inline]
  pub(crate) const fn drain_index(self) -> usize {
    match self {
      PictureType::I => 0,
      PictureType::P | PictureType::B => 1,
    }
  }
}

impl fmt::Display for PictureType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::PictureType::*;
    match self {
      I => write!(f, "I"),
      P => write!(f, "P"),
      B => write!(f, "B"),
    }
  }
}

/// A value held once per [`PictureType`].
///
/// Indexing is exhaustive over the enum, so there is no way to address an
/// out-of-range picture type.
#[derive(Debug, Default, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PerType<T>(pub [T; PICTURE_TYPES]);

impl<T: Copy> PerType<T> {
  /// Builds a value with the same element for every picture type.
  pub const fn splat(v: T) -> Self {
    PerType([v; PICTURE_TYPES])
  }

  /// Builds a value from explicit I, P and B elements.
  pub const fn new(i: T, p: T, b: T) -> Self {
    PerType([i, p, b])
  }

  /// Applies `f` to every element.
  pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PerType<U> {
    PerType(self.0.map(f))
  }

  /// Iterates over `(type, value)` pairs in index order.
  pub fn iter(&self) -> impl Iterator<Item = (PictureType, T)> + '_ {
    PictureType::ALL.iter().map(move |&t| (t, self[t]))
  }
}

impl PerType<i32> {
  /// Sum over all picture types.
  pub fn total(&self) -> i32 {
    self.0.iter().sum()
  }
}

impl<T> Index<PictureType> for PerType<T> {
  type Output = T;
  #[inline]
  fn index(&self, t: PictureType) -> &T {
    &self.0[t as usize]
  }
}

impl<T> IndexMut<PictureType> for PerType<T> {
  #[inline]
  fn index_mut(&mut self, t: PictureType) -> &mut T {
    &mut self.0[t as usize]
  }
}

/// What the picture scheduler hands out for the next encode slot.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PictureKind {
  /// A picture that should be coded with the given type.
  Coded(PictureType),
  /// The picture for this slot has not arrived yet; feed more input.
  Buffered,
  /// The stream has been flushed and every buffered picture was handed out.
  Terminal,
}

/// A picture in encode order.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PictureDescriptor {
  /// Caller-assigned identifier of the source picture.
  pub id: i32,
  /// Position of the picture in display order within its GOP.
  pub display_order: i32,
  /// Coding decision for the picture.
  pub kind: PictureKind,
}

impl PictureDescriptor {
  pub(crate) const fn buffered() -> Self {
    PictureDescriptor { id: -1, display_order: -1, kind: PictureKind::Buffered }
  }

  pub(crate) const fn terminal() -> Self {
    PictureDescriptor { id: -1, display_order: -1, kind: PictureKind::Terminal }
  }

  /// The coding type, if this descriptor names a picture to code.
  #[inline]
  pub const fn picture_type(&self) -> Option<PictureType> {
    match self.kind {
      PictureKind::Coded(t) => Some(t),
      PictureKind::Buffered | PictureKind::Terminal => None,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn per_type_indexing() {
    let mut v = PerType::new(1, 10, 19);
    assert_eq!(v[PictureType::P], 10);
    v[PictureType::B] -= 1;
    assert_eq!(v.total(), 29);
    let pairs: Vec<_> = v.iter().collect();
    assert_eq!(
      pairs,
      vec![(PictureType::I, 1), (PictureType::P, 10), (PictureType::B, 18)]
    );
  }

  #[test]
  fn drain_index_groups_inter_types() {
    assert_eq!(PictureType::I.drain_index(), 0);
    assert_eq!(PictureType::P.drain_index(), 1);
    assert_eq!(PictureType::B.drain_index(), 1);
  }
}
