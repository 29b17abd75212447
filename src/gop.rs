// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Display order to encode order conversion.

use crate::picture::{PerType, PictureDescriptor, PictureKind, PictureType};

/// Largest supported distance between reference pictures.
pub const MAX_INTER_FRAME_INTERVAL: i32 = 10;

const STACK_SLOTS: usize = MAX_INTER_FRAME_INTERVAL as usize + 2;

/// Steady state picture counts of one GOP.
#[derive(Debug, Default, Eq, PartialEq, Clone, Copy)]
pub struct GopDistribution {
  /// Pictures of each type in the GOP.
  pub frames: PerType<i32>,
  /// B pictures in the trailing subgroup that is shorter than the others.
  pub b_in_incomplete_subgop: i32,
  /// A closed GOP whose last subgroup has no B pictures ends with two P
  /// pictures in a row.
  pub extra_p: bool,
}

/// Splits `intra` pictures into I, P and B for a reference distance of
/// `inter`.
pub fn distribution(intra: i32, inter: i32, closed: bool) -> GopDistribution {
  let inter = inter.max(1);
  if intra <= 1 {
    return GopDistribution {
      frames: PerType::new(1, 0, 0),
      b_in_incomplete_subgop: 0,
      extra_p: false,
    };
  }
  let (p, extra_p) = if closed {
    ((intra - 2) / inter + 1, (intra - 2) % inter == 0)
  } else {
    ((intra - 1) / inter, false)
  };
  let b = intra - 1 - p;
  GopDistribution {
    frames: PerType::new(1, p, b),
    b_in_incomplete_subgop: b - (inter - 1) * ((intra - 1) / inter),
    extra_p,
  }
}

/// Assigns picture types to pictures arriving in display order and hands them
/// back in encode order.
///
/// Arrivals are written into a small ring of slots laid out in encode order:
/// references advance one cursor and B pictures another, each wrapping at
/// `max_inter + 1`.
#[derive(Debug, Clone)]
pub struct PictureScheduler {
  intra_frame_interval: i32,
  inter_frame_interval: i32,
  max_inter_frame_interval: i32,
  is_gop_closed: bool,

  stack: [Option<PictureDescriptor>; STACK_SLOTS],
  stack_count: usize,
  ref_pic_idx: usize,
  b_pic_idx: usize,
  prev_b_pic_idx: usize,
  prev_pic: Option<PictureDescriptor>,
  previous_pic_type: PictureType,
  flushed: bool,

  // Position of the next arrival in the GOP and in the current subgroup.
  buf_pic_no: i32,
  pic_disp_order_no: i32,
  p_count_in_gop: i32,
  b_count_in_gop: i32,
  b_count_in_subgop: i32,
  is_first_gop: bool,

  b_in_incomp_subgop: i32,
  extra_p: bool,
  // The same for a GOP in which the inter interval changed part way.
  b_in_incomp_subgop_mix_gop: i32,
  extra_p_mix_gop: bool,

  frames_in_gop: PerType<i32>,
  frames_in_cur_gop: PerType<i32>,
  rem_frames_in_gop: PerType<i32>,

  pending_intra: Option<i32>,
  pending_inter: Option<i32>,

  last_frame_in_gop: bool,
  first_gop_encoded: bool,
  force_i_frame: bool,
  forced_i_frame_cur_frame: bool,
  mod_temp_ref_cnt: i32,
  frames_in_forced_gop: i32,
  prev_intra_frame_interval: i32,
}

impl PictureScheduler {
  pub fn new(
    intra_frame_interval: i32, inter_frame_interval: i32,
    max_inter_frame_interval: i32, is_gop_closed: bool,
  ) -> Self {
    let max_inter = max_inter_frame_interval.clamp(1, MAX_INTER_FRAME_INTERVAL);
    let inter = inter_frame_interval.clamp(1, max_inter);
    let intra = intra_frame_interval.max(1);
    let dist = distribution(intra, inter, is_gop_closed);
    PictureScheduler {
      intra_frame_interval: intra,
      inter_frame_interval: inter,
      max_inter_frame_interval: max_inter,
      is_gop_closed,
      stack: [None; STACK_SLOTS],
      stack_count: 0,
      ref_pic_idx: 0,
      // Leaves room for the leading I and P pictures.
      b_pic_idx: 2,
      prev_b_pic_idx: 2,
      prev_pic: None,
      previous_pic_type: PictureType::I,
      flushed: false,
      buf_pic_no: 0,
      pic_disp_order_no: 0,
      p_count_in_gop: 0,
      b_count_in_gop: 0,
      b_count_in_subgop: 0,
      is_first_gop: true,
      b_in_incomp_subgop: dist.b_in_incomplete_subgop,
      extra_p: dist.extra_p,
      b_in_incomp_subgop_mix_gop: dist.b_in_incomplete_subgop,
      extra_p_mix_gop: dist.extra_p,
      frames_in_gop: dist.frames,
      frames_in_cur_gop: dist.frames,
      rem_frames_in_gop: dist.frames,
      pending_intra: None,
      pending_inter: None,
      last_frame_in_gop: false,
      first_gop_encoded: false,
      force_i_frame: false,
      forced_i_frame_cur_frame: false,
      mod_temp_ref_cnt: 0,
      frames_in_forced_gop: 0,
      prev_intra_frame_interval: intra,
    }
  }

  #[inline]
  fn wrap(&self, idx: usize) -> usize {
    idx % (self.max_inter_frame_interval as usize + 1)
  }

  fn next_arrival_is_b(&self, inter: i32) -> bool {
    self.buf_pic_no % inter != 0
      && !(self.is_gop_closed
        && self.b_count_in_gop == self.frames_in_cur_gop[PictureType::B])
  }

  fn start_new_gop(&mut self) {
    self.pic_disp_order_no = 0;
    self.buf_pic_no = 0;
    self.is_first_gop = false;
    self.extra_p_mix_gop = self.extra_p;
    if self.is_gop_closed {
      self.b_in_incomp_subgop_mix_gop = self.b_in_incomp_subgop;
    }
    self.frames_in_forced_gop = self.b_count_in_gop + self.p_count_in_gop + 1;
    self.frames_in_cur_gop = self.frames_in_gop;
    self.rem_frames_in_gop = self.frames_in_cur_gop;
  }

  // A forced I starts a new GOP at the first point where the current
  //  subgroup is complete.
  fn place_forced_gop_start(&mut self) {
    let intra = self.intra_frame_interval;
    let inter = self.inter_frame_interval;
    let behaves_closed = intra % inter == 1 || self.is_gop_closed;

    let cur = if self.next_arrival_is_b(inter) {
      PictureType::B
    } else if self.pic_disp_order_no == 0 {
      PictureType::I
    } else {
      PictureType::P
    };
    let subgop_complete = if intra % inter == 0 {
      cur == PictureType::P
    } else {
      self.b_count_in_subgop == self.b_in_incomp_subgop
    };

    if cur == PictureType::I {
      self.force_i_frame = false;
    } else if inter == 1 {
      self.start_new_gop();
    } else if !behaves_closed && subgop_complete {
      self.start_new_gop();
      if self.b_count_in_subgop != 0 {
        self.b_pic_idx = self.wrap(self.b_pic_idx + 1);
      }
    } else if behaves_closed
      && self.previous_pic_type == PictureType::P
      && cur != PictureType::P
    {
      self.start_new_gop();
      self.b_pic_idx = self.wrap(self.b_pic_idx + 1);
    } else {
      return;
    }
    debug!("forced GOP start at display order {}", self.pic_disp_order_no);
  }

  // B pictures of the first subgroup sit right after its P, which itself
  //  follows the I unless the I has not arrived yet.
  fn realign_b_slots(&mut self, disp: i32) {
    if self.inter_frame_interval > 1 {
      let gap = if disp == 0 { 2 } else { 1 };
      self.b_pic_idx = self.wrap(self.ref_pic_idx + gap);
    }
  }

  // Interval changes only take effect right after the I of a GOP, where the
  //  slots of the new layout can be placed without moving any picture.
  fn apply_pending_changes(&mut self) {
    let disp = self.pic_disp_order_no;
    if let Some(new_intra) = self.pending_intra {
      if disp == 1 || self.intra_frame_interval == 1 {
        let was_all_intra = self.intra_frame_interval == 1;
        self.update_distribution(new_intra, self.inter_frame_interval);
        self.pending_intra = None;
        if new_intra == 1 {
          self.pic_disp_order_no = 0;
          self.buf_pic_no = 0;
        }
        // An all intra GOP leaves no B pictures to code after the next I.
        if was_all_intra && !self.is_gop_closed && !self.is_first_gop {
          self.b_in_incomp_subgop_mix_gop = 0;
        }
        self.realign_b_slots(disp);
        info!("intra interval is now {}", self.intra_frame_interval);
      }
    }

    if let Some(new_inter) = self.pending_inter {
      // The first subgroup with the new interval must fit inside the GOP.
      if self.pic_disp_order_no == 1 && new_inter < self.intra_frame_interval {
        self.update_distribution(self.intra_frame_interval, new_inter);
        self.pending_inter = None;
        self.realign_b_slots(1);
        info!("inter interval is now {}", self.inter_frame_interval);
      }
    }
  }

  fn update_distribution(&mut self, intra: i32, inter: i32) {
    let intra = if intra <= 0 { self.intra_frame_interval } else { intra };
    let inter = if inter < 1 || inter > self.max_inter_frame_interval {
      self.inter_frame_interval
    } else {
      inter
    };
    let closed = self.is_gop_closed;
    let old_cur = self.frames_in_cur_gop;

    let dist = distribution(intra, inter, closed);
    self.frames_in_gop = dist.frames;
    self.frames_in_cur_gop = dist.frames;

    // Only when encoding has caught up with this GOP do the remaining counts
    //  follow the new layout.
    let lag = self.max_inter_frame_interval
      - 1
      - if closed { 0 } else { self.b_in_incomp_subgop_mix_gop };
    if self.pic_disp_order_no >= lag {
      for t in PictureType::ALL {
        self.rem_frames_in_gop[t] += self.frames_in_cur_gop[t] - old_cur[t];
      }
    }

    self.buf_pic_no = if self.pic_disp_order_no == 0 { 0 } else { 1 };
    self.b_count_in_subgop = 0;
    self.inter_frame_interval = inter;
    self.intra_frame_interval = intra;
    self.b_in_incomp_subgop = dist.b_in_incomplete_subgop;
    self.extra_p = dist.extra_p;
    self.b_in_incomp_subgop_mix_gop = dist.b_in_incomplete_subgop;
    self.extra_p_mix_gop = dist.extra_p;
  }

  /// Adds the next picture in display order.
  pub fn register_arrival(&mut self, id: i32) {
    if self.force_i_frame {
      self.place_forced_gop_start();
    }
    self.apply_pending_changes();

    let closed = self.is_gop_closed;
    let inter = self.inter_frame_interval;
    let intra = self.intra_frame_interval;
    let b_in_incomp = self.b_in_incomp_subgop_mix_gop;
    let p_in_gop = self.frames_in_cur_gop[PictureType::P];
    let b_in_gop = self.frames_in_cur_gop[PictureType::B];
    let num_b_in_subgop = inter - 1;
    let disp = self.pic_disp_order_no;
    self.prev_b_pic_idx = self.b_pic_idx;

    if self.next_arrival_is_b(inter) {
      let desc = PictureDescriptor {
        id,
        display_order: disp,
        kind: PictureKind::Coded(PictureType::B),
      };
      let slot = self.b_pic_idx;
      self.stack[slot] = Some(desc);
      self.prev_pic = Some(desc);
      self.previous_pic_type = PictureType::B;
      self.b_count_in_gop += 1;
      self.b_count_in_subgop += 1;
      let last_b_in_gop = self.b_count_in_gop == b_in_gop;

      let step = if !closed {
        if self.b_count_in_subgop < num_b_in_subgop && !last_b_in_gop {
          1
        } else {
          let step = if last_b_in_gop {
            // Either I alone or I and P sit between this and the next B.
            self.b_count_in_gop = 0;
            2 + (b_in_incomp == 0) as usize
          } else {
            2
          };
          self.b_count_in_subgop = 0;
          step
        }
      } else if last_b_in_gop {
        self.b_count_in_subgop = 0;
        // P, I and P normally follow the last B of a closed GOP.
        3 + (b_in_incomp == 0 && p_in_gop > 1 && disp != p_in_gop + b_in_gop - 1)
          as usize
      } else if self.b_count_in_subgop < num_b_in_subgop {
        1
      } else {
        self.b_count_in_subgop = 0;
        2
      };
      self.b_pic_idx = self.wrap(self.b_pic_idx + step);
      trace!("B {} (display {}) -> slot {}", id, disp, slot);
    } else if disp == 0 {
      let desc = PictureDescriptor {
        id,
        display_order: disp,
        kind: PictureKind::Coded(PictureType::I),
      };
      let slot = self.ref_pic_idx;
      self.stack[slot] = Some(desc);
      self.prev_pic = Some(desc);
      self.previous_pic_type = PictureType::I;
      let step = if !closed && !self.is_first_gop {
        // The trailing B pictures of the previous GOP follow this I.
        self.b_in_incomp_subgop_mix_gop = self.b_in_incomp_subgop;
        if p_in_gop <= 1 && b_in_incomp == 0 {
          1
        } else {
          b_in_incomp as usize + 1
        }
      } else {
        1
      };
      self.ref_pic_idx = self.wrap(self.ref_pic_idx + step);
      self.b_count_in_gop = 0;
      self.p_count_in_gop = 0;
      self.b_count_in_subgop = 0;
      trace!("I {} (display {}) -> slot {}", id, disp, slot);
    } else {
      let desc = PictureDescriptor {
        id,
        display_order: disp,
        kind: PictureKind::Coded(PictureType::P),
      };
      let slot = self.ref_pic_idx;
      self.stack[slot] = Some(desc);
      self.prev_pic = Some(desc);
      self.previous_pic_type = PictureType::P;
      self.p_count_in_gop += 1;
      self.prev_intra_frame_interval = intra;
      let last_p = closed && self.p_count_in_gop == p_in_gop;
      let step = if last_p
        && self.p_count_in_gop > 1
        && (b_in_incomp != 0 || self.extra_p_mix_gop)
      {
        b_in_incomp as usize + 1
      } else if last_p && self.p_count_in_gop == 1 {
        // A lone P is coded ahead of every B of its GOP.
        b_in_gop as usize + 1
      } else {
        inter as usize
      };
      self.ref_pic_idx = self.wrap(self.ref_pic_idx + step);
      trace!("P {} (display {}) -> slot {}", id, disp, slot);
    }

    self.pic_disp_order_no += 1;
    self.buf_pic_no += 1;

    if self.pic_disp_order_no == p_in_gop + b_in_gop + 1 {
      self.pic_disp_order_no = 0;
      self.buf_pic_no = 0;
      self.is_first_gop = false;
      self.extra_p_mix_gop = self.extra_p;
      if closed {
        self.b_in_incomp_subgop_mix_gop = self.b_in_incomp_subgop;
      }
      self.frames_in_cur_gop = self.frames_in_gop;
    }
  }

  /// The picture in the current encode slot.
  ///
  /// Call once per coded picture: handing out a forced I and the temporal
  /// reference rewrite of open GOPs both update state.
  pub fn next_to_encode(&mut self) -> PictureDescriptor {
    let mut desc = match self.stack[self.stack_count] {
      Some(desc) => desc,
      None if self.flushed => return PictureDescriptor::terminal(),
      None => return PictureDescriptor::buffered(),
    };

    if self.force_i_frame && desc.picture_type() == Some(PictureType::I) {
      self.forced_i_frame_cur_frame = true;
      self.force_i_frame = false;
      self.mod_temp_ref_cnt = self.b_in_incomp_subgop + 1;
      self.first_gop_encoded = true;
    }

    // The trailing B pictures of an open GOP are coded after the next I, so
    //  their display order is counted from that I.
    if !self.is_gop_closed && self.first_gop_encoded {
      let shifted = desc.display_order + self.b_in_incomp_subgop;
      if self.mod_temp_ref_cnt == 0 {
        if self.prev_intra_frame_interval > 0 {
          desc.display_order = shifted % self.prev_intra_frame_interval;
        }
      } else {
        if self.frames_in_forced_gop > 0 {
          desc.display_order = shifted % self.frames_in_forced_gop;
        }
        self.mod_temp_ref_cnt -= 1;
      }
    }
    desc
  }

  /// Moves past the picture just coded.
  pub fn advance(&mut self, encoded: PictureType) {
    self.stack[self.stack_count] = None;
    self.stack_count = self.wrap(self.stack_count + 1);
    self.rem_frames_in_gop[encoded] -= 1;

    self.last_frame_in_gop = false;
    if self.rem_frames_in_gop.0.iter().all(|&n| n <= 0) {
      self.rem_frames_in_gop = self.frames_in_cur_gop;
      self.last_frame_in_gop = true;
      self.first_gop_encoded = true;
    }
  }

  /// Repairs the stack after the current reference picture was dropped.
  ///
  /// The B pictures that predicted from it lose their forward reference, so
  /// the last of them becomes a P coded first and the others shift down one
  /// slot. Call before [`advance`](Self::advance).
  pub fn skip_encoded(&mut self, encoded: PictureType) {
    let max_inter = self.max_inter_frame_interval as usize;
    let cur = self.stack_count;
    let first_b = self.wrap(cur + 1);
    if !encoded.is_reference() || first_b == self.ref_pic_idx {
      return;
    }
    let last_b =
      if self.ref_pic_idx == 0 { max_inter } else { self.ref_pic_idx - 1 };
    let Some(last) = self.stack[last_b] else {
      return;
    };

    let mut idx = last_b;
    while idx != cur && first_b != last_b {
      idx = if idx == 0 { max_inter } else { idx - 1 };
      let next = self.wrap(idx + 1);
      self.stack[next] = self.stack[idx];
    }
    self.stack[first_b] =
      Some(PictureDescriptor { kind: PictureKind::Coded(PictureType::P), ..last });

    if self.rem_frames_in_gop[PictureType::B] > 0 {
      self.rem_frames_in_gop[PictureType::B] -= 1;
      self.rem_frames_in_gop[PictureType::P] += 1;
    }
  }

  /// Marks the end of input. A trailing B picture is recoded as P, since its
  /// forward reference will never arrive.
  pub fn flush(&mut self) {
    self.flushed = true;
    match self.prev_pic {
      Some(prev) if prev.picture_type() == Some(PictureType::B) => {
        self.stack[self.ref_pic_idx] = Some(PictureDescriptor {
          kind: PictureKind::Coded(PictureType::P),
          ..prev
        });
        self.stack[self.prev_b_pic_idx] = None;
      }
      _ => {
        self.stack[self.ref_pic_idx] = None;
        if self.inter_frame_interval != 1 {
          self.stack[self.b_pic_idx] = None;
        }
      }
    }
  }

  pub fn force_i_frame(&mut self) {
    self.force_i_frame = true;
  }

  /// Requests a new intra interval. It applies from the picture after an I,
  /// so a GOP in progress keeps its layout unless only its I is placed.
  pub fn change_intra_interval(&mut self, intra: i32) {
    if intra <= 0 {
      warn!("ignoring intra interval {}", intra);
      return;
    }
    self.pending_intra = Some(intra);
  }

  /// Requests a new inter interval. Like intra changes it applies from the
  /// picture after an I, in the first GOP whose intra interval exceeds it.
  pub fn change_inter_interval(&mut self, inter: i32) {
    if inter < 1 || inter > self.max_inter_frame_interval {
      warn!(
        "ignoring inter interval {} (max {})",
        inter, self.max_inter_frame_interval
      );
      return;
    }
    self.pending_inter = Some(inter);
  }

  pub fn intra_frame_interval(&self) -> i32 {
    self.intra_frame_interval
  }

  pub fn inter_frame_interval(&self) -> i32 {
    self.inter_frame_interval
  }

  pub fn max_inter_frame_interval(&self) -> i32 {
    self.max_inter_frame_interval
  }

  pub fn is_gop_closed(&self) -> bool {
    self.is_gop_closed
  }

  pub fn remaining_frames_in_gop(&self) -> PerType<i32> {
    self.rem_frames_in_gop
  }

  pub fn frames_in_gop(&self) -> PerType<i32> {
    self.frames_in_cur_gop
  }

  pub fn is_last_frame_in_gop(&self) -> bool {
    self.last_frame_in_gop
  }

  pub fn is_first_gop_encoded(&self) -> bool {
    self.first_gop_encoded
  }

  pub fn forced_i_frame_in_current_frame(&self) -> bool {
    self.forced_i_frame_cur_frame
  }

  pub fn clear_forced_i_frame_in_current_frame(&mut self) {
    self.forced_i_frame_cur_frame = false;
  }

  /// Pictures that the GOP cut short by the last forced I contained.
  pub fn frames_in_forced_gop(&self) -> i32 {
    self.frames_in_forced_gop
  }

  /// Display order of the next arrival within its GOP.
  pub fn display_order_no(&self) -> i32 {
    self.pic_disp_order_no
  }
}
