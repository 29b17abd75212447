// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::api::config::*;
use crate::api::util::*;
use crate::bit_alloc::{
  BitAllocator, ALLOC_PERIOD_CBR, ALLOC_PERIOD_VBR, I_TO_P_RATIO, K_Q,
  P_TO_B_RATIO,
};
use crate::buffer::cbr::CbrBuffer;
use crate::buffer::vbr_stream::StreamParams;
use crate::buffer::vbv::StorageVbv;
use crate::buffer::{BufferStatus, MAX_NUM_DRAIN_RATES};
use crate::est_sad::SadEstimator;
use crate::frame_time::{FrameTime, PulldownRate, TimeStamp};
use crate::gop::PictureScheduler;
use crate::mb_qp::MbQpModulator;
use crate::picture::{PerType, PictureDescriptor, PictureType};
use crate::rd_model::RdModel;
use crate::util::{mul_div, round_shift};

// QP of the other reference type, relative to this one, Q4.
const P_TO_I_RATIO: i32 = 13;

// Bounds of the frame to frame QP swing, Q4.
const DEV_Q: u32 = 4;
const HI_DEV_FCTR: i32 = 22;
const LO_DEV_FCTR: i32 = 12;

/// Buffer model simulated by a rate control mode.
#[derive(Debug, Clone)]
pub(crate) enum BufferModel {
  Unconstrained,
  Storage(StorageVbv),
  Cbr(CbrBuffer),
  Streaming { buffer: CbrBuffer, params: StreamParams },
}

/// A peak bitrate change waiting for the streaming buffer to drain.
#[derive(Debug, Clone, Copy)]
struct PendingPeak {
  frames_left: u32,
  peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
}

fn frames_in_delay(frame_rate: u32, buffer_delay: u32) -> u32 {
  mul_div(frame_rate as i64, buffer_delay as i64, 1_000_000).clamp(0, u32::MAX as i64)
    as u32
}

fn to_interval(n: u32) -> i32 {
  n.min(i32::MAX as u32) as i32
}

/// The rate control context.
///
/// Contains the whole state of one encode session. Every call mutates it in
/// place; nothing is allocated after construction.
#[derive(Debug, Clone)]
pub struct RateControl {
  pub(crate) mode: RcMode,
  pub(crate) mb_level_rc: bool,
  pub(crate) sched: PictureScheduler,
  pub(crate) bit_alloc: BitAllocator,
  pub(crate) rd_models: PerType<RdModel>,
  pub(crate) est_sad: SadEstimator,
  pub(crate) buffer: BufferModel,
  pub(crate) mb_qp: MbQpModulator,
  pub(crate) frame_time: FrameTime,
  pub(crate) time_stamp: TimeStamp,
  pub(crate) pulldown: PulldownRate,
  init_qp: PerType<u8>,
  prev_frame_qp: PerType<u8>,
  min_qp: PerType<u8>,
  max_qp: PerType<u8>,
  first_frame_coded: PerType<bool>,
  is_first_frame: bool,
  scene_change_detected: bool,
  qp_after_scene_change: u8,
  avg_bitrate_changed: PerType<bool>,
  pending_peak: Option<PendingPeak>,
  prev_frame_est_bits: i32,
  prev_ref_type: PictureType,
  buffer_delay: u32,
}

impl RateControl {
  /// Creates a context for the given configuration.
  ///
  /// Same as [`Config::new_context`].
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid.
  pub fn new(cfg: &Config) -> Result<Self, InvalidConfig> {
    cfg.new_context()
  }

  /// Builds the context from a configuration that passed validation.
  pub(crate) fn from_valid_config(cfg: &Config) -> Self {
    let rc = cfg.rate();
    let gop = cfg.gop();
    let mode = rc.mode;
    let frame_rate = rc.frame_rate;
    let src_frame_rate = rc.src_frame_rate();
    let peak_bitrate = match mode {
      RcMode::CbrLowDelay | RcMode::CbrNonLowDelay => {
        [rc.bitrate; MAX_NUM_DRAIN_RATES]
      }
      _ => rc.peak_bitrate(),
    };

    let sched = PictureScheduler::new(
      to_interval(gop.intra_interval),
      to_interval(gop.inter_interval),
      to_interval(gop.max_inter_interval),
      gop.closed,
    );
    let frame_time = FrameTime::new(src_frame_rate, frame_rate);

    let buffer = match mode {
      RcMode::VbrStorage | RcMode::VbrStorageDvd => BufferModel::Storage(
        StorageVbv::new(peak_bitrate[0], frame_rate, rc.max_vbv_size),
      ),
      RcMode::VbrStreaming => {
        let params = StreamParams::new(
          gop.intra_interval,
          frame_time.src_ticks(),
          frame_time.tgt_ticks(),
          frames_in_delay(frame_rate, rc.buffer_delay),
        );
        let (pics_in_delay, _) = params.pics_in_delay();
        let buffer = CbrBuffer::new(
          rc.buffer_delay,
          frame_rate,
          peak_bitrate,
          pics_in_delay,
          rc.max_vbv_size,
        );
        BufferModel::Streaming { buffer, params }
      }
      RcMode::CbrLowDelay | RcMode::CbrNonLowDelay => {
        BufferModel::Cbr(CbrBuffer::new(
          rc.buffer_delay,
          frame_rate,
          peak_bitrate,
          PerType::splat(0),
          rc.max_vbv_size,
        ))
      }
      RcMode::ConstQp => BufferModel::Unconstrained,
    };

    let period = if mode.is_vbr() { ALLOC_PERIOD_VBR } else { ALLOC_PERIOD_CBR };
    let bit_alloc = BitAllocator::new(
      &sched,
      period,
      rc.bitrate,
      frame_rate,
      peak_bitrate,
      rc.min_bitrate,
    );

    info!("rate control: {}", rc);
    info!("gop: {}", gop);

    RateControl {
      mode,
      mb_level_rc: rc.mb_level_rc,
      sched,
      bit_alloc,
      rd_models: PerType([RdModel::new(), RdModel::new(), RdModel::new()]),
      est_sad: SadEstimator::new(rc.use_est_intra_sad),
      buffer,
      mb_qp: MbQpModulator::new(),
      frame_time,
      time_stamp: TimeStamp::new(rc.max_frame_rate(), src_frame_rate),
      pulldown: PulldownRate::new(src_frame_rate),
      init_qp: rc.init_qp,
      prev_frame_qp: rc.init_qp,
      min_qp: rc.min_qp,
      max_qp: rc.max_qp,
      first_frame_coded: PerType::splat(false),
      is_first_frame: true,
      scene_change_detected: false,
      qp_after_scene_change: rc.init_qp[PictureType::I],
      avg_bitrate_changed: PerType::splat(false),
      pending_peak: None,
      prev_frame_est_bits: mul_div(rc.bitrate as i64, 1000, frame_rate as i64)
        .clamp(0, i32::MAX as i64) as i32,
      prev_ref_type: PictureType::I,
      buffer_delay: rc.buffer_delay,
    }
  }

  /// Registers a source picture, in display order.
  ///
  /// Pictures the frame rate decision skipped must not be registered.
  pub fn register_arrival(&mut self, id: i32) {
    self.sched.register_arrival(id);
  }

  /// Returns the next picture to encode.
  ///
  /// `Buffered` asks for more input before anything can be coded, and
  /// `Terminal` reports that a flushed stream is drained. Call once per
  /// coded picture.
  pub fn picture_type(&mut self) -> PictureDescriptor {
    self.sched.next_to_encode()
  }

  /// Decides whether the next source frame is skipped to reach the coded
  /// frame rate.
  ///
  /// Same as [`update_frame_rate_decision_with`] for a frame one interval
  /// after the previous one.
  ///
  /// [`update_frame_rate_decision_with`]: #method.update_frame_rate_decision_with
  pub fn update_frame_rate_decision(&mut self) -> bool {
    self.update_frame_rate_decision_with(1)
  }

  /// Decides whether the next source frame is skipped, given how many frame
  /// intervals its time stamp moved.
  ///
  /// Also advances the time code and, when the effective coded frame rate
  /// changes, re-plans the bit allocation for it.
  pub fn update_frame_rate_decision_with(&mut self, delta_time_stamp: i32) -> bool {
    let (skip, not_skipped_for_dts) = self.frame_time.should_skip(delta_time_stamp);
    if not_skipped_for_dts {
      trace!("skip cancelled to keep decode time stamps monotonic");
    }
    self.time_stamp.update();
    if self.pulldown.update(!skip) {
      let average = self.pulldown.average();
      if average != 0 {
        debug!("coded frame rate now {}", average);
        self.change_frame_rate_for_allocation(average);
      }
    }
    skip
  }

  // The model of `pic_type` can only be trusted once the types the texture
  //  split depends on have all been coded.
  fn models_ready(&self, pic_type: PictureType) -> bool {
    let coded = &self.first_frame_coded;
    let refs = coded[PictureType::I]
      && (coded[PictureType::P] || self.sched.intra_frame_interval() == 1);
    match pic_type {
      PictureType::B => refs && coded[PictureType::B],
      _ => refs,
    }
  }

  /// Returns the frame QP of the next picture of type `pic_type`.
  ///
  /// `max_bits_ceiling` caps the size of non intra pictures, for encoders
  /// that must fit a frame into a fixed slot.
  pub fn frame_qp(&mut self, pic_type: PictureType, max_bits_ceiling: i32) -> u8 {
    let qp = if self.mode == RcMode::ConstQp {
      self.init_qp[pic_type]
    } else if self.models_ready(pic_type) {
      self.estimate_frame_qp(pic_type, max_bits_ceiling)
    } else if self.scene_change_detected {
      self.qp_after_scene_change
    } else {
      self.prev_frame_qp[pic_type]
    };
    self.mb_qp.init_frame(qp);
    qp
  }

  fn estimate_frame_qp(&mut self, pic_type: PictureType, max_bits_ceiling: i32) -> u8 {
    if self.sched.forced_i_frame_in_current_frame() {
      self.bit_alloc.credit_forced_gop(&self.sched);
      self.sched.clear_forced_i_frame_in_current_frame();
    }

    let rd_coeffs =
      PerType(PictureType::ALL.map(|t| self.rd_models[t].coefficient()));
    let est_sads = PerType(PictureType::ALL.map(|t| self.est_sad.estimate(t)));
    let header_bits = self.bit_alloc.estimate_header_bits(pic_type);
    let mut texture_bits = self.bit_alloc.estimate_texture_bits(
      &self.sched,
      rd_coeffs,
      est_sads,
      pic_type,
    );
    let est_bits = texture_bits.saturating_add(header_bits);

    match &self.buffer {
      BufferModel::Storage(vbv) => {
        let max_bits = if self.mode == RcMode::VbrStorageDvd {
          let rem_bits = self.bit_alloc.remaining_bits_in_period(&self.sched);
          let rem_frames = self.sched.remaining_frames_in_gop().total();
          vbv.max_target_bits_dvd(rem_bits, rem_frames, pic_type)
        } else {
          vbv.max_target_bits()
        };
        if est_bits > max_bits {
          texture_bits = max_bits.saturating_sub(header_bits);
        }
      }
      BufferModel::Cbr(buffer) => {
        texture_bits =
          buffer.constrain_cbr(est_bits, pic_type).saturating_sub(header_bits);
      }
      BufferModel::Streaming { buffer, .. } => {
        texture_bits = buffer
          .constrain_vbr_streaming(est_bits, pic_type)
          .saturating_sub(header_bits);
      }
      BufferModel::Unconstrained => {}
    }

    texture_bits = texture_bits.max(0);
    self.prev_frame_est_bits = texture_bits.saturating_add(header_bits);

    if pic_type != PictureType::I {
      texture_bits = texture_bits.min(max_bits_ceiling.saturating_sub(header_bits));
    }

    let (min_qp, max_qp) = (self.min_qp[pic_type], self.max_qp[pic_type]);
    let mut qp = if texture_bits > 0 {
      self.rd_models[pic_type].estimate_qp(
        texture_bits,
        est_sads[pic_type],
        min_qp,
        max_qp,
      )
    } else {
      max_qp
    };

    if self.avg_bitrate_changed[pic_type] {
      self.avg_bitrate_changed[pic_type] = false;
    } else {
      qp = self.restrict_swing(qp, pic_type);
    }

    debug!(
      "{} frame: target {} + {} header bits, qp {}",
      pic_type, texture_bits, header_bits, qp
    );
    qp
  }

  // Keeps `qp` near the last reference QP, scaled to the type being coded.
  fn restrict_swing(&self, qp: u8, pic_type: PictureType) -> u8 {
    use PictureType::*;
    let prev = self.prev_frame_qp[self.prev_ref_type] as i32;
    let prev = match (self.prev_ref_type, pic_type) {
      (r, t) if r == t => prev,
      (_, I) => round_shift(P_TO_I_RATIO * prev, K_Q),
      (_, P) => round_shift(I_TO_P_RATIO * prev, K_Q),
      (P, B) => round_shift(P_TO_B_RATIO * prev, K_Q),
      (_, B) => round_shift(P_TO_B_RATIO * I_TO_P_RATIO * prev, 2 * K_Q),
    };
    let (min_qp, max_qp) =
      (self.min_qp[pic_type] as i32, self.max_qp[pic_type] as i32);
    let lo = round_shift(prev * LO_DEV_FCTR, DEV_Q).min(prev - 2).max(min_qp);
    let hi = round_shift(prev * HI_DEV_FCTR, DEV_Q).max(prev + 2).min(max_qp);
    (qp as i32).max(lo).min(hi).max(min_qp).min(max_qp) as u8
  }

  /// Returns `(model_qp, encode_qp)` for a macroblock of the given activity
  /// in the picture whose QP [`frame_qp`] last returned.
  ///
  /// Without macroblock level rate control both are the frame QP.
  ///
  /// [`frame_qp`]: #method.frame_qp
  pub fn mb_qp(&self, activity: i32, pic_type: PictureType) -> (u8, u8) {
    if !self.mb_level_rc {
      let qp = self.mb_qp.frame_qp();
      return (qp, qp);
    }
    let (model_qp, encode_qp) = self.mb_qp.mb_qp(activity);
    let encode_qp =
      encode_qp.max(self.min_qp[pic_type]).min(self.max_qp[pic_type]);
    (model_qp, encode_qp)
  }

  fn update_buffer(&mut self, pic_type: PictureType, total_bits: i32) {
    match &mut self.buffer {
      BufferModel::Storage(vbv) => vbv.update(total_bits),
      BufferModel::Cbr(buffer) => buffer.update(total_bits, pic_type),
      BufferModel::Streaming { buffer, params } => {
        // The buffer is sized for the window that started with this picture.
        let (pics_in_delay, _) = params.pics_in_delay();
        buffer.update(total_bits, pic_type);
        params.update(pic_type);
        buffer.update_pics_in_delay(pics_in_delay);

        match self.pending_peak {
          Some(PendingPeak { frames_left: 0, peak_bitrate }) => {
            buffer.change_bitrate(peak_bitrate);
            self.bit_alloc.change_peak_bitrate(peak_bitrate);
            self.pending_peak = None;
            info!(
              "peak bitrate now {}/{}",
              peak_bitrate[0], peak_bitrate[1]
            );
          }
          Some(ref mut pending) => pending.frames_left -= 1,
          None => {}
        }
      }
      BufferModel::Unconstrained => {}
    }
  }

  /// Updates the models with the statistics of the picture just coded.
  ///
  /// Returns the number of padding bits the encoder must append to keep the
  /// decoder buffer from underflowing, always 0 outside the constant bitrate
  /// modes.
  pub fn post_encode_update(
    &mut self, pic_type: PictureType, stats: &FrameStats,
  ) -> i32 {
    let mut pic_type = pic_type;
    // A cut inside a subgroup would strand the B pictures around it.
    let is_scene_change =
      stats.is_scene_change && self.sched.inter_frame_interval() == 1;

    self.sched.advance(pic_type);

    let mut stuff_bits = 0;
    if self.mode != RcMode::ConstQp {
      let mut sad = stats.frame_sad();
      let texture_bits = stats.frame_texture_bits();
      let avg_qp = stats
        .average_qp()
        .unwrap_or(self.prev_frame_qp[pic_type] as i32)
        .clamp(0, MAX_QP as i32) as u8;
      let mut intra_cost = stats.intra_cost.max(0) as u32;
      if self.mb_level_rc {
        let activity = stats.avg_activity.max(1) as u32;
        sad = sad.saturating_mul(activity);
        intra_cost = intra_cost.saturating_mul(activity);
      }

      let last_in_gop = self.sched.is_last_frame_in_gop();
      self.bit_alloc.update_consumed(
        &self.sched,
        stats.total_bits,
        stats.header_bits,
        pic_type,
        is_scene_change,
        last_in_gop,
      );
      if last_in_gop {
        if let BufferModel::Storage(vbv) = &self.buffer {
          self
            .bit_alloc
            .check_and_update(&self.sched, vbv.max_bits_per_tgt_frame());
        }
      }

      if let BufferModel::Cbr(buffer) = &self.buffer {
        stuff_bits = buffer.bits_to_stuff(stats.total_bits, pic_type);
      }
      self.update_buffer(pic_type, stats.total_bits.saturating_add(stuff_bits));

      if is_scene_change {
        pic_type = PictureType::I;
        let prev_i_sad = self.est_sad.estimate(PictureType::I) as i64;
        let avg = avg_qp as i64;
        let qp = if prev_i_sad == 0 {
          avg
        } else {
          mul_div(avg, sad as i64, prev_i_sad).clamp(avg / 2, 3 * avg / 2)
        };
        self.qp_after_scene_change = qp
          .max(self.min_qp[PictureType::I] as i64)
          .min(self.max_qp[PictureType::I] as i64) as u8;

        for model in self.rd_models.0.iter_mut() {
          model.reset();
        }
        self.est_sad.reset();
        self.first_frame_coded = PerType::splat(false);
        self.mb_qp.reset();
        self.scene_change_detected = true;
        self.prev_frame_qp[PictureType::I] = avg_qp;
        info!(
          "scene change: models reset, next I QP {}",
          self.qp_after_scene_change
        );
      } else {
        self.scene_change_detected = false;
        self.prev_frame_qp[pic_type] = avg_qp;
      }

      if texture_bits > 0 && sad != 0 {
        self.rd_models[pic_type].add_observation(
          texture_bits as u32,
          avg_qp,
          sad,
          0,
        );
        self.first_frame_coded[pic_type] = true;
      }
      if stats.avg_activity != 0 {
        self.mb_qp.update_average_activity(stats.avg_activity);
      }
      if sad != 0 {
        self.est_sad.update_actual(sad, pic_type);
        if intra_cost != 0 {
          self.est_sad.update_actual_for_intra(intra_cost);
        }
      }
      self.is_first_frame = false;
    }

    if pic_type.is_reference() {
      self.prev_ref_type = pic_type;
    }
    stuff_bits
  }

  /// Accounts for a picture the encoder dropped after [`picture_type`]
  /// handed it out.
  ///
  /// B pictures that referenced a dropped reference are rearranged so the
  /// last of them is coded as P.
  ///
  /// [`picture_type`]: #method.picture_type
  pub fn post_encode_skip(&mut self, pic_type: PictureType, total_bits: i32) {
    self.sched.skip_encoded(pic_type);
    self.sched.advance(pic_type);
    if self.mode != RcMode::ConstQp {
      self.update_buffer(pic_type, total_bits);
    }
  }

  /// Returns the state of the decoder buffer if the next picture had
  /// `total_bits` bits, with the bits that would still fit.
  pub fn buffer_status(
    &self, total_bits: i32, pic_type: PictureType,
  ) -> (BufferStatus, i32) {
    match &self.buffer {
      BufferModel::Storage(vbv) if self.mode == RcMode::VbrStorageDvd => {
        vbv.status(total_bits)
      }
      BufferModel::Storage(vbv) => (BufferStatus::Normal, vbv.max_size()),
      BufferModel::Cbr(buffer) | BufferModel::Streaming { buffer, .. } => {
        buffer.status(total_bits, pic_type)
      }
      BufferModel::Unconstrained => (BufferStatus::Normal, 0),
    }
  }

  /// Changes the target average bitrate.
  ///
  /// The next QP of every type skips the swing restriction so the
  /// controller can follow the new rate at once.
  pub fn change_bitrate(&mut self, bitrate: u32) {
    if bitrate == 0 || self.mode == RcMode::ConstQp {
      warn!("ignoring bitrate change to {} in {} mode", bitrate, self.mode);
      return;
    }
    let peak_bitrate = if self.mode.is_cbr() {
      [bitrate; MAX_NUM_DRAIN_RATES]
    } else {
      self.bit_alloc.peak_bitrate().map(|peak| peak.max(bitrate))
    };
    let frame_rate = self.bit_alloc.frame_rate();
    self.bit_alloc.change_remaining_bits(
      &self.sched,
      bitrate,
      frame_rate,
      peak_bitrate,
    );
    if let BufferModel::Cbr(buffer) = &mut self.buffer {
      buffer.change_bitrate(peak_bitrate);
    }
    if !self.is_first_frame {
      self.avg_bitrate_changed = PerType::splat(true);
    }
  }

  /// Changes the coded frame rate, in frames per 1000 seconds.
  pub fn change_frame_rate(&mut self, frame_rate: u32) {
    if frame_rate == 0 || frame_rate > MAX_FRAME_RATE {
      warn!("ignoring frame rate {} (max {})", frame_rate, MAX_FRAME_RATE);
      return;
    }
    self.frame_time.change_tgt_frame_rate(frame_rate);
    let fidp = frames_in_delay(frame_rate, self.buffer_delay);
    match &mut self.buffer {
      BufferModel::Storage(vbv) => vbv.change_frame_rate(frame_rate),
      BufferModel::Cbr(buffer) => buffer.change_frame_rate(frame_rate),
      BufferModel::Streaming { buffer, params } => {
        params.change_tgt_ticks(self.frame_time.tgt_ticks());
        params.change_src_ticks(self.frame_time.src_ticks());
        params.change_frames_in_delay(fidp);
        buffer.change_frame_rate(frame_rate);
        buffer.update_pics_in_delay(params.pics_in_delay().0);
      }
      BufferModel::Unconstrained => {}
    }
    if self.mode != RcMode::ConstQp {
      let bitrate = self.bit_alloc.bitrate();
      let peak_bitrate = self.bit_alloc.peak_bitrate();
      self.bit_alloc.change_remaining_bits(
        &self.sched,
        bitrate,
        frame_rate,
        peak_bitrate,
      );
    }
  }

  /// Re-plans the bit allocation for the frame rate actually coded after
  /// frame skipping. The simulated buffers keep their rate.
  pub fn change_frame_rate_for_allocation(&mut self, frame_rate: u32) {
    if frame_rate == 0 || self.mode == RcMode::ConstQp {
      return;
    }
    let peak_bitrate = self.bit_alloc.peak_bitrate();
    self.bit_alloc.change_frame_rate_for_allocation(
      &self.sched,
      frame_rate,
      peak_bitrate,
    );
    if let BufferModel::Storage(vbv) = &mut self.buffer {
      vbv.change_max_bits_per_target_frame(frame_rate);
    }
  }

  /// Changes the peak bitrates of the intra and inter drain.
  ///
  /// In the streaming mode the change takes effect after one buffering
  /// period once coding started; a second change in that window replaces
  /// the pending one and reports `BenignErr`. The constant bitrate and
  /// constant QP modes have no peak rate and report `Fail`.
  pub fn change_peak_bitrate(
    &mut self, peak_bitrate: [u32; MAX_NUM_DRAIN_RATES],
  ) -> PeakRateStatus {
    let bitrate = self.bit_alloc.bitrate();
    if peak_bitrate.iter().any(|&peak| peak < bitrate) {
      warn!(
        "ignoring peak bitrate {}/{} below average {}",
        peak_bitrate[0], peak_bitrate[1], bitrate
      );
      return PeakRateStatus::Fail;
    }
    match &mut self.buffer {
      BufferModel::Storage(vbv) => {
        vbv.change_bitrate(peak_bitrate[0]);
        self.bit_alloc.change_peak_bitrate(peak_bitrate);
        PeakRateStatus::Ok
      }
      BufferModel::Streaming { buffer, params } => {
        if self.is_first_frame {
          buffer.change_bitrate(peak_bitrate);
          self.bit_alloc.change_peak_bitrate(peak_bitrate);
          return PeakRateStatus::Ok;
        }
        let (status, frames_left) = match self.pending_peak {
          Some(pending) => (PeakRateStatus::BenignErr, pending.frames_left),
          None => (PeakRateStatus::Ok, params.frames_in_delay_prd()),
        };
        self.pending_peak = Some(PendingPeak { frames_left, peak_bitrate });
        status
      }
      BufferModel::Cbr(_) | BufferModel::Unconstrained => PeakRateStatus::Fail,
    }
  }

  /// Changes the intra interval from the next GOP.
  pub fn change_intra_interval(&mut self, intra_interval: u32) {
    self.sched.change_intra_interval(to_interval(intra_interval));
    if intra_interval == 0 {
      return;
    }
    if let BufferModel::Streaming { params, .. } = &mut self.buffer {
      params.change_intra_interval(intra_interval);
    }
  }

  /// Changes the inter interval from the next GOP longer than it.
  pub fn change_inter_interval(&mut self, inter_interval: u32) {
    self.sched.change_inter_interval(to_interval(inter_interval));
  }

  /// Changes the QP used before the models have data.
  pub fn change_init_qp(&mut self, init_qp: PerType<u8>) {
    for t in PictureType::ALL {
      let qp = init_qp[t].max(self.min_qp[t]).min(self.max_qp[t]);
      self.init_qp[t] = qp;
      self.prev_frame_qp[t] = qp;
    }
  }

  /// Changes the QP range of every picture type.
  pub fn change_min_max_qp(&mut self, min_qp: PerType<u8>, max_qp: PerType<u8>) {
    for t in PictureType::ALL {
      if min_qp[t] > max_qp[t] || max_qp[t] > MAX_QP {
        warn!("ignoring {} QP range {}..={}", t, min_qp[t], max_qp[t]);
        return;
      }
    }
    self.min_qp = min_qp;
    self.max_qp = max_qp;
  }

  /// Changes the buffer delay, in milliseconds.
  ///
  /// The storage buffer is sized by its own maximum and does not change.
  pub fn change_buffer_delay(&mut self, buffer_delay: u32) {
    if buffer_delay == 0 {
      warn!("ignoring buffer delay 0");
      return;
    }
    self.buffer_delay = buffer_delay;
    match &mut self.buffer {
      BufferModel::Cbr(buffer) => buffer.change_buffer_delay(buffer_delay),
      BufferModel::Streaming { buffer, params } => {
        let frame_rate = self.frame_time.tgt_frame_rate();
        params.change_frames_in_delay(frames_in_delay(frame_rate, buffer_delay));
        buffer.change_buffer_delay(buffer_delay);
        buffer.update_pics_in_delay(params.pics_in_delay().0);
      }
      BufferModel::Storage(_) | BufferModel::Unconstrained => {}
    }
  }

  /// Makes the next I slot the scheduler hands out start a new GOP.
  pub fn force_i_frame(&mut self) {
    self.sched.force_i_frame();
  }

  /// Signals the end of input. Keep calling [`picture_type`] until it
  /// returns `Terminal`.
  ///
  /// [`picture_type`]: #method.picture_type
  pub fn flush(&mut self) {
    self.sched.flush();
  }

  /// The rate control algorithm.
  pub fn mode(&self) -> RcMode {
    self.mode
  }

  /// The coded frame rate, in frames per 1000 seconds.
  pub fn frame_rate(&self) -> u32 {
    self.frame_time.tgt_frame_rate()
  }

  /// The target average bitrate.
  pub fn bitrate(&self) -> u32 {
    self.bit_alloc.bitrate()
  }

  /// The intra and inter drain rates.
  pub fn peak_bitrate(&self) -> [u32; MAX_NUM_DRAIN_RATES] {
    self.bit_alloc.peak_bitrate()
  }

  /// Pictures per GOP.
  pub fn intra_frame_interval(&self) -> u32 {
    self.sched.intra_frame_interval() as u32
  }

  /// Distance between reference pictures.
  pub fn inter_frame_interval(&self) -> u32 {
    self.sched.inter_frame_interval() as u32
  }

  /// The buffer delay, in milliseconds.
  pub fn buffer_delay(&self) -> u32 {
    self.buffer_delay
  }

  /// Size of the simulated buffer, in bits.
  pub fn vbv_size(&self) -> i32 {
    match &self.buffer {
      BufferModel::Storage(vbv) => vbv.max_size(),
      BufferModel::Cbr(buffer) | BufferModel::Streaming { buffer, .. } => {
        buffer.size()
      }
      BufferModel::Unconstrained => 0,
    }
  }

  /// Fullness of the simulated buffer, in bits.
  pub fn vbv_fullness(&self) -> i32 {
    match &self.buffer {
      BufferModel::Storage(vbv) => vbv.fullness(),
      BufferModel::Cbr(buffer) | BufferModel::Streaming { buffer, .. } => {
        buffer.fullness()
      }
      BufferModel::Unconstrained => 0,
    }
  }

  /// Fullness of the simulated buffer once a picture of `bits` bits is
  /// taken into account.
  pub fn vbv_fullness_with(&self, bits: u32) -> i32 {
    match &self.buffer {
      BufferModel::Storage(vbv) => vbv.fullness_with(bits),
      BufferModel::Cbr(buffer) | BufferModel::Streaming { buffer, .. } => {
        let bits = bits.min(i32::MAX as u32) as i32;
        buffer.fullness().saturating_add(bits)
      }
      BufferModel::Unconstrained => 0,
    }
  }

  /// Bits left in the current allocation period.
  pub fn remaining_bits_in_period(&mut self) -> i32 {
    self.bit_alloc.remaining_bits_in_period(&self.sched)
  }

  /// Nominal bits of one frame at the target bitrate.
  pub fn bits_per_frame(&self) -> i32 {
    self.bit_alloc.bits_per_frame()
  }

  /// Pictures left to code in the current GOP.
  pub fn remaining_frames_in_gop(&self) -> i32 {
    self.sched.remaining_frames_in_gop().total()
  }

  /// Display order of the next arrival within its GOP.
  pub fn sequence_number(&self) -> i32 {
    self.sched.display_order_no()
  }

  /// Size the last [`frame_qp`] aimed for, headers included.
  ///
  /// [`frame_qp`]: #method.frame_qp
  pub fn prev_frame_est_bits(&self) -> i32 {
    self.prev_frame_est_bits
  }

  /// Time code of the last source frame, as `(seconds, ticks)`.
  pub fn time_stamp(&self) -> (u32, u32) {
    self.time_stamp.get()
  }
}
