// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::context::BufferModel;
use crate::prelude::*;

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;

const MBS: i32 = 396;
const HEADER_BITS: i32 = 2000;

// Synthetic encoder: a picture of SAD `sad` costs `coeff * sad / qp` bits.
#[derive(Clone, Copy)]
struct Content {
  i_sad: u32,
  p_sad: u32,
  coeff: u32,
}

const CONTENT: Content = Content { i_sad: 300_000, p_sad: 100_000, coeff: 40 };

impl Content {
  fn stats(&self, t: PictureType, qp: u8) -> FrameStats {
    let sad = if t == PictureType::I { self.i_sad } else { self.p_sad };
    stats(t, qp, sad, self.coeff, self.i_sad)
  }
}

fn stats(
  t: PictureType, qp: u8, sad: u32, coeff: u32, intra_cost: u32,
) -> FrameStats {
  let texture =
    (coeff as u64 * sad as u64 / qp.max(1) as u64).min(i32::MAX as u64) as i32;
  let mb =
    (if t == PictureType::I { MbType::Intra } else { MbType::Inter }) as usize;
  let mut s = FrameStats {
    total_bits: texture + HEADER_BITS,
    header_bits: HEADER_BITS,
    intra_cost: intra_cost as i32,
    ..Default::default()
  };
  s.sad[mb] = sad;
  s.texture_bits[mb] = texture;
  s.qp_sum[mb] = qp as i32 * MBS;
  s.mb_count[mb] = MBS;
  s
}

fn setup_config(
  mode: RcMode, bitrate: u32, intra: u32, inter: u32, closed: bool,
) -> Config {
  Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_mode(mode)
        .with_bitrate(bitrate)
        .with_frame_rate(25000),
    )
    .with_gop(
      GopConfig::new()
        .with_intra_interval(intra)
        .with_inter_interval(inter)
        .with_closed(closed),
    )
}

fn setup(mode: RcMode, bitrate: u32, intra: u32, inter: u32) -> RateControl {
  setup_config(mode, bitrate, intra, inter, true).new_context().unwrap()
}

struct Coded {
  desc: PictureDescriptor,
  qp: u8,
  bits: i32,
}

fn drain(rc: &mut RateControl, content: &Content, out: &mut Vec<Coded>) {
  loop {
    let desc = rc.picture_type();
    let Some(t) = desc.picture_type() else {
      break;
    };
    let qp = rc.frame_qp(t, i32::MAX);
    let stats = content.stats(t, qp);
    rc.post_encode_update(t, &stats);
    out.push(Coded { desc, qp, bits: stats.total_bits });
  }
}

fn run(rc: &mut RateControl, content: &Content, n: i32) -> Vec<Coded> {
  let mut out = Vec::new();
  for id in 0..n {
    rc.register_arrival(id);
    drain(rc, content, &mut out);
  }
  out
}

#[interpolate_test(ipp_closed, 12, 1, true)]
#[interpolate_test(ibbp_closed, 12, 3, true)]
#[interpolate_test(ibbp_open, 12, 3, false)]
#[interpolate_test(ibp_odd_gop, 7, 2, true)]
#[interpolate_test(ip_closed_gop_of_subgroup, 2, 2, true)]
#[interpolate_test(ipb_closed_gop_of_subgroup, 3, 3, true)]
#[interpolate_test(ipbb_closed_gop_of_subgroup, 4, 4, true)]
fn every_picture_is_coded_once(intra: u32, inter: u32, closed: bool) {
  let mut rc = setup_config(RcMode::CbrNonLowDelay, 1_000_000, intra, inter, closed)
    .new_context()
    .unwrap();
  let mut out = run(&mut rc, &CONTENT, 40);
  rc.flush();
  drain(&mut rc, &CONTENT, &mut out);
  assert_eq!(rc.picture_type().kind, PictureKind::Terminal);

  let mut ids: Vec<i32> = out.iter().map(|c| c.desc.id).collect();
  ids.sort_unstable();
  assert_eq!(ids, (0..40).collect::<Vec<_>>());
  assert_eq!(out[0].desc.picture_type(), Some(PictureType::I));
  for c in &out {
    assert!((1..=MAX_QP).contains(&c.qp));
  }
}

#[test]
fn initial_qp_until_models_have_data() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  rc.register_arrival(0);
  let t = rc.picture_type().picture_type().unwrap();
  assert_eq!(t, PictureType::I);
  assert_eq!(rc.frame_qp(t, i32::MAX), 40);
  rc.post_encode_update(t, &CONTENT.stats(t, 40));

  rc.register_arrival(1);
  let t = rc.picture_type().picture_type().unwrap();
  assert_eq!(t, PictureType::P);
  assert_eq!(rc.frame_qp(t, i32::MAX), 42);
  assert_eq!(rc.remaining_frames_in_gop(), 24);
}

fn mean_qp(out: &[Coded]) -> f64 {
  out.iter().map(|c| c.qp as f64).sum::<f64>() / out.len() as f64
}

#[interpolate_test(cbr, "cbr")]
#[interpolate_test(storage, "storage")]
#[interpolate_test(streaming, "streaming")]
fn lower_bitrate_raises_qp(mode: &str) {
  let mode: RcMode = mode.parse().unwrap();
  let mut low = setup(mode, 600_000, 25, 1);
  let mut high = setup(mode, 2_000_000, 25, 1);
  let low_out = run(&mut low, &CONTENT, 100);
  let high_out = run(&mut high, &CONTENT, 100);

  assert!(mean_qp(&low_out[50..]) > mean_qp(&high_out[50..]));
  let bits = |out: &[Coded]| out.iter().map(|c| c.bits as i64).sum::<i64>();
  assert!(bits(&low_out) < bits(&high_out));
}

#[test]
fn qp_follows_rate_after_warm_up() {
  let mut rc = setup(RcMode::VbrStorage, 1_000_000, 25, 1);
  let out = run(&mut rc, &CONTENT, 100);
  // Two GOPs after the warm up should land near the target rate.
  let bits: i64 = out[50..].iter().map(|c| c.bits as i64).sum();
  let target = 50 * rc.bits_per_frame() as i64;
  assert!(bits > target / 2 && bits < target * 2, "{} vs {}", bits, target);
}

#[test]
fn scene_change_resets_models() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  let _ = run(&mut rc, &CONTENT, 5);
  assert_eq!(rc.rd_models[PictureType::P].num_frames(), 4);

  rc.register_arrival(5);
  let t = rc.picture_type().picture_type().unwrap();
  assert_eq!(t, PictureType::P);
  let _ = rc.frame_qp(t, i32::MAX);
  let mut cut = stats(t, 60, 200_000, CONTENT.coeff, CONTENT.i_sad);
  cut.is_scene_change = true;
  rc.post_encode_update(t, &cut);

  assert_eq!(rc.rd_models[PictureType::P].num_frames(), 0);
  assert_eq!(rc.rd_models[PictureType::B].num_frames(), 0);
  assert_eq!(rc.rd_models[PictureType::I].num_frames(), 1);
  assert_eq!(rc.est_sad.estimate(PictureType::P), 0);
  assert_eq!(rc.est_sad.interval_history(), (0, 0));

  // 60 * 200000 / 300000, inside [60 / 2, 60 * 3 / 2].
  rc.register_arrival(6);
  let t = rc.picture_type().picture_type().unwrap();
  assert_eq!(rc.frame_qp(t, i32::MAX), 40);
  rc.post_encode_update(t, &CONTENT.stats(t, 40));
  assert_eq!(rc.rd_models[PictureType::P].num_frames(), 1);
}

#[test]
fn scene_change_ignored_with_b_pictures() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 24, 2);
  let _ = run(&mut rc, &CONTENT, 9);
  let before = rc.rd_models[PictureType::P].num_frames();
  assert!(before > 0);

  rc.register_arrival(9);
  rc.register_arrival(10);
  let t = rc.picture_type().picture_type().unwrap();
  let qp = rc.frame_qp(t, i32::MAX);
  let mut cut = CONTENT.stats(t, qp);
  cut.is_scene_change = true;
  rc.post_encode_update(t, &cut);
  assert!(rc.rd_models[PictureType::P].num_frames() >= before);
}

#[test]
fn cbr_stuffs_small_frames() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  assert_eq!(rc.vbv_size(), 1_000_000);
  rc.register_arrival(0);
  let t = rc.picture_type().picture_type().unwrap();
  let _ = rc.frame_qp(t, i32::MAX);
  let tiny = FrameStats { total_bits: 1000, ..Default::default() };
  assert_eq!(rc.post_encode_update(t, &tiny), 39_000);
  assert_eq!(rc.vbv_fullness(), 0);
}

#[test]
fn vbr_never_stuffs() {
  for mode in [RcMode::VbrStorage, RcMode::VbrStreaming, RcMode::ConstQp] {
    let mut rc = setup(mode, 1_000_000, 25, 1);
    rc.register_arrival(0);
    let t = rc.picture_type().picture_type().unwrap();
    let _ = rc.frame_qp(t, i32::MAX);
    let tiny = FrameStats { total_bits: 1000, ..Default::default() };
    assert_eq!(rc.post_encode_update(t, &tiny), 0);
  }
}

#[test]
fn cbr_buffer_status_is_decoder_view() {
  let rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  assert_eq!(rc.buffer_status(10_000_000, PictureType::P).0, BufferStatus::Underflow);
  assert_eq!(rc.buffer_status(0, PictureType::P).0, BufferStatus::Overflow);
  assert_eq!(rc.buffer_status(40_000, PictureType::P).0, BufferStatus::Normal);
}

#[test]
fn storage_buffer_starts_full() {
  let rc = setup(RcMode::VbrStorage, 1_000_000, 25, 1);
  assert_eq!(rc.vbv_size(), 20_000_000);
  assert_eq!(rc.vbv_fullness(), 20_000_000);
  assert_eq!(
    rc.buffer_status(100_000, PictureType::I),
    (BufferStatus::Normal, 20_000_000)
  );
}

#[test]
fn const_qp_uses_initial_qp() {
  let mut rc = setup(RcMode::ConstQp, 0, 12, 3);
  let out = run(&mut rc, &CONTENT, 30);
  for c in &out {
    let expected = match c.desc.picture_type().unwrap() {
      PictureType::I => 40,
      PictureType::P => 42,
      PictureType::B => 44,
    };
    assert_eq!(c.qp, expected);
  }
  assert_eq!(rc.buffer_status(1 << 30, PictureType::I), (BufferStatus::Normal, 0));
  assert_eq!(rc.change_peak_bitrate([1, 1]), PeakRateStatus::Fail);
}

#[test]
fn streaming_peak_change_waits_one_buffer_period() {
  let mut rc = Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_mode(RcMode::VbrStreaming)
        .with_bitrate(1_000_000)
        .with_peak_bitrate([2_000_000, 2_000_000])
        .with_frame_rate(25000),
    )
    .new_context()
    .unwrap();

  assert_eq!(rc.change_peak_bitrate([3_000_000; 2]), PeakRateStatus::Ok);
  assert_eq!(rc.peak_bitrate(), [3_000_000; 2]);
  assert_eq!(rc.change_peak_bitrate([500_000; 2]), PeakRateStatus::Fail);

  let _ = run(&mut rc, &CONTENT, 1);
  assert_eq!(rc.change_peak_bitrate([4_000_000; 2]), PeakRateStatus::Ok);
  assert_eq!(rc.change_peak_bitrate([5_000_000; 2]), PeakRateStatus::BenignErr);
  assert_eq!(rc.peak_bitrate(), [3_000_000; 2]);

  let mut frames = Vec::new();
  for id in 1..11 {
    rc.register_arrival(id);
    drain(&mut rc, &CONTENT, &mut frames);
  }
  assert_eq!(rc.peak_bitrate(), [3_000_000; 2]);
  for id in 11..40 {
    rc.register_arrival(id);
    drain(&mut rc, &CONTENT, &mut frames);
  }
  assert_eq!(rc.peak_bitrate(), [5_000_000; 2]);
}

#[test]
fn storage_peak_change_is_immediate() {
  let mut rc = setup(RcMode::VbrStorage, 1_000_000, 25, 1);
  let _ = run(&mut rc, &CONTENT, 3);
  assert_eq!(rc.change_peak_bitrate([1_500_000; 2]), PeakRateStatus::Ok);
  assert_eq!(rc.peak_bitrate(), [1_500_000; 2]);
  let mut cbr = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  assert_eq!(cbr.change_peak_bitrate([1_500_000; 2]), PeakRateStatus::Fail);
}

#[test]
fn control_plane_changes() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  assert_eq!(rc.bits_per_frame(), 40_000);

  rc.change_bitrate(2_000_000);
  assert_eq!(rc.bitrate(), 2_000_000);
  assert_eq!(rc.bits_per_frame(), 80_000);
  assert_eq!(rc.vbv_size(), 2_000_000);

  rc.change_frame_rate(50000);
  assert_eq!(rc.frame_rate(), 50000);
  assert_eq!(rc.bits_per_frame(), 40_000);

  rc.change_buffer_delay(500);
  assert_eq!(rc.buffer_delay(), 500);
  assert_eq!(rc.vbv_size(), 1_000_000);

  rc.change_frame_rate(0);
  assert_eq!(rc.frame_rate(), 50000);
}

#[test]
fn qp_bounds_are_respected() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 100_000, 25, 1);
  rc.change_min_max_qp(PerType::splat(20), PerType::splat(60));
  rc.change_init_qp(PerType::splat(100));
  let out = run(&mut rc, &CONTENT, 60);
  for c in &out {
    assert!((20..=60).contains(&c.qp), "qp {}", c.qp);
  }
  // An inverted range is ignored.
  rc.change_min_max_qp(PerType::splat(50), PerType::splat(10));
  rc.register_arrival(60);
  let t = rc.picture_type().picture_type().unwrap();
  assert!(rc.frame_qp(t, i32::MAX) <= 60);
}

#[test]
fn frame_ceiling_limits_inter_pictures() {
  let mut free = setup(RcMode::VbrStorage, 1_000_000, 25, 1);
  let mut capped = setup(RcMode::VbrStorage, 1_000_000, 25, 1);
  let _ = run(&mut free, &CONTENT, 10);
  let _ = run(&mut capped, &CONTENT, 10);
  free.register_arrival(10);
  capped.register_arrival(10);
  let t = free.picture_type().picture_type().unwrap();
  let _ = capped.picture_type();
  assert_eq!(t, PictureType::P);
  let free_qp = free.frame_qp(t, i32::MAX);
  let capped_qp = capped.frame_qp(t, HEADER_BITS);
  assert!(capped_qp >= free_qp);
}

#[test]
fn mb_qp_follows_activity() {
  let mut rc = Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_bitrate(1_000_000)
        .with_frame_rate(25000)
        .with_mb_level_rc(true),
    )
    .new_context()
    .unwrap();
  rc.register_arrival(0);
  let t = rc.picture_type().picture_type().unwrap();
  let qp = rc.frame_qp(t, i32::MAX);
  assert_eq!(rc.mb_qp(1234, t), (qp, qp));
  let mut s = CONTENT.stats(t, qp);
  s.avg_activity = 1000;
  rc.post_encode_update(t, &s);

  rc.register_arrival(1);
  let t = rc.picture_type().picture_type().unwrap();
  assert_eq!(rc.frame_qp(t, i32::MAX), 42);
  assert_eq!(rc.mb_qp(4000, t), (63, 63));
  assert_eq!(rc.mb_qp(250, t), (28, 28));
}

#[test]
fn mb_qp_is_frame_qp_without_mb_rc() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  rc.register_arrival(0);
  let t = rc.picture_type().picture_type().unwrap();
  let qp = rc.frame_qp(t, i32::MAX);
  assert_eq!(rc.mb_qp(0, t), (qp, qp));
  assert_eq!(rc.mb_qp(100_000, t), (qp, qp));
}

#[test]
fn skips_source_frames_above_coded_rate() {
  let mut rc = Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_bitrate(1_000_000)
        .with_frame_rate(25000)
        .with_src_frame_rate(50000),
    )
    .new_context()
    .unwrap();
  let skipped: Vec<bool> =
    (0..6).map(|_| rc.update_frame_rate_decision()).collect();
  assert_eq!(skipped, [false, true, false, true, false, true]);
}

// Coding every other frame doubles what each coded frame may drain from the
//  storage buffer, so a GOP spent exactly on budget banks nothing.
#[test]
fn skipping_raises_the_storage_drain_ceiling() {
  let mut rc = Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_mode(RcMode::VbrStorage)
        .with_bitrate(1_000_000)
        .with_peak_bitrate([1_000_000; 2])
        .with_frame_rate(25000),
    )
    .with_gop(GopConfig::new().with_intra_interval(10).with_inter_interval(1))
    .new_context()
    .unwrap();
  rc.change_frame_rate_for_allocation(12500);
  assert_eq!(rc.bit_alloc.bits_per_frame(), 80_000);

  for id in 0..10 {
    rc.register_arrival(id);
    let t = rc.picture_type().picture_type().unwrap();
    let qp = rc.frame_qp(t, i32::MAX);
    let mut s = CONTENT.stats(t, qp);
    s.total_bits = 80_000;
    rc.post_encode_update(t, &s);
  }
  assert!(rc.sched.is_last_frame_in_gop());
  assert_eq!(rc.bit_alloc.saved_bits(), 0);
  let gops = rc.bit_alloc.num_gops_in_period();
  assert_eq!(
    rc.bit_alloc.remaining_bits_in_period(&rc.sched),
    10 * 80_000 * gops
  );
}

// The buffer keeps the picture counts of the window that began with the
//  picture just coded, while the window itself moves on.
#[test]
fn streaming_buffer_sized_for_window_of_coded_picture() {
  let mut rc = Config::new()
    .with_rate(
      RateControlConfig::new()
        .with_mode(RcMode::VbrStreaming)
        .with_bitrate(1_000_000)
        .with_peak_bitrate([4_000_000, 2_000_000])
        .with_frame_rate(25000),
    )
    .with_gop(GopConfig::new().with_intra_interval(10).with_inter_interval(1))
    .new_context()
    .unwrap();
  let window_pics = |rc: &RateControl| match &rc.buffer {
    BufferModel::Streaming { buffer, params } => {
      (buffer.pics_in_delay(), params.pics_in_delay().0)
    }
    _ => unreachable!(),
  };

  let (_, at_i) = window_pics(&rc);
  assert_eq!(at_i, PerType::new(3, 22, 0));
  let _ = run(&mut rc, &CONTENT, 1);
  let (sized_for, next) = window_pics(&rc);
  assert_eq!(sized_for, at_i);
  assert_eq!(next, PerType::new(2, 23, 0));

  rc.register_arrival(1);
  drain(&mut rc, &CONTENT, &mut Vec::new());
  assert_eq!(window_pics(&rc).0, next);
}

#[test]
fn time_stamps_advance_per_source_frame() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 25, 1);
  for _ in 0..26 {
    assert!(!rc.update_frame_rate_decision());
  }
  assert_eq!(rc.time_stamp(), (1, 1000));
}

#[test]
fn skipped_reference_promotes_b() {
  let mut rc = setup(RcMode::CbrNonLowDelay, 1_000_000, 30, 3);
  let mut out = run(&mut rc, &CONTENT, 4);
  out.clear();
  for id in 4..7 {
    rc.register_arrival(id);
  }
  let p = rc.picture_type();
  assert_eq!((p.id, p.picture_type()), (6, Some(PictureType::P)));
  rc.post_encode_skip(PictureType::P, 0);
  drain(&mut rc, &CONTENT, &mut out);
  let got: Vec<_> =
    out.iter().map(|c| (c.desc.id, c.desc.picture_type())).collect();
  assert_eq!(got, [(5, Some(PictureType::P)), (4, Some(PictureType::B))]);
}

#[test]
fn bind_checks_blocks() {
  let cfg = setup_config(RcMode::VbrStreaming, 1_000_000, 25, 1, true);
  let layout = Layout::new(&cfg).unwrap();
  let blocks = layout.blocks().to_vec();
  assert!(layout.clone().bind(&blocks).is_ok());

  assert_eq!(
    layout.clone().bind(&blocks[1..]).unwrap_err(),
    BindError::CountMismatch { actual: blocks.len() - 1, expected: blocks.len() }
  );

  let mut small = blocks.clone();
  small[0].size -= 1;
  assert_eq!(
    layout.clone().bind(&small).unwrap_err(),
    BindError::TooSmall { index: 0, actual: blocks[0].size - 1, min: blocks[0].size }
  );

  let mut loose = blocks.clone();
  loose[1].alignment = 1;
  assert_eq!(
    layout.clone().bind(&loose).unwrap_err(),
    BindError::Misaligned { index: 1, actual: 1, required: blocks[1].alignment }
  );

  let mut bigger = blocks.clone();
  for b in bigger.iter_mut() {
    b.size += 64;
    b.alignment *= 2;
  }
  assert!(layout.clone().bind(&bigger).is_ok());

  let mut moved = blocks;
  moved[0].region = MemRegion::Scratch;
  assert!(matches!(
    layout.bind(&moved).unwrap_err(),
    BindError::WrongRegion { index: 0, .. }
  ));
}

#[interpolate_test(cbr, "cbr")]
#[interpolate_test(cbr_ld, "cbr-ld")]
#[interpolate_test(storage, "storage")]
#[interpolate_test(dvd, "dvd")]
#[interpolate_test(streaming, "streaming")]
fn random_content_stays_in_range(mode: &str) {
  use rand::{Rng, SeedableRng};
  let mode: RcMode = mode.parse().unwrap();
  let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
  let mut rc = setup_config(mode, 800_000, 15, 1, true).new_context().unwrap();

  let mut coded = 0;
  for id in 0..200 {
    rc.register_arrival(id);
    while let Some(t) = rc.picture_type().picture_type() {
      let qp = rc.frame_qp(t, i32::MAX);
      assert!((1..=MAX_QP).contains(&qp), "qp {}", qp);
      let p_sad = rng.gen_range(10_000..400_000);
      let sad = if t == PictureType::I { p_sad * 3 } else { p_sad };
      let mut s = stats(t, qp, sad, rng.gen_range(10..80), p_sad * 3);
      s.is_scene_change = rng.gen_ratio(1, 20);
      let stuff = rc.post_encode_update(t, &s);
      assert!(stuff >= 0);
      if !mode.is_cbr() {
        assert_eq!(stuff, 0);
      }
      coded += 1;
    }
  }
  assert_eq!(coded, 200);
}
