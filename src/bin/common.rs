// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::error::*;
use clap::{App, Arg, ArgMatches};
use ratectl::prelude::*;

pub struct CliOptions {
  pub config: Config,
  pub frames: u32,
  pub trace: Trace,
  pub quiet: bool,
}

pub fn parse_cli() -> Result<CliOptions, CliError> {
  let matches = App::new("rcsim")
    .version(env!("CARGO_PKG_VERSION"))
    .about("Runs the rate controller against a synthetic encoder")
    .arg(
      Arg::with_name("MODE")
        .help("Rate control mode")
        .long("mode")
        .possible_values(&RcMode::VARIANTS)
        .default_value("cbr")
        .case_insensitive(true),
    )
    .arg(
      Arg::with_name("BITRATE")
        .help("Target bitrate (bits/s)")
        .short("b")
        .long("bitrate")
        .takes_value(true)
        .default_value("1000000"),
    )
    .arg(
      Arg::with_name("PEAK")
        .help("Peak bitrate (bits/s), either one value or intra,inter")
        .long("peak")
        .takes_value(true),
    )
    .arg(
      Arg::with_name("FPS")
        .help("Coded frame rate")
        .long("fps")
        .takes_value(true)
        .default_value("30"),
    )
    .arg(
      Arg::with_name("SRC_FPS")
        .help("Source frame rate [default: coded frame rate]")
        .long("src-fps")
        .takes_value(true),
    )
    .arg(
      Arg::with_name("KEYFRAME_INTERVAL")
        .help("Pictures between two I pictures")
        .short("I")
        .long("keyint")
        .takes_value(true)
        .default_value("30"),
    )
    .arg(
      Arg::with_name("INTER_INTERVAL")
        .help("Distance between reference pictures (1 means no B pictures)")
        .long("inter")
        .takes_value(true)
        .default_value("1"),
    )
    .arg(
      Arg::with_name("OPEN_GOP")
        .help("Let B pictures at the end of a GOP reference the next I picture")
        .long("open-gop"),
    )
    .arg(
      Arg::with_name("DELAY")
        .help("Buffer delay (ms)")
        .long("delay")
        .takes_value(true)
        .default_value("1000"),
    )
    .arg(
      Arg::with_name("VBV_SIZE")
        .help("Largest buffer size (bits)")
        .long("vbv-size")
        .takes_value(true)
        .default_value("20000000"),
    )
    .arg(
      Arg::with_name("LIMIT")
        .help("Number of source frames to simulate")
        .short("l")
        .long("frames")
        .takes_value(true)
        .default_value("300"),
    )
    .arg(
      Arg::with_name("SCENE_LEN")
        .help("Frames between scene changes (0 for a single scene)")
        .long("scene-len")
        .takes_value(true)
        .default_value("0"),
    )
    .arg(
      Arg::with_name("MB_RC")
        .help("Modulate the QP of every macroblock by its activity")
        .long("mb-rc"),
    )
    .arg(
      Arg::with_name("QUIET")
        .help("Only print the summary")
        .short("q")
        .long("quiet"),
    )
    .get_matches();

  parse_config(&matches)
}

fn parse_u32(matches: &ArgMatches, name: &str) -> Result<Option<u32>, CliError> {
  matches
    .value_of(name)
    .map(|v| v.trim().parse().map_err(|e: std::num::ParseIntError| e.context(name)))
    .transpose()
}

fn parse_fps(matches: &ArgMatches, name: &str) -> Result<Option<u32>, CliError> {
  let fps = matches
    .value_of(name)
    .map(|v| v.trim().parse::<f64>().map_err(|e| e.context(name)))
    .transpose()?;
  // Frames per 1000 seconds. Out of range values are reported by the
  // configuration check.
  Ok(fps.map(|f| (f * 1000.).round().max(0.).min(u32::MAX as f64) as u32))
}

fn parse_peak(matches: &ArgMatches) -> Result<Option<[u32; 2]>, CliError> {
  let Some(v) = matches.value_of("PEAK") else {
    return Ok(None);
  };
  let rates = v
    .split(',')
    .map(|r| r.trim().parse::<u32>().map_err(|e| e.context("PEAK")))
    .collect::<Result<Vec<_>, _>>()?;
  match rates[..] {
    [r] => Ok(Some([r, r])),
    [i, p] => Ok(Some([i, p])),
    _ => Err(CliError::new("--peak takes one or two bitrates")),
  }
}

fn required(v: Option<u32>, name: &str) -> Result<u32, CliError> {
  v.ok_or_else(|| CliError::new(&format!("missing value for {}", name)))
}

fn parse_config(matches: &ArgMatches) -> Result<CliOptions, CliError> {
  let mode: RcMode = matches
    .value_of("MODE")
    .unwrap_or("cbr")
    .parse()
    .map_err(|e: String| CliError::new(&e))?;

  let mut rate = RateControlConfig::new()
    .with_mode(mode)
    .with_bitrate(required(parse_u32(matches, "BITRATE")?, "BITRATE")?)
    .with_frame_rate(required(parse_fps(matches, "FPS")?, "FPS")?)
    .with_buffer_delay(required(parse_u32(matches, "DELAY")?, "DELAY")?)
    .with_max_vbv_size(required(parse_u32(matches, "VBV_SIZE")?, "VBV_SIZE")?)
    .with_mb_level_rc(matches.is_present("MB_RC"));
  if let Some(peak) = parse_peak(matches)? {
    rate = rate.with_peak_bitrate(peak);
  }
  if let Some(src) = parse_fps(matches, "SRC_FPS")? {
    rate = rate.with_src_frame_rate(src);
  }

  let inter = required(parse_u32(matches, "INTER_INTERVAL")?, "INTER_INTERVAL")?;
  let gop = GopConfig::new()
    .with_intra_interval(required(
      parse_u32(matches, "KEYFRAME_INTERVAL")?,
      "KEYFRAME_INTERVAL",
    )?)
    .with_inter_interval(inter)
    .with_closed(!matches.is_present("OPEN_GOP"));

  let scene_len = required(parse_u32(matches, "SCENE_LEN")?, "SCENE_LEN")?;

  Ok(CliOptions {
    config: Config::new().with_rate(rate).with_gop(gop),
    frames: required(parse_u32(matches, "LIMIT")?, "LIMIT")?,
    trace: Trace { scene_len, mb_rc: matches.is_present("MB_RC") },
    quiet: matches.is_present("QUIET"),
  })
}

const MB_COUNT: i32 = 396;
const HEADER_BITS: i32 = 1500;
const TEXTURE_COEFF: u64 = 40;
const SCENE_SAD: [u32; 3] = [80_000, 160_000, 120_000];
// Relative activity of the macroblock classes of a picture, in 1/4 units.
const ACTIVITY_CLASSES: [i32; 4] = [2, 3, 5, 6];

/// A deterministic stand-in for an encoder: a picture of residual SAD `sad`
/// coded at QP `qp` costs `40 * sad / qp` texture bits.
#[derive(Debug, Clone, Copy)]
pub struct Trace {
  pub scene_len: u32,
  pub mb_rc: bool,
}

impl Trace {
  fn scene(&self, id: i32) -> usize {
    match self.scene_len {
      0 => 0,
      len => (id as u32 / len) as usize % SCENE_SAD.len(),
    }
  }

  pub fn is_scene_change(&self, id: i32) -> bool {
    self.scene_len != 0 && id > 0 && id as u32 % self.scene_len == 0
  }

  fn inter_sad(&self, id: i32) -> u32 {
    let base = SCENE_SAD[self.scene(id)];
    base + (id.rem_euclid(5) as u32) * base / 50
  }

  pub fn sad(&self, id: i32, pic_type: PictureType) -> u32 {
    let sad = self.inter_sad(id);
    match pic_type {
      PictureType::I => sad * 3,
      PictureType::P => sad,
      PictureType::B => sad * 3 / 4,
    }
  }

  pub fn activity(&self, id: i32) -> i32 {
    1000 + id.rem_euclid(7) * 50
  }

  fn texture(sad: u32, qp: u8) -> i32 {
    (TEXTURE_COEFF * sad as u64 / qp.max(1) as u64).min(i32::MAX as u64) as i32
  }

  /// Codes picture `id` and reports what the encoder would have measured.
  pub fn encode(
    &self, rc: &RateControl, id: i32, pic_type: PictureType, frame_qp: u8,
  ) -> FrameStats {
    let sad = self.sad(id, pic_type);
    let activity = self.activity(id);
    let mb = (if pic_type == PictureType::I {
      MbType::Intra
    } else {
      MbType::Inter
    }) as usize;

    let mut stats = FrameStats {
      header_bits: HEADER_BITS,
      avg_activity: activity,
      is_scene_change: self.is_scene_change(id),
      intra_cost: Self::texture(self.sad(id, PictureType::I), 1),
      ..Default::default()
    };

    if self.mb_rc {
      let classes = ACTIVITY_CLASSES.len() as i32;
      let mbs = MB_COUNT / classes;
      for &weight in ACTIVITY_CLASSES.iter() {
        let (_, qp) = rc.mb_qp(activity * weight / 4, pic_type);
        let class_sad = sad / classes as u32;
        stats.texture_bits[mb] += Self::texture(class_sad, qp);
        stats.qp_sum[mb] += qp as i32 * mbs;
        stats.mb_count[mb] += mbs;
      }
    } else {
      stats.texture_bits[mb] = Self::texture(sad, frame_qp);
      stats.qp_sum[mb] = frame_qp as i32 * MB_COUNT;
      stats.mb_count[mb] = MB_COUNT;
    }
    stats.sad[mb] = sad;
    stats.total_bits = stats.texture_bits[mb] + HEADER_BITS;
    stats
  }
}
