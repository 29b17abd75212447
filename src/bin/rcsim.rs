// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![deny(bare_trait_objects)]

#[macro_use]
extern crate log;

mod common;
mod error;

use crate::common::*;
use crate::error::*;
use ratectl::prelude::*;

use std::fmt;
use std::io::{self, BufWriter, Write};
use std::process::exit;

#[derive(Debug, Default)]
struct Summary {
  frames: u32,
  skipped: u32,
  bits: i64,
  stuffed: i64,
  qp_sum: PerType<i64>,
  coded: PerType<i64>,
  frame_rate: u32,
  bitrate: u32,
}

impl Summary {
  fn add(&mut self, pic_type: PictureType, qp: u8, bits: i32, stuff: i32) {
    self.bits += (bits + stuff) as i64;
    self.stuffed += stuff as i64;
    self.qp_sum[pic_type] += qp as i64;
    self.coded[pic_type] += 1;
  }

  fn coded_frames(&self) -> i64 {
    self.coded.0.iter().sum()
  }

  fn achieved_bitrate(&self) -> f64 {
    match self.coded_frames() {
      0 => 0.,
      n => self.bits as f64 * self.frame_rate as f64 / 1000. / n as f64,
    }
  }
}

impl fmt::Display for Summary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "frames: {} read, {} coded, {} skipped",
      self.frames,
      self.coded_frames(),
      self.skipped
    )?;
    writeln!(
      f,
      "bitrate: {:.2} kb/s (target {:.2} kb/s), {} bits stuffed",
      self.achieved_bitrate() / 1000.,
      self.bitrate as f64 / 1000.,
      self.stuffed
    )?;
    for (t, n) in self.coded.iter() {
      if n > 0 {
        let avg_qp = self.qp_sum[t] as f64 / n as f64;
        writeln!(f, "{}: {} pictures, avg QP {:.2}", t, n, avg_qp)?;
      }
    }
    Ok(())
  }
}

fn init_logger() {
  use std::str::FromStr;
  fn level_colored(l: log::Level) -> console::StyledObject<&'static str> {
    use console::style;
    use log::Level;
    match l {
      Level::Trace => style("??").dim(),
      Level::Debug => style("? ").dim(),
      Level::Info => style("> ").green(),
      Level::Warn => style("! ").yellow(),
      Level::Error => style("!!").red(),
    }
  }

  let level = std::env::var("RCSIM_LOG")
    .ok()
    .and_then(|l| log::LevelFilter::from_str(&l).ok())
    .unwrap_or(log::LevelFilter::Warn);

  let res = fern::Dispatch::new()
    .format(move |out, message, record| {
      out.finish(format_args!(
        "{level} {message}",
        level = level_colored(record.level()),
        message = message,
      ));
    })
    .level(log::LevelFilter::Warn)
    .level_for("ratectl", level)
    .level_for("rcsim", level)
    .chain(std::io::stderr())
    .apply();
  if res.is_err() {
    eprintln!("logger already initialized");
  }
}

fn encode_ready<W: Write>(
  rc: &mut RateControl, trace: &Trace, summary: &mut Summary, out: &mut W,
  quiet: bool,
) -> Result<(), CliError> {
  loop {
    let desc = rc.picture_type();
    let Some(pic_type) = desc.picture_type() else {
      return Ok(());
    };
    let qp = rc.frame_qp(pic_type, i32::MAX);
    let stats = trace.encode(rc, desc.id, pic_type, qp);
    let stuff = rc.post_encode_update(pic_type, &stats);
    summary.add(pic_type, qp, stats.total_bits, stuff);
    if !quiet {
      writeln!(
        out,
        "{:5} {} {:3} {:8} {:6} {:9}",
        desc.id,
        pic_type,
        qp,
        stats.total_bits,
        stuff,
        rc.vbv_fullness()
      )
      .map_err(|e| e.context("Cannot write output"))?;
    }
  }
}

fn run() -> Result<(), CliError> {
  let cli = parse_cli()?;
  let mut rc =
    cli.config.new_context().map_err(|e| e.context("Invalid configuration"))?;
  info!("simulating {} frames in {} mode", cli.frames, rc.mode());

  let mut summary = Summary {
    frame_rate: rc.frame_rate(),
    bitrate: rc.bitrate(),
    ..Default::default()
  };
  let stdout = io::stdout();
  let mut out = BufWriter::new(stdout.lock());
  if !cli.quiet {
    writeln!(out, "{:>5} T {:>3} {:>8} {:>6} {:>9}", "id", "qp", "bits", "stuff", "vbv")
      .map_err(|e| e.context("Cannot write output"))?;
  }

  let mut coded_id = 0;
  for _ in 0..cli.frames {
    summary.frames += 1;
    if rc.update_frame_rate_decision() {
      summary.skipped += 1;
      continue;
    }
    rc.register_arrival(coded_id);
    coded_id += 1;
    encode_ready(&mut rc, &cli.trace, &mut summary, &mut out, cli.quiet)?;
  }
  rc.flush();
  encode_ready(&mut rc, &cli.trace, &mut summary, &mut out, cli.quiet)?;

  write!(out, "{}", summary).map_err(|e| e.context("Cannot write output"))?;
  out.flush().map_err(|e| e.context("Cannot write output"))?;
  Ok(())
}

fn main() {
  init_logger();

  run().unwrap_or_else(|e| {
    error::print_error(&e);
    exit(1);
  });
}
