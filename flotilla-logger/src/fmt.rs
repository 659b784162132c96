// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Line formatting of log records.

use console::{style, Color, StyledObject};
use flotilla_log::Level;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

static TARGET_SIZE: AtomicUsize = AtomicUsize::new(16);
static TID_SIZE: AtomicUsize = AtomicUsize::new(4);

/// A log record as seen by the formatter.
#[derive(Debug)]
pub struct Record<'a> {
    pub timestamp: SystemTime,
    pub level: Level,
    pub target: &'a str,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    pub tgid: u32,
    pub tid: u32,
    pub args: &'a str,
}

/// Write `record` as a single line to `writer`.
pub fn format<W: io::Write>(record: &Record, mut writer: W) -> io::Result<()> {
    let timestamp = OffsetDateTime::from(record.timestamp)
        .format(TIMESTAMP_FORMAT)
        .map_err(io::Error::other)?;

    let level = {
        let level_color = match record.level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Color256(243),
            Level::Trace => Color::White,
        };
        style(record.level).bold().fg(level_color)
    };

    let tid = format_id(record.tid, &TID_SIZE);

    let target = {
        let target = record.target;
        TARGET_SIZE.fetch_max(target.len(), Ordering::Relaxed);
        let target_size = TARGET_SIZE.load(Ordering::Relaxed);
        style(format!("{target:<target_size$}")).fg(hash_color(target.bytes()))
    };

    let tgid = record.tgid;
    let message = record.args;

    // Log location on trace level - otherwise just the message.
    if record.level == Level::Trace {
        let file = record.file.unwrap_or("file unknown");
        let line = record.line.unwrap_or(0);
        writeln!(
            writer,
            "{timestamp} {target} ({tgid} {tid}): {level:<5}: {file}:{line}: {message}",
        )
    } else {
        writeln!(
            writer,
            "{timestamp} {target} ({tgid} {tid}): {level:<5}: {message}"
        )
    }
}

/// Pick a stable 256-colour for a byte sequence.
fn hash_color(bytes: impl Iterator<Item = u8>) -> Color {
    let hash = bytes.fold(42u8, |c, x| c ^ x);
    // Some colors are hard to read on dark terminals
    let color = match hash {
        c @ 0..=1 => c + 2,
        c @ 16..=21 => c + 6,
        c @ 232..=240 => c + 9,
        c => c,
    };
    Color::Color256(color)
}

/// Format `id` right aligned with a color based on its value. Update `width` with the
/// maximum length seen so far.
fn format_id(id: u32, width: &AtomicUsize) -> StyledObject<String> {
    width.fetch_max(num_hex_digits(id), Ordering::Relaxed);
    let len = width.load(Ordering::Relaxed);
    style(format!("{id:>len$x}")).fg(hash_color(id.to_le_bytes().into_iter()))
}

// Calculate the number of hex digits needed to represent `n`.
fn num_hex_digits(n: u32) -> usize {
    (1 + n.checked_ilog2().unwrap_or_default() / 4) as usize
}
