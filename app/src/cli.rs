use std::{ffi::OsString, num::IntErrorKind, path::PathBuf};

use clap::Parser;

pub const USAGE: &str = "Usage: pcsample <samples_dir> <output_path> [index]";

#[derive(Parser, Debug)]
#[command(
    name = "pcsample",
    about = "Picks one point cloud sample (.npy) from a directory and writes it as a CSV table",
    author = "MIERUNE Inc.",
    version = "0.0.1"
)]
pub struct Cli {
    #[arg(value_name = "SAMPLES_DIR")]
    pub samples_dir: PathBuf,

    #[arg(value_name = "OUTPUT_PATH")]
    pub output_path: PathBuf,

    /// Sample to convert. Out-of-range values are clamped; a random sample is
    /// picked when this is missing or not an integer.
    #[arg(value_name = "INDEX", allow_hyphen_values = true)]
    pub index: Option<OsString>,

    #[arg(hide = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

impl Cli {
    /// The requested index. Arguments that are not valid UTF-8 count as not
    /// being integers.
    pub fn index(&self) -> Option<i64> {
        self.index
            .as_deref()
            .and_then(|arg| arg.to_str())
            .and_then(parse_index)
    }
}

/// Parses an integer index. Anything that is not an integer yields `None`;
/// integers outside of the i64 range saturate since they clamp to a bound anyway.
///
/// Single underscores between digits are accepted as separators (`1_000`).
pub fn parse_index(arg: &str) -> Option<i64> {
    let arg = arg.trim();
    let (sign, digits) = match arg.strip_prefix(['+', '-']) {
        Some(rest) => (&arg[..1], rest),
        None => ("", arg),
    };

    let mut number = String::from(sign);
    for group in digits.split('_') {
        if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        number.push_str(group);
    }

    match number.parse::<i64>() {
        Ok(index) => Some(index),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}
