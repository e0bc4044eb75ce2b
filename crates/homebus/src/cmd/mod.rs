use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod checksum;
pub mod encode;
pub mod monitor;
pub mod replay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reassemble and decode a captured byte stream.
    Replay(ReplayArgs),
    /// Decode a live serial device (or stdin) until interrupted.
    Monitor(MonitorArgs),
    /// Compute a built-in checksum over header and data bytes.
    Checksum(ChecksumArgs),
    /// Encode a value into field bytes.
    Encode(EncodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Replay(args) => replay::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Checksum(args) => checksum::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Bus description (JSON): channel framing and entity schemas.
    pub config: PathBuf,
    /// Captured bytes as hex (whitespace ignored).
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub hex: Option<String>,
    /// Read captured bytes from a binary file.
    #[arg(long, conflicts_with = "hex")]
    pub file: Option<PathBuf>,
    /// Feed the capture in chunks of N bytes. Default: one chunk.
    #[arg(long, value_name = "N")]
    pub chunk: Option<usize>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Bus description (JSON): channel framing and entity schemas.
    pub config: PathBuf,
    /// Serial device path, or `-` for stdin.
    pub device: String,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ChecksumArgs {
    /// Built-in algorithm name (add, xor, add_no_header, xor_no_header, ...).
    #[arg(long, short = 'a')]
    pub algorithm: String,
    /// Header bytes as hex.
    #[arg(long, default_value = "")]
    pub header: String,
    /// Data bytes as hex.
    #[arg(long)]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Value to encode. Parsed as a number when possible.
    #[arg(long, allow_hyphen_values = true)]
    pub value: String,
    /// Encoding: none, bcd, ascii, signed_half_unit, multiply, add_offset.
    #[arg(long, default_value = "none")]
    pub encode: String,
    /// Output width for integer packing.
    #[arg(long, default_value_t = 1)]
    pub length: usize,
    #[arg(long)]
    pub signed: bool,
    #[arg(long)]
    pub little_endian: bool,
    /// Factor for `multiply`.
    #[arg(long, allow_hyphen_values = true)]
    pub factor: Option<f64>,
    /// Offset for `add_offset`.
    #[arg(long, allow_hyphen_values = true)]
    pub offset: Option<f64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse hex, ignoring whitespace so `F7 01 02` and `f70102` both work.
pub(crate) fn parse_hex(context: &str, text: &str) -> CliResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).map_err(|err| crate::exit::hex_error(context, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_spaces_and_case() {
        assert_eq!(parse_hex("data", "F7 01 fa").unwrap(), vec![0xF7, 0x01, 0xFA]);
        assert_eq!(parse_hex("data", "").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn odd_hex_is_usage_error() {
        let err = parse_hex("data", "F7 0").unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
        assert!(err.message.starts_with("data: "));
    }
}
