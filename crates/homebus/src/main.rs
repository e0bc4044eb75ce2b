mod bus;
mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "homebus", version, about = "RS485 home-automation bus framing CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_subcommand() {
        let cli = Cli::try_parse_from([
            "homebus",
            "replay",
            "/tmp/bus.json",
            "--hex",
            "F7 01 02 FA",
            "--chunk",
            "1",
        ])
        .expect("replay args should parse");

        assert!(matches!(cli.command, Command::Replay(ref args) if args.chunk == Some(1)));
    }

    #[test]
    fn rejects_conflicting_capture_args() {
        let err = Cli::try_parse_from([
            "homebus",
            "replay",
            "/tmp/bus.json",
            "--hex",
            "F7",
            "--file",
            "/tmp/capture.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn replay_needs_a_capture() {
        let err = Cli::try_parse_from(["homebus", "replay", "/tmp/bus.json"])
            .expect_err("missing capture should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn encode_accepts_negative_values() {
        let cli = Cli::try_parse_from([
            "homebus",
            "encode",
            "--value",
            "-3.5",
            "--encode",
            "signed_half_unit",
            "--signed",
        ])
        .expect("encode args should parse");
        assert!(matches!(cli.command, Command::Encode(ref args) if args.value == "-3.5"));
    }

    #[test]
    fn parses_global_format_after_subcommand() {
        let cli = Cli::try_parse_from([
            "homebus",
            "checksum",
            "--algorithm",
            "xor",
            "--data",
            "0102",
            "--format",
            "pretty",
        ])
        .expect("checksum args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
    }
}
