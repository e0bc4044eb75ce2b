use std::sync::mpsc;
use std::time::Duration;

use homebus_dispatch::Event;

use crate::bus::BusConfig;
use crate::cmd::{parse_hex, ReplayArgs};
use crate::exit::{dispatch_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, OutputFormat};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let capture = match (&args.hex, &args.file) {
        (Some(hex), _) => parse_hex("--hex", hex)?,
        (None, Some(path)) => std::fs::read(path)
            .map_err(|err| io_error(&format!("read capture {}", path.display()), err))?,
        (None, None) => return Err(CliError::new(USAGE, "one of --hex or --file is required")),
    };
    let chunk = match args.chunk {
        Some(0) => return Err(CliError::new(USAGE, "--chunk must be at least 1")),
        Some(n) => n,
        None => capture.len().max(1),
    };

    let config = BusConfig::load(&args.config)?;
    let channel = config.id.clone();
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = config.into_dispatcher(tx)?;

    let mut printed = 0usize;
    for piece in capture.chunks(chunk) {
        dispatcher
            .feed(&channel, piece)
            .map_err(|err| dispatch_error("feed", err))?;
        for event in rx.try_iter() {
            print_event(&event, format);
            printed += 1;
        }
    }

    dispatcher
        .flush(&channel, FLUSH_TIMEOUT)
        .map_err(|err| dispatch_error("flush", err))?;
    for event in rx.try_iter() {
        print_event(&event, format);
        printed += 1;
    }

    tracing::info!(bytes = capture.len(), chunk, events = printed, "replay finished");
    Ok(SUCCESS)
}
