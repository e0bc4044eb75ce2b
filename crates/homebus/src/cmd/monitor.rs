use std::fs::File;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use homebus_dispatch::Event;

use crate::bus::BusConfig;
use crate::cmd::MonitorArgs;
use crate::exit::{dispatch_error, io_error, CliError, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

const READ_BUFFER: usize = 256;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let config = BusConfig::load(&args.config)?;
    let channel = config.id.clone();
    let (tx, rx) = mpsc::channel::<Event>();
    let mut dispatcher = config.into_dispatcher(tx)?;

    let mut input: Box<dyn Read> = if args.device == "-" {
        Box::new(io::stdin())
    } else {
        let file = File::open(&args.device)
            .map_err(|err| io_error(&format!("open {}", args.device), err))?;
        Box::new(file)
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    tracing::info!(device = %args.device, channel = %channel, "monitoring");

    let mut buf = [0u8; READ_BUFFER];
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let n = match input.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("input closed");
                break;
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("read", err)),
        };

        dispatcher
            .feed(&channel, &buf[..n])
            .map_err(|err| dispatch_error("feed", err))?;

        for event in rx.try_iter() {
            print_event(&event, format);
            printed += 1;
            if args.count.is_some_and(|limit| printed >= limit) {
                return Ok(SUCCESS);
            }
        }
    }

    dispatcher
        .flush(&channel, FLUSH_TIMEOUT)
        .map_err(|err| dispatch_error("flush", err))?;
    for event in rx.try_iter().take(args.count.map_or(usize::MAX, |limit| limit.saturating_sub(printed))) {
        print_event(&event, format);
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
