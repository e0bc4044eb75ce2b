use homebus_frame::{Builtin, Checksum};

use crate::cmd::{parse_hex, ChecksumArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_bytes, OutputFormat};

pub fn run(args: ChecksumArgs, format: OutputFormat) -> CliResult<i32> {
    let builtin = Builtin::from_name(&args.algorithm).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("unknown checksum algorithm '{}'", args.algorithm),
        )
    })?;
    let header = parse_hex("header", &args.header)?;
    let data = parse_hex("data", &args.data)?;

    let checksum = Checksum::builtin(builtin)
        .compute(&header, &data, None)
        .map_err(|err| CliError::new(DATA_INVALID, format!("checksum: {err}")))?;

    tracing::debug!(algorithm = builtin.name(), header = header.len(), data = data.len(), "checksum computed");
    print_bytes("checksum", builtin.name(), checksum.as_slice(), format);
    Ok(SUCCESS)
}
