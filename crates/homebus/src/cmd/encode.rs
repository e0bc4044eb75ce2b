use homebus_codec::{encode, EncodeKind, EncodeSchema, Value};

use crate::cmd::EncodeArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_bytes, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let kind: EncodeKind = serde_json::from_value(serde_json::Value::String(args.encode.clone()))
        .map_err(|_| CliError::new(USAGE, format!("unknown encoding '{}'", args.encode)))?;

    let mut schema = EncodeSchema::new(kind).with_length(args.length);
    if args.signed {
        schema = schema.signed();
    }
    if args.little_endian {
        schema = schema.little_endian();
    }
    if let Some(factor) = args.factor {
        schema = schema.with_factor(factor);
    }
    if let Some(offset) = args.offset {
        schema = schema.with_offset(offset);
    }
    schema
        .validate()
        .map_err(|err| CliError::new(USAGE, format!("encode: {err}")))?;

    let value = match args.value.parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::Text(args.value.clone()),
    };
    let bytes = encode(&value, &schema);
    if bytes.is_empty() {
        return Err(CliError::new(
            DATA_INVALID,
            format!("value '{}' cannot be encoded as {}", args.value, kind.as_str()),
        ));
    }

    print_bytes("encode", kind.as_str(), &bytes, format);
    Ok(SUCCESS)
}
