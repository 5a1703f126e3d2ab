use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use mailbox_frame::{decode_frame, FrameError, FrameReader, ReaderConfig, TelemetryFrame};

use crate::cmd::{open_input, read_input, DecodeArgs};
use crate::exit::{
    decode_error, frame_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS,
    USAGE,
};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.delimiter.reader_config();
    let mut sink = FrameSink::open(args.output.as_deref(), format)?;

    let code = match (&args.hex, args.stream) {
        (Some(text), false) => decode_one(&parse_hex(text)?, &mut sink),
        (Some(text), true) => decode_stream(parse_hex(text)?.as_slice(), config, &mut sink),
        (None, false) => decode_one(&read_input(args.input.as_deref())?, &mut sink),
        (None, true) => decode_stream(open_input(args.input.as_deref())?, config, &mut sink),
    }?;

    sink.finish()?;
    Ok(code)
}

/// Destination for decoded frames: stdout in the chosen format, or one JSON
/// object per line in a file.
enum FrameSink {
    Stdout(OutputFormat),
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
}

impl FrameSink {
    fn open(path: Option<&Path>, format: OutputFormat) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::Stdout(format));
        };
        let file = File::create(path)
            .map_err(|err| io_error(&format!("failed creating {}", path.display()), err))?;
        Ok(Self::File {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn emit(&mut self, frame: &TelemetryFrame) -> CliResult<()> {
        match self {
            Self::Stdout(format) => {
                print_frame(frame, *format);
                Ok(())
            }
            Self::File { path, writer } => {
                serde_json::to_writer(&mut *writer, frame).map_err(|err| {
                    CliError::new(FAILURE, format!("failed writing {}: {err}", path.display()))
                })?;
                writer
                    .write_all(b"\n")
                    .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))
            }
        }
    }

    fn finish(self) -> CliResult<()> {
        match self {
            Self::Stdout(_) => Ok(()),
            Self::File { path, mut writer } => {
                writer
                    .flush()
                    .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
                tracing::info!(path = %path.display(), "decoded frames written");
                Ok(())
            }
        }
    }
}

fn parse_hex(text: &str) -> CliResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact)
        .map_err(|err| CliError::new(USAGE, format!("--hex is not valid hex: {err}")))
}

fn decode_one(bytes: &[u8], sink: &mut FrameSink) -> CliResult<i32> {
    let frame = decode_frame(bytes).map_err(|err| decode_error("decode failed", err))?;
    sink.emit(&frame)?;
    Ok(SUCCESS)
}

/// Print every decodable frame. Bad frames are logged and reflected in the
/// exit code; they do not stop the stream.
fn decode_stream<R: Read>(
    input: R,
    config: ReaderConfig,
    sink: &mut FrameSink,
) -> CliResult<i32> {
    let mut decoded = 0u64;
    let mut failed = 0u64;

    for item in FrameReader::with_config(input, config) {
        match item {
            Ok(frame) => {
                sink.emit(&frame)?;
                decoded += 1;
            }
            Err(FrameError::Decode(err)) => {
                failed += 1;
                match err.device_ip() {
                    Some(device_ip) => {
                        tracing::warn!(device_ip = %device_ip, error = %err, "skipping malformed frame")
                    }
                    None => tracing::warn!(error = %err, "skipping malformed frame"),
                }
            }
            Err(err @ FrameError::Truncated { .. }) => {
                failed += 1;
                tracing::warn!(error = %err, "input ended mid-frame");
            }
            Err(err @ FrameError::Io(_)) => return Err(frame_error("read failed", err)),
        }
    }

    tracing::info!(decoded, failed, "stream decoded");
    Ok(if failed == 0 { SUCCESS } else { DATA_INVALID })
}
