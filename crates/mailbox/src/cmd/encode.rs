use std::fs;

use mailbox_frame::{FrameWriter, TelemetryFrame, TelemetryRecord};
use serde::Deserialize;

use crate::cmd::{read_input, EncodeArgs};
use crate::exit::{encode_error, frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_hex, print_raw, OutputFormat};

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordInput {
    One(TelemetryRecord),
    Many(Vec<TelemetryRecord>),
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let text = read_input(args.input.as_deref())?;
    let frames = parse_frames(&text)?;
    tracing::debug!(frames = frames.len(), "records validated");

    match (&args.output, args.hex) {
        (Some(path), true) => {
            let lines: String = frames
                .iter()
                .map(|frame| format!("{}\n", hex::encode(frame.to_bytes())))
                .collect();
            fs::write(path, lines)
                .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
        }
        (Some(path), false) => {
            let bytes = pack(&frames, &args)?;
            fs::write(path, bytes)
                .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
        }
        (None, _) => match format {
            OutputFormat::Raw => print_raw(&pack(&frames, &args)?),
            _ => frames.iter().for_each(|frame| print_hex(&frame.to_bytes())),
        },
    }

    Ok(SUCCESS)
}

fn parse_frames(text: &[u8]) -> CliResult<Vec<TelemetryFrame>> {
    let input: RecordInput = serde_json::from_slice(text).map_err(|err| {
        CliError::new(
            USAGE,
            format!("input is not a telemetry record or array of records: {err}"),
        )
    })?;

    let records = match input {
        RecordInput::One(record) => vec![record],
        RecordInput::Many(records) => records,
    };

    records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            TelemetryFrame::try_from(record)
                .map_err(|err| encode_error(&format!("record {idx} rejected"), err))
        })
        .collect()
}

fn pack(frames: &[TelemetryFrame], args: &EncodeArgs) -> CliResult<Vec<u8>> {
    let mut writer = FrameWriter::with_config(Vec::new(), args.delimiter.reader_config());
    for frame in frames {
        writer
            .write_frame(frame)
            .map_err(|err| frame_error("encode failed", err))?;
    }
    Ok(writer.into_inner())
}
