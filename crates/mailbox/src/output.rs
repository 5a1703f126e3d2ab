use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mailbox_frame::TelemetryFrame;
use mailbox_ingest::{IngestStats, TelemetryEvent};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_frame(frame: &TelemetryFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(frame),
        OutputFormat::Table => {
            let mut table = new_table(vec![
                "DEVICE",
                "TIMESTAMP",
                "STATE",
                "DISTANCE",
                "BASELINE",
                "SUCCESS",
                "CONFIDENCE",
            ]);
            table.add_row(vec![
                frame.device_ip.to_string(),
                frame.timestamp.to_string(),
                frame.state.to_string(),
                millimetres(frame.distance),
                millimetres(frame.baseline),
                percent(frame.success_rate),
                frame.confidence.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "device={} time={} state={} distance={} baseline={} success={} confidence={}",
                frame.device_ip,
                frame.timestamp,
                frame.state,
                millimetres(frame.distance),
                millimetres(frame.baseline),
                percent(frame.success_rate),
                frame.confidence
            );
        }
        OutputFormat::Raw => print_raw(&frame.to_bytes()),
    }
}

pub fn print_event(event: &TelemetryEvent, format: OutputFormat) {
    let confidence = event
        .confidence()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());

    match format {
        // Events have no wire form of their own; raw falls back to JSON lines.
        OutputFormat::Json | OutputFormat::Raw => print_json(event),
        OutputFormat::Table => {
            let mut table = new_table(vec![
                "EVENT",
                "DEVICE",
                "TIMESTAMP",
                "STATE",
                "DISTANCE",
                "BASELINE",
                "SUCCESS",
                "CONFIDENCE",
            ]);
            table.add_row(vec![
                event.kind().to_string(),
                event.device_ip().to_string(),
                event.timestamp().to_string(),
                event.state().to_string(),
                millimetres(event.distance()),
                millimetres(event.baseline()),
                percent(event.success_rate()),
                confidence,
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "[{}] device={} state={} distance={} baseline={} success={} confidence={}",
                event.kind(),
                event.device_ip(),
                event.state(),
                millimetres(event.distance()),
                millimetres(event.baseline()),
                percent(event.success_rate()),
                confidence
            );
        }
    }
}

/// Ingest summary. Written to stderr so stdout stays a clean event stream.
pub fn print_stats(stats: &IngestStats, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["COUNTER", "VALUE"]);
            for (name, value) in [
                ("received", stats.received),
                ("broadcast", stats.broadcast),
                ("decode_failures", stats.decode_failures),
                ("unclassified", stats.unclassified),
                ("filtered", stats.filtered),
                ("truncated", stats.truncated),
                ("io_errors", stats.io_errors),
                ("observer_drops", stats.observer_drops),
            ] {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            eprintln!("{table}");
        }
        _ => eprintln!(
            "{}",
            serde_json::to_string(stats).unwrap_or_else(|_| "{}".to_string())
        ),
    }
}

pub fn print_hex(bytes: &[u8]) {
    println!("{}", hex::encode(bytes));
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn millimetres(value: u16) -> String {
    format!("{value} mm")
}

/// Success rate is transmitted as 0-255 for 0-100%.
fn percent(rate: u8) -> String {
    format!("{:.0}%", f64::from(rate) * 100.0 / 255.0)
}
