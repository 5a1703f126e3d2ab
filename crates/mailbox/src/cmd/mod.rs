use std::fs::File;
use std::io::{BufReader, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand, ValueEnum};
use mailbox_frame::ReaderConfig;
use mailbox_ingest::{IngestError, OverflowPolicy, TopicClass, TopicFilter, DEFAULT_SUBSCRIPTION};

use crate::exit::{ingest_error, io_error, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod ingest;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack JSON telemetry records into wire frames.
    Encode(EncodeArgs),
    /// Decode wire frames and print their fields.
    Decode(DecodeArgs),
    /// Run a captured frame stream through the ingest pipeline.
    Ingest(IngestArgs),
    /// Ingest a live frame stream from stdin and serve observers.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Ingest(args) => ingest::run(args, format),
        Command::Serve(args) => serve::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Separator written after each frame by the transport.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Delimiter {
    /// Frames are back to back.
    #[default]
    None,
    /// One `\n` after each frame, as `mosquitto_sub` prints payloads.
    Newline,
}

impl Delimiter {
    pub fn reader_config(self) -> ReaderConfig {
        match self {
            Delimiter::None => ReaderConfig::default(),
            Delimiter::Newline => ReaderConfig::newline_delimited(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Overflow {
    /// Skip events for an observer whose queue is full.
    #[default]
    Drop,
    /// Disconnect an observer whose queue is full.
    Disconnect,
}

impl From<Overflow> for OverflowPolicy {
    fn from(value: Overflow) -> Self {
        match value {
            Overflow::Drop => OverflowPolicy::DropNewest,
            Overflow::Disconnect => OverflowPolicy::Disconnect,
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// JSON record or array of records (default: stdin).
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Write frames to a file instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Write hex lines to the output file instead of binary frames.
    #[arg(long, requires = "output")]
    pub hex: bool,
    /// Separator appended to each binary frame.
    #[arg(long, value_enum, default_value = "none")]
    pub delimiter: Delimiter,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded frame bytes (whitespace ignored).
    #[arg(long, value_name = "HEX", conflicts_with = "input")]
    pub hex: Option<String>,
    /// Binary input file (default: stdin).
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Write decoded frames to a file as JSON lines instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Treat the input as a continuous stream of frames.
    #[arg(long)]
    pub stream: bool,
    /// Separator expected after each frame in stream mode.
    #[arg(long, value_enum, default_value = "none", requires = "stream")]
    pub delimiter: Delimiter,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Topic every frame in the stream was published on.
    #[arg(long, env = "MAILBOX_TOPIC")]
    pub topic: String,
    /// Binary input file (default: stdin).
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Separator expected after each frame.
    #[arg(long, value_enum, default_value = "none")]
    pub delimiter: Delimiter,
    /// Subscription filter; `*` accepts every topic.
    #[arg(long, env = "MAILBOX_SUBSCRIPTION", default_value = DEFAULT_SUBSCRIPTION)]
    pub subscription: String,
    /// Events buffered for the printing observer.
    #[arg(long, default_value_t = 1024)]
    pub observer_capacity: usize,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Topic every frame on stdin was published on.
    #[arg(long, env = "MAILBOX_TOPIC")]
    pub topic: String,
    /// Address for the observer server.
    #[arg(long, env = "MAILBOX_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,
    /// Separator expected after each frame.
    #[arg(long, value_enum, default_value = "none")]
    pub delimiter: Delimiter,
    /// Subscription filter; `*` accepts every topic.
    #[arg(long, env = "MAILBOX_SUBSCRIPTION", default_value = DEFAULT_SUBSCRIPTION)]
    pub subscription: String,
    /// Events buffered per WebSocket observer.
    #[arg(long, default_value_t = mailbox_ingest::DEFAULT_OBSERVER_CAPACITY)]
    pub observer_capacity: usize,
    /// What to do with an observer that falls behind.
    #[arg(long, value_enum, default_value = "drop")]
    pub overflow: Overflow,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// `*` disables the subscription filter.
pub(crate) fn subscription(filter: &str) -> Option<String> {
    (filter != "*").then(|| filter.to_string())
}

/// Reject topics that could never produce an event before reading any input.
pub(crate) fn check_topic(topic: &str, filter: &str) -> CliResult<()> {
    if TopicClass::classify(topic).is_none() {
        return Err(ingest_error(
            "cannot ingest",
            IngestError::UnclassifiedTopic {
                topic: topic.to_string(),
            },
        ));
    }

    if let Some(filter) = subscription(filter) {
        let filter =
            TopicFilter::new(filter).map_err(|err| ingest_error("invalid subscription", err))?;
        if !filter.matches(topic) {
            return Err(ingest_error(
                "cannot ingest",
                IngestError::Filtered {
                    topic: topic.to_string(),
                    filter: filter.to_string(),
                },
            ));
        }
    }
    Ok(())
}

pub(crate) fn open_input(path: Option<&Path>) -> CliResult<Box<dyn Read>> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(std::io::stdin().lock())),
    }
}

pub(crate) fn read_input(path: Option<&Path>) -> CliResult<Vec<u8>> {
    let mut data = Vec::new();
    open_input(path)?
        .read_to_end(&mut data)
        .map_err(|err| io_error("failed reading input", err))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;

    #[test]
    fn unclassified_topic_is_rejected_up_front() {
        let err = check_topic("home/mailbox/battery", "home/mailbox/#").unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn topic_outside_subscription_is_rejected() {
        let err = check_topic("garage/box/status", "home/mailbox/#").unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(check_topic("garage/box/status", "*").is_ok());
    }

    #[test]
    fn star_disables_subscription() {
        assert_eq!(subscription("*"), None);
        assert_eq!(subscription("home/+/status").as_deref(), Some("home/+/status"));
    }
}
