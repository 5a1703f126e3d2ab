mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

const EXAMPLES: &str = "\
Examples:
  # Pack a JSON record into a hex frame
  mailbox encode -i reading.json

  # Inspect a captured payload
  mailbox decode --hex c0a8016465a1b2c300fa0162012c57

  # Replay a mosquitto_sub capture through the pipeline
  mosquitto_sub -t home/mailbox/status | mailbox ingest --topic home/mailbox/status --delimiter newline

  # Serve live telemetry to WebSocket observers
  mosquitto_sub -t home/mailbox/events/mail_dropped | mailbox serve --topic home/mailbox/events/mail_dropped --delimiter newline";

#[derive(Parser, Debug)]
#[command(
    name = "mailbox",
    version,
    about = "Encode, decode and fan out mailbox sensor telemetry",
    after_help = EXAMPLES
)]
struct Cli {
    /// Output format for frames and events (default: table on a terminal,
    /// JSON lines otherwise).
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        env = "MAILBOX_LOG_FORMAT",
        default_value = "text",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr). Decode failures are logged at `warn`.
    #[arg(
        long,
        value_name = "LEVEL",
        env = "MAILBOX_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
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
    use crate::cmd::Delimiter;

    #[test]
    fn parses_decode_subcommand() {
        let cli = Cli::try_parse_from([
            "mailbox",
            "decode",
            "--hex",
            "c0a8016465a1b2c300fa0162012c57",
        ])
        .expect("decode args should parse");

        assert!(matches!(cli.command, Command::Decode(_)));
    }

    #[test]
    fn rejects_conflicting_decode_inputs() {
        let err = Cli::try_parse_from([
            "mailbox",
            "decode",
            "--hex",
            "00",
            "--input",
            "frames.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn stream_delimiter_parses() {
        let cli = Cli::try_parse_from([
            "mailbox",
            "ingest",
            "--topic",
            "home/mailbox/status",
            "--delimiter",
            "newline",
        ])
        .expect("ingest args should parse");

        match cli.command {
            Command::Ingest(args) => assert_eq!(args.delimiter, Delimiter::Newline),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn decode_output_file_is_accepted() {
        let cli = Cli::try_parse_from([
            "mailbox",
            "decode",
            "--stream",
            "-o",
            "frames.json",
        ])
        .expect("decode args should parse");

        match cli.command {
            Command::Decode(args) => {
                assert!(args.stream);
                assert_eq!(
                    args.output.as_deref(),
                    Some(std::path::Path::new("frames.json"))
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_defaults_to_undelimited_stream() {
        let cli = Cli::try_parse_from(["mailbox", "serve", "--topic", "home/mailbox/status"])
            .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => assert_eq!(args.delimiter, Delimiter::None),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_bind_must_be_socket_address() {
        let err = Cli::try_parse_from([
            "mailbox",
            "serve",
            "--topic",
            "home/mailbox/status",
            "--bind",
            "not-an-address",
        ])
        .expect_err("bad bind should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
