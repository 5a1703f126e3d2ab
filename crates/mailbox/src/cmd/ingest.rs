use std::thread;

use mailbox_ingest::{
    BroadcastHub, HubConfig, IngestConfig, IngestCoordinator, IngestStats, OverflowPolicy,
};

use crate::cmd::{check_topic, open_input, subscription, IngestArgs};
use crate::exit::{ingest_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_event, print_stats, OutputFormat};

pub fn run(args: IngestArgs, format: OutputFormat) -> CliResult<i32> {
    check_topic(&args.topic, &args.subscription)?;

    let hub = BroadcastHub::with_config(HubConfig {
        observer_capacity: args.observer_capacity,
        overflow: OverflowPolicy::DropNewest,
    });
    let config = IngestConfig {
        subscription: subscription(&args.subscription),
    };
    let mut coordinator = IngestCoordinator::with_config(hub.clone(), config)
        .map_err(|err| ingest_error("invalid subscription", err))?;

    let mut observer = hub.register();
    drop(hub);
    let printer = thread::spawn(move || {
        while let Some(event) = observer.blocking_recv() {
            print_event(&event, format);
        }
    });

    let input = open_input(args.input.as_deref())?;
    let stats = coordinator.ingest_stream(&args.topic, input, args.delimiter.reader_config());

    // Dropping the coordinator drops the last hub handle, which ends the
    // printer once it has drained its queue.
    drop(coordinator);
    printer
        .join()
        .map_err(|_| CliError::new(INTERNAL, "event printer panicked"))?;

    print_stats(&stats, format);
    Ok(exit_code(&stats))
}

fn exit_code(stats: &IngestStats) -> i32 {
    if stats.io_errors > 0 {
        FAILURE
    } else if stats.decode_failures > 0 || stats.truncated > 0 {
        DATA_INVALID
    } else {
        SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_reflects_worst_failure() {
        let mut stats = IngestStats {
            received: 3,
            broadcast: 3,
            ..IngestStats::default()
        };
        assert_eq!(exit_code(&stats), SUCCESS);
        stats.truncated = 1;
        assert_eq!(exit_code(&stats), DATA_INVALID);
        stats.io_errors = 1;
        assert_eq!(exit_code(&stats), FAILURE);
    }
}
