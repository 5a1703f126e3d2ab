use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("mailbox {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: mailbox");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("MAILBOX_BUILD_TARGET").unwrap_or("unknown"));
    println!("profile: {}", option_env!("MAILBOX_BUILD_PROFILE").unwrap_or("unknown"));
    println!("frame_size: {}", mailbox_frame::FRAME_SIZE);
    println!("default_subscription: {}", mailbox_ingest::DEFAULT_SUBSCRIPTION);
    println!(
        "features: async={}, cli=true",
        cfg!(feature = "async")
    );

    Ok(SUCCESS)
}
