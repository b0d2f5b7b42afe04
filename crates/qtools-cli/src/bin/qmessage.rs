//! qmessage - Generate message records for qsend and qrequest

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{open_output, write_records, Generator, MessageArgs, Schedule};
use qtools_core::Context;
use qtools_types::Error;
use tracing::{debug, error};

fn main() -> ExitCode {
    let args = MessageArgs::parse();
    let _cx = Context::init("qmessage", args.log.verbosity());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &MessageArgs) -> anyhow::Result<()> {
    let mut out = open_output(args.output.as_deref())?;
    let mut generator = Generator::from_args(args);
    let schedule = Schedule::new(args.count, args.rate);

    match write_records(&mut generator, schedule, &mut out) {
        Ok(written) => debug!("Generated {} messages", written),
        // The reader went away, as with `qmessage --rate 1 | head`
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
