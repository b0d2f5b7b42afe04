//! qsend - Send messages to a queue or topic

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, open_input, SendArgs};
use qtools_core::{run_pump, Context, InputReader, LineQueue, ReadyLatch, SendPump};
use qtools_transport::Container;
use qtools_types::ClientConfig;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = SendArgs::parse();
    let cx = Context::init("qsend", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &SendArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::new(args.connect.config()?, &args.urls())?;
    config.presettled = args.presettled;

    let input = open_input(args.input.as_deref(), &args.messages())?;

    let container = Container::new(cx.container_id(config.connect.id.as_deref()));
    let lines = LineQueue::new();
    let ready = ReadyLatch::new();

    InputReader::spawn(input, lines.clone(), ready.clone(), container.injector())?;
    forward_interrupt(container.injector());

    let mut pump = SendPump::new(config, lines, ready);
    run_pump(container, &mut pump).await?;

    Ok(())
}
