//! qrequest - Send requests and receive responses

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, open_input, open_output, RequestArgs};
use qtools_core::{
    run_pump, Context, InputReader, LineQueue, OutputWriter, ReadyLatch, RequestPump,
};
use qtools_transport::Container;
use qtools_types::ClientConfig;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = RequestArgs::parse();
    let cx = Context::init("qrequest", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &RequestArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::new(args.connect.config()?, &args.urls())?;
    config.presettled = args.presettled;
    config.json = args.json;
    config.prefix = !args.no_prefix;

    let input = open_input(args.input.as_deref(), &args.messages())?;
    let output = OutputWriter::spawn(open_output(args.output.as_deref())?)?;

    let container = Container::new(cx.container_id(config.connect.id.as_deref()));
    let lines = LineQueue::new();
    let ready = ReadyLatch::new();

    InputReader::spawn(input, lines.clone(), ready.clone(), container.injector())?;
    forward_interrupt(container.injector());

    let mut pump = RequestPump::new(config, lines, ready, output);
    run_pump(container, &mut pump).await?;

    Ok(())
}
