//! qreceive - Receive messages from a queue or topic

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, open_output, ReceiveArgs};
use qtools_core::{run_pump, Context, OutputWriter, ReceivePump};
use qtools_transport::Container;
use qtools_types::ClientConfig;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = ReceiveArgs::parse();
    let cx = Context::init("qreceive", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &ReceiveArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::new(args.connect.config()?, &args.urls)?;
    config.count = args.count;
    config.json = args.json;
    config.prefix = !args.no_prefix;
    config.properties = args.properties;

    let output = OutputWriter::spawn(open_output(args.output.as_deref())?)?;

    let container = Container::new(cx.container_id(config.connect.id.as_deref()));
    forward_interrupt(container.injector());

    let mut pump = ReceivePump::new(config, output);
    run_pump(container, &mut pump).await?;

    Ok(())
}
