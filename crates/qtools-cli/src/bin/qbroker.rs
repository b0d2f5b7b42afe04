//! qbroker - A simple message broker for testing

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, BrokerArgs};
use qtools_core::{Broker, Context};
use qtools_transport::Container;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = BrokerArgs::parse();
    let cx = Context::init("qbroker", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &BrokerArgs) -> anyhow::Result<()> {
    let config = args.config();
    let container = Container::new(cx.container_id(config.id.as_deref()));

    forward_interrupt(container.injector());

    let mut broker = Broker::new(config);
    container.run(&mut broker).await?;

    Ok(())
}
