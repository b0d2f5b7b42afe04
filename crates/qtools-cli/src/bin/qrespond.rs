//! qrespond - Receive requests and send responses

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, RespondArgs};
use qtools_core::{run_pump, Context, RespondPump, TextTransform};
use qtools_transport::Container;
use qtools_types::ClientConfig;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = RespondArgs::parse();
    let cx = Context::init("qrespond", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &RespondArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::new(args.connect.config()?, &args.urls)?;
    config.count = args.count;

    let container = Container::new(cx.container_id(config.connect.id.as_deref()));
    forward_interrupt(container.injector());

    let mut pump = RespondPump::new(config, TextTransform::new(args.transform()));
    run_pump(container, &mut pump).await?;

    Ok(())
}
