//! qconnect - Check the connection to a server

use std::process::ExitCode;

use clap::Parser;
use qtools_cli::{forward_interrupt, ConnectToolArgs};
use qtools_core::{run_pump, ConnectProbe, Context};
use qtools_transport::Container;
use qtools_types::{Endpoint, Scheme, Server};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = ConnectToolArgs::parse();
    let cx = Context::init("qconnect", args.log.verbosity());

    match run(&cx, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cx: &Context, args: &ConnectToolArgs) -> anyhow::Result<()> {
    let connect = args.connect.config()?;
    connect.validate()?;

    let servers = if args.servers.is_empty() {
        vec![connect.server.clone()]
    } else {
        args.servers
            .iter()
            .map(|server| Server::parse(server))
            .collect::<qtools_types::Result<Vec<_>>>()?
    };

    let endpoints = servers
        .into_iter()
        .map(|server| Endpoint {
            scheme: Scheme::Amqp,
            host: server.host,
            port: server.port,
            address: String::new(),
        })
        .collect();

    let container = Container::new(cx.container_id(connect.id.as_deref()));
    forward_interrupt(container.injector());

    let mut probe = ConnectProbe::new(endpoints, connect.user.clone());
    run_pump(container, &mut probe).await?;

    Ok(())
}
