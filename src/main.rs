//! kind-conformance CLI

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kind_conformance::config::RunConfig;
use kind_conformance::lifecycle::Controller;
use kind_conformance::tools::Toolchain;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = RunConfig::parse();
    let tools = Toolchain::cli(&config);
    let outcome = Controller::new(config, tools).run().await;

    if let Err(e) = &outcome.result {
        error!("{}", e);
    }
    let code = outcome.exit_code();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
