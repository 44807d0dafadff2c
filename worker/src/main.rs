mod core;

use config::Environment;
use telemetry::{LogFormat, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = Environment::load()?;
    let format = match environment {
        Environment::Dev => LogFormat::Pretty,
        Environment::Prod => LogFormat::Json,
    };
    init_tracing("worker=info,sluice=info", format);

    core::start_worker().await
}
