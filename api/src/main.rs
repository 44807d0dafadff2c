use api::startup::Application;
use config::Environment;
use telemetry::{LogFormat, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = Environment::load()?;
    let format = match environment {
        Environment::Dev => LogFormat::Pretty,
        Environment::Prod => LogFormat::Json,
    };
    init_tracing("api=info,sluice=info,actix_web=warn", format);

    let settings = config::shared::load_settings()?;
    let application = Application::build(&settings).await?;

    application.run_until_stopped().await?;

    Ok(())
}
