use anyhow::Context;
use form2mail::configuration::get_settings;
use form2mail::startup::Application;
use form2mail::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("form2mail".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let settings = get_settings().context("Failed to read configuration")?;
    let application = Application::build(settings)
        .await
        .context("Failed to start the contact form relay")?;
    application.run_until_stopped().await?;
    Ok(())
}
