use anyhow::Result;
use clap::Parser;
use offmail::app;
use offmail::cli::Cli;
use offmail::config::AppDefaults;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();
    let defaults = AppDefaults::load()?;
    init_tracing(&defaults.log_filter);

    let cli = Cli::parse();
    app::run(cli, defaults).await
}

fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
