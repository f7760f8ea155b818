/// Gatehouse - gated content platform server
use gatehouse::{
    config::{LogFormat, LoggingConfig, ServerConfig},
    server, AppContext, GateResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> GateResult<()> {
    // Initialize logging before configuration so config errors are visible
    let logging = LoggingConfig::from_env();
    let filter = EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| EnvFilter::new("gatehouse=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   ______      __       __
  / ____/___ _/ /____  / /_  ____  __  __________
 / / __/ __ `/ __/ _ \/ __ \/ __ \/ / / / ___/ _ \
/ /_/ / /_/ / /_/  __/ / / / /_/ / /_/ (__  )  __/
\____/\__,_/\__/\___/_/ /_/\____/\__,_/____/\___/

        Gated content platform v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
