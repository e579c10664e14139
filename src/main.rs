/// Heartline server binary
use heartline::{config::ServerConfig, context::AppContext, error::AppResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration first so the log level can come from it
    let config = ServerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("heartline={},tower_http=debug", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    __  __                 __  ___
   / / / /__  ____ ______/ /_/ (_)___  ___
  / /_/ / _ \/ __ `/ ___/ __/ / / __ \/ _ \
 / __  /  __/ /_/ / /  / /_/ / / / / /  __/
/_/ /_/\___/\__,_/_/   \__/_/_/_/ /_/\___/

        Matching and realtime engine v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
