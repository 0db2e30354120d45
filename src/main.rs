use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_query::command::CommandQuery;
use resilient_query::config::Config;
use resilient_query::executor::QueryExecutor;
use resilient_query::limiter::{RateLimiter, SlidingWindowLimiter};
use resilient_query::redis_limiter::RedisRateLimiter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the outcome JSON
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::parse();
    config.validate()?;

    info!("rqx v{} starting...", env!("CARGO_PKG_VERSION"));

    let limiter: Arc<dyn RateLimiter> = match &config.redis_address {
        Some(address) => Arc::new(
            RedisRateLimiter::connect(address, config.rate_limit_max, config.rate_limit_window())
                .await?,
        ),
        None => Arc::new(SlidingWindowLimiter::new(
            usize::try_from(config.rate_limit_max).unwrap_or(usize::MAX),
            config.rate_limit_window(),
        )),
    };

    let executor = QueryExecutor::new(limiter)
        .with_backoff_base(config.backoff_base())
        .with_bucket(config.rate_limit_bucket());

    let Some((program, args)) = config.command.split_first() else {
        anyhow::bail!("A command to run is required");
    };
    let query = CommandQuery::new(program.clone(), args.to_vec());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling query");
            on_interrupt.cancel();
        }
    });

    let query = &query;
    let outcome = executor
        .execute_with_cancel(
            move || query.run(),
            &config.context,
            config.execution_options(),
            &cancel,
        )
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(error) = &outcome.error {
        info!("Query {} failed: {error}", config.context);
        std::process::exit(1);
    }

    Ok(())
}
