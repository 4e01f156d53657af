use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use log_router::{
    cli::{Mode, Opts},
    config::Options,
    Worker, WorkerContext,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();

    let options = match Options::from_env() {
        Ok(options) => options,
        Err(error) => {
            error!(message = "Invalid worker configuration.", %error);
            std::process::exit(1);
        }
    };

    let ctx = match WorkerContext::new(options).await {
        Ok(ctx) => ctx,
        Err(error) => {
            error!(message = "Failed to initialize the worker.", %error);
            std::process::exit(1);
        }
    };
    let worker = Worker::new(ctx);

    let result = match opts.mode {
        Mode::Batch => worker.run_batch_stdin().await,
        Mode::Poll => worker.run_poll().await,
        Mode::Scan => worker.run_scan().await,
    };

    if let Err(error) = result {
        error!(message = "Worker terminated with a fatal error.", %error);
        std::process::exit(1);
    }
}
