use clap::Parser;
use std::{process, sync::Arc};
use toolrec::{SinkKeys, KEY_PREFIX};
use toolrec_web::{
    server::{self, AppState},
    store::RedisStore,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Serves the published recommendation lists over HTTP
#[derive(Debug, Parser)]
#[command(name = "toolrec_web", version)]
struct Args {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(short, long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Must match the prefix the batch published under
    #[arg(long, default_value = KEY_PREFIX)]
    key_prefix: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let store = match RedisStore::connect(&args.redis_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Store startup failed with error: {}", e);
            process::exit(1);
        }
    };

    let state = AppState::new(Arc::new(store), SinkKeys::with_prefix(args.key_prefix));
    let app = server::router(state);

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error starting listener on {}: {}", args.bind, e);
            process::exit(1);
        }
    };
    info!("Web server up on {}", args.bind);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Error while serving requests: {}", e);
        process::exit(1);
    }
}
