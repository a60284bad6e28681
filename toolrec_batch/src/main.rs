use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use std::process;
use toolrec::{DEFAULT_EXPIRE_SECONDS, EVENTS_INPUT, KEY_PREFIX};
use toolrec_batch::{
    batch::{run_batch, RunSummary},
    publisher::{ListSink, MemorySink, PublishError, RedisSink},
    recommender::{ListSizes, PopularityWeighting, RecommenderError, RecommenderOptions},
    source::read_events,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Popularity {
    /// Sum of decayed weights
    Decayed,
    /// Sum of raw interaction counts
    Raw,
}

/// Trains the recommender on an interaction snapshot and publishes every list
#[derive(Debug, Parser)]
#[command(name = "toolrec_batch", version)]
struct Args {
    /// Parquet file with user_id, item_id, visited_at and optional count columns
    #[arg(short, long, default_value = EVENTS_INPUT)]
    events_file: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Keep the lists in memory instead of writing them to redis
    #[arg(long)]
    dry_run: bool,

    /// Per-day multiplicative decay of interaction weight
    #[arg(long, default_value_t = 0.95)]
    decay_rate: f64,

    /// Ignore interactions older than this many days, 0 keeps everything
    #[arg(long, default_value_t = 180)]
    window_days: u32,

    /// Instant record ages are measured from (RFC 3339), defaults to now
    #[arg(long)]
    reference: Option<DateTime<Utc>>,

    /// Fail on the first malformed record instead of skipping it
    #[arg(long)]
    strict: bool,

    #[arg(short = 'k', long, default_value_t = 64)]
    factors: usize,

    #[arg(short, long, default_value_t = 20)]
    iterations: usize,

    #[arg(long, default_value_t = 0.05)]
    regularization: f64,

    /// Confidence scale
    #[arg(long, default_value_t = 40.0)]
    alpha: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 4)]
    history_size: usize,

    #[arg(long, default_value_t = 8)]
    discovery_size: usize,

    #[arg(long, default_value_t = 5)]
    related_size: usize,

    #[arg(long, default_value_t = 10)]
    popular_size: usize,

    #[arg(long, value_enum, default_value_t = Popularity::Decayed)]
    popularity: Popularity,

    #[arg(long, default_value = KEY_PREFIX)]
    key_prefix: String,

    #[arg(long, default_value_t = DEFAULT_EXPIRE_SECONDS)]
    expire_seconds: u64,

    /// Lists written per sink round trip
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,
}

impl Args {
    fn options(&self) -> RecommenderOptions {
        let window = (self.window_days > 0).then_some(self.window_days);
        let popularity = match self.popularity {
            Popularity::Decayed => PopularityWeighting::Decayed,
            Popularity::Raw => PopularityWeighting::Raw,
        };

        let mut options = RecommenderOptions::new()
            .with_decay_rate(self.decay_rate)
            .with_window_days(window)
            .with_strict(self.strict)
            .with_factors(self.factors)
            .with_iterations(self.iterations)
            .with_regularization(self.regularization)
            .with_alpha(self.alpha)
            .with_seed(self.seed)
            .with_sizes(ListSizes {
                history: self.history_size,
                discovery: self.discovery_size,
                related: self.related_size,
                popular: self.popular_size,
            })
            .with_popularity(popularity)
            .with_key_prefix(self.key_prefix.clone())
            .with_expire_seconds(self.expire_seconds)
            .with_batch_size(self.batch_size);

        if let Some(reference) = self.reference {
            options = options.with_reference(reference);
        }

        options
    }
}

fn run(args: &Args) -> Result<RunSummary, RecommenderError> {
    let options = args.options();
    options.validate()?;

    let events = read_events(&args.events_file)?;

    let mut sink: Box<dyn ListSink> = if args.dry_run {
        info!("Dry run, lists stay in memory");
        Box::new(MemorySink::new())
    } else {
        Box::new(RedisSink::connect(&args.redis_url).map_err(PublishError::Connect)?)
    };

    run_batch(events, &options, sink.as_mut())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(summary) => info!("Batch complete in {:.2?}", summary.elapsed),
        Err(e) => {
            // The message already carries every cause
            error!("Batch run failed: {}", e);
            process::exit(1);
        }
    }
}
