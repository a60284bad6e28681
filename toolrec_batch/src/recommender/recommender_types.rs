use crate::{loader::DataError, publisher::PublishError, source::SourceError};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use thiserror::Error;
use toolrec::{DEFAULT_EXPIRE_SECONDS, KEY_PREFIX};

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
    #[error("bad interaction record: {0}")]
    Data(#[from] DataError),
    #[error("could not read interaction records: {0}")]
    Source(#[from] SourceError),
    #[error("publication failed: {0}")]
    Publish(#[from] PublishError),
}

#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("decay rate must lie strictly between 0 and 1, got {0}")]
    DecayRate(f64),
    #[error("latent dimension must be at least 1")]
    Factors,
    #[error("regularization must be finite and non-negative, got {0}")]
    Regularization(f64),
    #[error("confidence scale must be finite and non-negative, got {0}")]
    Alpha(f64),
    #[error("publication batch size must be at least 1")]
    BatchSize,
}

/// How interaction recency turns into weight
#[derive(Debug, Clone, PartialEq)]
pub struct DecayOptions {
    /// Per-day multiplicative discount, strictly between 0 and 1
    pub rate: f64,
    /// Instant the age of every record is measured from. `None` means the start of the run
    pub reference: Option<DateTime<Utc>>,
    /// Records older than this many days are dropped before aggregation. `None` keeps all
    pub window_days: Option<u32>,
    /// Fail the run on the first malformed record instead of skipping it
    pub strict: bool,
}

impl DecayOptions {
    pub const fn new() -> DecayOptions {
        DecayOptions {
            rate: 0.95,
            reference: None,
            window_days: Some(180),
            strict: false,
        }
    }
}

impl Default for DecayOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Hyperparameters of the factorization
#[derive(Debug, Clone, PartialEq)]
pub struct AlsOptions {
    /// Latent dimension k
    pub factors: usize,
    /// Ridge term applied to every row solve
    pub regularization: f64,
    /// Confidence scale, c = 1 + alpha * weight
    pub alpha: f64,
    pub iterations: usize,
    /// Seed of the initial factor draw. Same seed, same model
    pub seed: u64,
}

impl AlsOptions {
    pub const fn new() -> AlsOptions {
        AlsOptions {
            factors: 64,
            regularization: 0.05,
            alpha: 40.0,
            iterations: 20,
            seed: 42,
        }
    }
}

impl Default for AlsOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Where popularity weight comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopularityWeighting {
    /// Sum of the same decayed weights the history lists use
    Decayed,
    /// Sum of raw interaction counts
    Raw,
}

/// Top-N of each list kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSizes {
    pub history: usize,
    pub discovery: usize,
    pub related: usize,
    pub popular: usize,
}

impl ListSizes {
    pub const fn new() -> ListSizes {
        ListSizes {
            history: 4,
            discovery: 8,
            related: 5,
            popular: 10,
        }
    }
}

impl Default for ListSizes {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub key_prefix: Cow<'static, str>,
    pub expire_seconds: u64,
    /// Maximum number of lists written per round trip
    pub batch_size: usize,
}

impl PublishOptions {
    pub const fn new() -> PublishOptions {
        PublishOptions {
            key_prefix: Cow::Borrowed(KEY_PREFIX),
            expire_seconds: DEFAULT_EXPIRE_SECONDS,
            batch_size: 1000,
        }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a batch run is configured by. Built once, then handed to each stage by reference
#[derive(Debug, Clone, PartialEq)]
pub struct RecommenderOptions {
    pub decay: DecayOptions,
    pub als: AlsOptions,
    pub sizes: ListSizes,
    pub popularity: PopularityWeighting,
    pub publish: PublishOptions,
}

impl RecommenderOptions {
    /// Create an options instance with the default options
    pub const fn new() -> RecommenderOptions {
        RecommenderOptions {
            decay: DecayOptions::new(),
            als: AlsOptions::new(),
            sizes: ListSizes::new(),
            popularity: PopularityWeighting::Decayed,
            publish: PublishOptions::new(),
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        let rate = self.decay.rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(OptionsError::DecayRate(rate));
        }
        if self.als.factors == 0 {
            return Err(OptionsError::Factors);
        }
        let lambda = self.als.regularization;
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(OptionsError::Regularization(lambda));
        }
        let alpha = self.als.alpha;
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(OptionsError::Alpha(alpha));
        }
        if self.publish.batch_size == 0 {
            return Err(OptionsError::BatchSize);
        }

        Ok(())
    }

    pub fn with_decay_rate(mut self, new_rate: f64) -> RecommenderOptions {
        self.decay.rate = new_rate;
        self
    }

    pub fn with_reference(mut self, new_reference: DateTime<Utc>) -> RecommenderOptions {
        self.decay.reference = Some(new_reference);
        self
    }

    pub fn with_window_days(mut self, new_window: Option<u32>) -> RecommenderOptions {
        self.decay.window_days = new_window;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> RecommenderOptions {
        self.decay.strict = strict;
        self
    }

    pub fn with_factors(mut self, new_factors: usize) -> RecommenderOptions {
        self.als.factors = new_factors;
        self
    }

    pub fn with_regularization(mut self, new_regularization: f64) -> RecommenderOptions {
        self.als.regularization = new_regularization;
        self
    }

    pub fn with_alpha(mut self, new_alpha: f64) -> RecommenderOptions {
        self.als.alpha = new_alpha;
        self
    }

    pub fn with_iterations(mut self, new_iterations: usize) -> RecommenderOptions {
        self.als.iterations = new_iterations;
        self
    }

    pub fn with_seed(mut self, new_seed: u64) -> RecommenderOptions {
        self.als.seed = new_seed;
        self
    }

    pub fn with_sizes(mut self, new_sizes: ListSizes) -> RecommenderOptions {
        self.sizes = new_sizes;
        self
    }

    pub fn with_popularity(mut self, weighting: PopularityWeighting) -> RecommenderOptions {
        self.popularity = weighting;
        self
    }

    pub fn with_key_prefix(mut self, new_prefix: impl Into<Cow<'static, str>>) -> RecommenderOptions {
        self.publish.key_prefix = new_prefix.into();
        self
    }

    pub fn with_expire_seconds(mut self, new_expiry: u64) -> RecommenderOptions {
        self.publish.expire_seconds = new_expiry;
        self
    }

    pub fn with_batch_size(mut self, new_batch_size: usize) -> RecommenderOptions {
        self.publish.batch_size = new_batch_size;
        self
    }
}

impl Default for RecommenderOptions {
    fn default() -> Self {
        Self::new()
    }
}
