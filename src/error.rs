use thiserror::Error;

use crate::pipeline::RunSummary;

/// Failure reaching the listing page. Fatal to a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

impl FetchError {
    /// Timeouts, connection drops, throttling and 5xx are worth retrying by
    /// whoever schedules the next run. Everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => source.is_timeout() || source.is_connect(),
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("setting `{key}` is not a valid URL: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// The page had no `ul.items_group` container.
#[derive(Debug, Error)]
#[error("no product list found on page")]
pub struct ListingNotFound;

/// One record could not be written. The run goes on without it.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("record {external_id} on {site} has no detail URL")]
    MissingDetailUrl { site: String, external_id: String },
    #[error("store error for {detail_url} on {site}: {source}")]
    Store {
        site: String,
        detail_url: String,
        #[source]
        source: rusqlite::Error,
    },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("fetch failed: {source}")]
    Fetch {
        #[source]
        source: FetchError,
        summary: RunSummary,
    },
    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),
}

impl RunError {
    /// Counts accumulated before the run stopped.
    pub fn summary(&self) -> RunSummary {
        match self {
            RunError::Fetch { summary, .. } => *summary,
            RunError::Store(_) => RunSummary::default(),
        }
    }
}
