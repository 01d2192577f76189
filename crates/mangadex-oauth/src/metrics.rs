//! Token lifecycle counters
//!
//! - `oauth_token_requests_total` (counter): labels `grant`, `outcome`
//! - `oauth_token_persist_failures_total` (counter): label `grant`
//!
//! The library only records; installing an exporter is up to the binary.

use mangadex_auth::{Error, Grant};

/// Outcome label for a finished token endpoint call.
pub fn outcome_label<T>(result: &Result<T, Error>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(Error::Transport(_)) => "transport_error",
        Err(Error::AuthRequestFailed(_)) => "rejected",
        Err(Error::Decode(_)) => "decode_error",
        Err(_) => "error",
    }
}

pub fn record_token_request(grant: Grant, outcome: &'static str) {
    metrics::counter!(
        "oauth_token_requests_total",
        "grant" => grant.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_persist_failure(grant: Grant) {
    metrics::counter!("oauth_token_persist_failures_total", "grant" => grant.as_str())
        .increment(1);
}
