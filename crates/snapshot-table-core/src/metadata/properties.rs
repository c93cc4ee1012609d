//! Typed view over table properties.
//!
//! Properties are stored as a string map in table metadata. [`TableProperties`]
//! parses the keys this crate understands and supplies defaults for missing
//! ones; unknown keys are carried through untouched.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use snafu::prelude::*;

/// Retries after the first commit attempt.
pub const COMMIT_NUM_RETRIES: &str = "commit.retry.num-retries";
/// Initial backoff between commit attempts, in milliseconds.
pub const COMMIT_MIN_RETRY_WAIT_MS: &str = "commit.retry.min-wait-ms";
/// Backoff cap between commit attempts, in milliseconds.
pub const COMMIT_MAX_RETRY_WAIT_MS: &str = "commit.retry.max-wait-ms";
/// Number of previous metadata files tracked in the metadata log.
pub const METADATA_PREVIOUS_VERSIONS_MAX: &str = "write.metadata.previous-versions-max";
/// Manifests read concurrently while planning a scan.
pub const MANIFEST_READ_CONCURRENCY: &str = "read.manifest.concurrency";

const DEFAULT_NUM_RETRIES: u32 = 4;
const DEFAULT_MIN_WAIT_MS: u64 = 100;
const DEFAULT_MAX_WAIT_MS: u64 = 10_000;
const DEFAULT_PREVIOUS_VERSIONS_MAX: usize = 100;
const DEFAULT_MANIFEST_READ_CONCURRENCY: usize = 8;

/// A property value that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("Invalid value {value:?} for table property {key}: {reason}"))]
pub struct PropertyError {
    /// Property key.
    pub key: String,
    /// Offending value.
    pub value: String,
    /// Expected form.
    pub reason: String,
}

/// Parsed table properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    num_retries: Option<u32>,
    min_retry_wait_ms: Option<u64>,
    max_retry_wait_ms: Option<u64>,
    previous_versions_max: Option<usize>,
    manifest_read_concurrency: Option<NonZeroUsize>,
}

fn parse<T: std::str::FromStr>(
    props: &BTreeMap<String, String>,
    key: &str,
    reason: &str,
) -> Result<Option<T>, PropertyError> {
    props
        .get(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| PropertyError {
                key: key.to_string(),
                value: v.clone(),
                reason: reason.to_string(),
            })
        })
        .transpose()
}

impl TableProperties {
    /// Parse the known keys out of a property map.
    pub fn try_from_map(props: &BTreeMap<String, String>) -> Result<Self, PropertyError> {
        let parsed = Self {
            num_retries: parse(props, COMMIT_NUM_RETRIES, "expected a non-negative integer")?,
            min_retry_wait_ms: parse(props, COMMIT_MIN_RETRY_WAIT_MS, "expected milliseconds")?,
            max_retry_wait_ms: parse(props, COMMIT_MAX_RETRY_WAIT_MS, "expected milliseconds")?,
            previous_versions_max: parse(
                props,
                METADATA_PREVIOUS_VERSIONS_MAX,
                "expected a non-negative integer",
            )?,
            manifest_read_concurrency: parse(
                props,
                MANIFEST_READ_CONCURRENCY,
                "expected a positive integer",
            )?,
        };
        if let (Some(min), Some(max)) = (parsed.min_retry_wait_ms, parsed.max_retry_wait_ms) {
            ensure!(
                min <= max,
                PropertySnafu {
                    key: COMMIT_MAX_RETRY_WAIT_MS,
                    value: max.to_string(),
                    reason: format!("must not be smaller than {COMMIT_MIN_RETRY_WAIT_MS}"),
                }
            );
        }
        Ok(parsed)
    }

    /// Commit attempts in total: one plus the configured retries.
    pub fn commit_max_attempts(&self) -> u32 {
        self.num_retries
            .unwrap_or(DEFAULT_NUM_RETRIES)
            .saturating_add(1)
    }

    /// Backoff before retry number `retry` (1-based), doubling from the
    /// minimum wait and capped at the maximum.
    pub fn commit_backoff(&self, retry: u32) -> Duration {
        let min = self.min_retry_wait_ms.unwrap_or(DEFAULT_MIN_WAIT_MS);
        let max = self
            .max_retry_wait_ms
            .unwrap_or(DEFAULT_MAX_WAIT_MS)
            .max(min);
        let factor = 1u64
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(min.saturating_mul(factor).min(max))
    }

    /// How many previous metadata files the metadata log keeps.
    pub fn previous_versions_max(&self) -> usize {
        self.previous_versions_max
            .unwrap_or(DEFAULT_PREVIOUS_VERSIONS_MAX)
    }

    /// Concurrent manifest reads during scan planning.
    pub fn manifest_read_concurrency(&self) -> usize {
        self.manifest_read_concurrency
            .map(NonZeroUsize::get)
            .unwrap_or(DEFAULT_MANIFEST_READ_CONCURRENCY)
    }
}
