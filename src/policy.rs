// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Upstream access policy.
//!
//! Two pieces of injectable configuration govern how the proxy talks to the
//! upstream:
//!
//! - [`HostAllowList`] decides which hosts the generic proxy route may reach.
//! - [`RetryPolicy`] lists the attempts the fetcher makes, each with its own
//!   timeout and the pause that follows a failed attempt.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

pub const TCE_HOST: &str = "api.tce.ce.gov.br";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("retry policy must have at least one attempt")]
    EmptyRetryPolicy,
    #[error("retry attempt {index} has a zero timeout")]
    ZeroTimeout { index: usize },
    #[error("invalid retry attempt '{0}', expected timeout_ms:delay_ms")]
    InvalidRetrySpec(String),
    #[error("allow-list must contain at least one host")]
    EmptyAllowList,
}

/// Set of hostnames the proxy route may forward to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAllowList {
    hosts: BTreeSet<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: BTreeSet<String> = hosts
            .into_iter()
            .map(|host| normalize_host(host.as_ref()))
            .filter(|host| !host.is_empty())
            .collect();

        if hosts.is_empty() {
            return Err(PolicyError::EmptyAllowList);
        }

        Ok(Self { hosts })
    }

    /// Parse a comma-separated host list.
    pub fn from_csv(raw: &str) -> Result<Self, PolicyError> {
        Self::new(raw.split(','))
    }

    pub fn permits(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.hosts.contains(&normalize_host(host)))
            .unwrap_or(false)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

impl Default for HostAllowList {
    fn default() -> Self {
        Self {
            hosts: BTreeSet::from([TCE_HOST.to_string()]),
        }
    }
}

impl fmt::Display for HostAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.hosts().collect::<Vec<_>>().join(", ");
        f.write_str(&joined)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// One upstream attempt: how long to wait for it and how long to pause after
/// it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub timeout: Duration,
    pub delay: Duration,
}

impl RetryAttempt {
    pub fn new(timeout: Duration, delay: Duration) -> Self {
        Self { timeout, delay }
    }
}

/// Ordered, non-empty list of attempts. The delay of the last attempt is
/// never slept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: Vec<RetryAttempt>,
}

impl RetryPolicy {
    pub fn new(attempts: Vec<RetryAttempt>) -> Result<Self, PolicyError> {
        if attempts.is_empty() {
            return Err(PolicyError::EmptyRetryPolicy);
        }

        if let Some(index) = attempts.iter().position(|a| a.timeout.is_zero()) {
            return Err(PolicyError::ZeroTimeout { index });
        }

        Ok(Self { attempts })
    }

    /// A single attempt with no retry.
    pub fn single(timeout: Duration) -> Result<Self, PolicyError> {
        Self::new(vec![RetryAttempt::new(timeout, Duration::ZERO)])
    }

    /// Attempts with the given timeouts and no pause in between.
    pub fn without_delays(timeouts: &[Duration]) -> Result<Self, PolicyError> {
        Self::new(
            timeouts
                .iter()
                .map(|timeout| RetryAttempt::new(*timeout, Duration::ZERO))
                .collect(),
        )
    }

    /// Parse `timeout_ms:delay_ms` pairs separated by commas, e.g.
    /// `12000:800,20000:1500,30000:0`. A bare `timeout_ms` means no delay.
    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        let attempts = raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_attempt)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(attempts)
    }

    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Worst-case wall time: every attempt times out and every pause between
    /// attempts is slept.
    pub fn worst_case(&self) -> Duration {
        let timeouts: Duration = self.attempts.iter().map(|a| a.timeout).sum();
        let pauses: Duration = self.attempts[..self.attempts.len() - 1]
            .iter()
            .map(|a| a.delay)
            .sum();
        timeouts + pauses
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: vec![
                RetryAttempt::new(Duration::from_millis(12_000), Duration::from_millis(800)),
                RetryAttempt::new(Duration::from_millis(20_000), Duration::from_millis(1_500)),
                RetryAttempt::new(Duration::from_millis(30_000), Duration::ZERO),
            ],
        }
    }
}

fn parse_attempt(item: &str) -> Result<RetryAttempt, PolicyError> {
    let invalid = || PolicyError::InvalidRetrySpec(item.to_string());

    let (timeout, delay) = match item.split_once(':') {
        Some((timeout, delay)) => (timeout.trim(), delay.trim()),
        None => (item, "0"),
    };

    let timeout: u64 = timeout.parse().map_err(|_| invalid())?;
    let delay: u64 = delay.parse().map_err(|_| invalid())?;

    Ok(RetryAttempt::new(
        Duration::from_millis(timeout),
        Duration::from_millis(delay),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn default_allow_list_only_permits_tce() {
        let allow = HostAllowList::default();
        assert!(allow.permits(&url("https://api.tce.ce.gov.br/index.php/sim/1_0/municipios.json")));
        assert!(allow.permits(&url("https://API.TCE.CE.GOV.BR/x")));
        assert!(!allow.permits(&url("https://evil.example.com/data")));
        assert!(!allow.permits(&url("https://api.tce.ce.gov.br.evil.example.com/")));
        assert!(!allow.permits(&url("https://user@evil.example.com/?h=api.tce.ce.gov.br")));
    }

    #[test]
    fn allow_list_from_csv() {
        let allow = HostAllowList::from_csv(" api.tce.ce.gov.br , Mirror.Example.org ,").unwrap();
        assert!(allow.permits(&url("https://mirror.example.org/a")));
        assert_eq!(allow.to_string(), "api.tce.ce.gov.br, mirror.example.org");
        assert_eq!(HostAllowList::from_csv(" , "), Err(PolicyError::EmptyAllowList));
    }

    #[test]
    fn parse_retry_policy() {
        let policy = RetryPolicy::parse("100:10, 200:20,300").unwrap();
        assert_eq!(
            policy.attempts(),
            &[
                RetryAttempt::new(Duration::from_millis(100), Duration::from_millis(10)),
                RetryAttempt::new(Duration::from_millis(200), Duration::from_millis(20)),
                RetryAttempt::new(Duration::from_millis(300), Duration::ZERO),
            ]
        );
    }

    #[test]
    fn reject_bad_retry_policies() {
        assert_eq!(RetryPolicy::parse(""), Err(PolicyError::EmptyRetryPolicy));
        assert_eq!(
            RetryPolicy::parse("100:x"),
            Err(PolicyError::InvalidRetrySpec("100:x".into()))
        );
        assert_eq!(
            RetryPolicy::parse("100:0,0:5"),
            Err(PolicyError::ZeroTimeout { index: 1 })
        );
    }

    #[test]
    fn worst_case_skips_last_delay() {
        let policy = RetryPolicy::parse("100:50,200:50,300:999").unwrap();
        assert_eq!(policy.worst_case(), Duration::from_millis(700));
        assert_eq!(RetryPolicy::default().len(), 3);
    }
}
