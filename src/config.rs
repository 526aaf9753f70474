use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use reqwest::Url;

use crate::policy::{HostAllowList, RetryPolicy};

pub const DEFAULT_UPSTREAM_BASE: &str = "https://api.tce.ce.gov.br/index.php/sim/1_0";
pub const DEFAULT_EGRESS_URL: &str = "https://api.ipify.org";

pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub upstream_base: Url,
    pub allowed_hosts: HostAllowList,
    pub retry: RetryPolicy,
    pub egress_url: Url,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = lookup("TCE_PROXY_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("invalid TCE_PROXY_ADDR")?;

        let upstream_base = parse_url(&lookup, "TCE_PROXY_UPSTREAM_BASE", DEFAULT_UPSTREAM_BASE)?;
        let egress_url = parse_url(&lookup, "TCE_PROXY_EGRESS_URL", DEFAULT_EGRESS_URL)?;

        let allowed_hosts = match lookup("TCE_PROXY_ALLOWED_HOSTS") {
            Some(raw) => HostAllowList::from_csv(&raw).context("invalid TCE_PROXY_ALLOWED_HOSTS")?,
            None => HostAllowList::default(),
        };

        let retry = match lookup("TCE_PROXY_RETRY") {
            Some(raw) => RetryPolicy::parse(&raw).context("invalid TCE_PROXY_RETRY")?,
            None => RetryPolicy::default(),
        };

        let log_json = match lookup("TCE_PROXY_LOG_JSON") {
            Some(raw) => parse_bool(&raw).context("TCE_PROXY_LOG_JSON must be true or false")?,
            None => false,
        };

        Ok(Self {
            listen_addr,
            upstream_base,
            allowed_hosts,
            retry,
            egress_url,
            log_json,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

fn parse_url<F>(lookup: &F, env_key: &str, default: &str) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(env_key).unwrap_or_else(|| default.to_string());
    let url = Url::parse(&raw).with_context(|| format!("{env_key} must be an absolute URL"))?;

    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{env_key} must use http or https");
    }

    Ok(url)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => anyhow::bail!("unrecognized boolean '{other}'"),
    }
}
