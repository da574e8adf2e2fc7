//! Kubernetes client construction
//!
//! Proxies come from the kubeconfig or the standard environment variables
//! (`HTTPS_PROXY`, `HTTP_PROXY`, `NO_PROXY`). Internal API servers are
//! reached directly even when a proxy is configured, unless `NO_PROXY`
//! already says so.

use anyhow::{Context, Result};
use kube::{Client, Config};
use tracing::debug;
use url::Url;

/// Initialize and return a Kubernetes client
///
/// Uses the default loading strategy: in-cluster config, then
/// `KUBECONFIG`, then `~/.kube/config`.
pub async fn create_client() -> Result<Client> {
    let mut config = Config::infer()
        .await
        .context("Failed to load Kubernetes configuration")?;

    let no_proxy = std::env::var("NO_PROXY")
        .or_else(|_| std::env::var("no_proxy"))
        .unwrap_or_default();
    if let Ok(url) = Url::parse(&config.cluster_url.to_string()) {
        if let Some(host) = url.host_str() {
            if config.proxy_url.is_some() && should_bypass_proxy(host, &no_proxy) {
                debug!(host = %host, "Bypassing proxy for internal API server");
                config.proxy_url = None;
            }
        }
    }

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// True when `host` should be reached without the proxy.
fn should_bypass_proxy(host: &str, no_proxy: &str) -> bool {
    is_internal_host(host) || no_proxy_contains(no_proxy, host)
}

/// Private addresses, loopback and cluster-internal DNS names.
fn is_internal_host(host: &str) -> bool {
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
            std::net::IpAddr::V6(v6) => v6.is_loopback(),
        };
    }
    if host == "localhost" {
        return true;
    }

    const INTERNAL_SUFFIXES: &[&str] = &[".local", ".internal", ".svc", ".corp"];
    INTERNAL_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Check a comma-separated NO_PROXY list against `host`.
///
/// `example.com` and `.example.com` both cover the domain and its
/// subdomains; `*` covers everything.
fn no_proxy_contains(no_proxy: &str, host: &str) -> bool {
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|pattern| {
            if pattern == "*" {
                return true;
            }
            let domain = pattern.strip_prefix('.').unwrap_or(pattern);
            host == domain || host.ends_with(&format!(".{}", domain))
        })
}
