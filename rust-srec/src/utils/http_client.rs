//! Shared `reqwest` client construction: rustls crypto provider install plus
//! proxy configuration sourced from the `PROXY` environment variable.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::{debug, warn};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Proxy configuration resolved from the environment, applied uniformly to
/// the preflight client, the Info API's probe client, and any extractor
/// invocation's inherited `HTTP_PROXY`/`HTTPS_PROXY`.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: Option<String>,
}

impl ProxyConfig {
    /// Read from the `PROXY` environment variable.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("PROXY").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Apply `proxy_config` to a `reqwest::ClientBuilder`. No URL means "use
/// whatever reqwest's own env/system defaults resolve to".
pub fn apply_proxy_config(
    mut builder: reqwest::ClientBuilder,
    proxy_config: &ProxyConfig,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_config.url.as_deref() else {
        return builder;
    };
    match reqwest::Proxy::all(url) {
        Ok(proxy) => {
            builder = builder.proxy(proxy);
        }
        Err(error) => {
            warn!(proxy_url = %url, error = %error, "invalid proxy url; ignoring");
        }
    }
    builder
}

/// Build the shared probe/preflight HTTP client.
pub fn build_client(proxy_config: &ProxyConfig, request_timeout: Duration) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().timeout(request_timeout);
    builder = apply_proxy_config(builder, proxy_config);

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "failed to build configured http client; using defaults");
        reqwest::Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_config_defaults_to_none() {
        assert!(ProxyConfig::default().url.is_none());
    }

    #[test]
    fn apply_proxy_config_is_noop_without_url() {
        let builder = reqwest::Client::builder();
        let proxy_config = ProxyConfig::default();
        // Should not panic and should still be buildable.
        let built = apply_proxy_config(builder, &proxy_config).build();
        assert!(built.is_ok());
    }
}
