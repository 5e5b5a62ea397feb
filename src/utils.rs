//! Utility functions for the proxy rotator.

use crate::config::ProxyProvider;
use crate::error::{Error, Result};

use url::Url;

/// Format the proxy URL of a provider.
///
/// Credentials are included only when both user and password are present
/// and non-empty.
pub(crate) fn format_proxy_url(provider: &ProxyProvider) -> String {
    let user = provider.user.as_deref().filter(|u| !u.is_empty());
    let password = provider.password.as_deref().filter(|p| !p.is_empty());
    match (user, password) {
        (Some(user), Some(password)) => format!(
            "http://{}:{}@{}:{}",
            user, password, provider.host, provider.port
        ),
        _ => format!("http://{}:{}", provider.host, provider.port),
    }
}

/// Format and sanity-check the proxy URL of a provider.
pub(crate) fn proxy_url_for(provider: &ProxyProvider) -> Result<String> {
    if provider.host.trim().is_empty() {
        return Err(Error::Misconfigured(format!(
            "provider '{}' has no host",
            provider.name
        )));
    }
    let formatted = format_proxy_url(provider);
    match Url::parse(&formatted) {
        Ok(url) if url.host_str().is_some() && url.port_or_known_default().is_some() => {
            Ok(formatted)
        }
        Ok(_) => Err(Error::Misconfigured(format!(
            "provider '{}' does not describe a host and port",
            provider.name
        ))),
        Err(e) => Err(Error::Misconfigured(format!(
            "provider '{}' has an invalid proxy address: {}",
            provider.name, e
        ))),
    }
}
