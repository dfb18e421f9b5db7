use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::{Error, Result};

const USER_AGENT: &str = concat!("sweet-notify/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another component installed a provider first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client shared by the push senders.
///
/// `request_timeout` bounds each request end to end; `Duration::ZERO` leaves
/// it unbounded.
pub fn build_push_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90));

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder
        .build()
        .map_err(|e| Error::Other(format!("Failed to build reqwest client: {}", e)))
}
