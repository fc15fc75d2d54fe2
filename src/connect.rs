//! Connect flow
//!
//! Sequences one handshake: fresh session, bound listener, authorization URL,
//! single callback, token exchange, registry update.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use crate::Result;
use crate::auth::{
    build_authorize_url, AuthorizeParams, CallbackHandler, CallbackListener, Connected,
    HttpTokenClient, PendingCallback, Session, TokenExchanger,
};
use crate::config::Config;
use crate::environments::{EnvironmentStore, MergeOutcome};
use crate::ui;

/// Time given to the browser response before the listener is torn down
pub const GRACE_PERIOD: Duration = Duration::from_millis(500);

/// A connect attempt whose listener is bound and waiting for the redirect
pub struct ConnectAttempt {
    pub auth_url: String,
    pub callback_addr: SocketAddr,
    pending: PendingCallback,
    timeout: Option<Duration>,
}

impl ConnectAttempt {
    /// Bind the callback listener and prepare the authorization URL.
    ///
    /// Fails with a bind error before any URL is produced when the port is taken.
    pub async fn start(config: &Config, alias: &str, exchanger: Arc<dyn TokenExchanger>) -> Result<Self> {
        let session = Session::new();
        tracing::debug!("New session {:?}", session);

        let authorize_endpoint = config.authorize_endpoint();
        let auth_url = build_authorize_url(&AuthorizeParams::new(config, &authorize_endpoint, &session))?;

        let listener = CallbackListener::bind(config.callback_port, config.callback_path()).await?;
        let callback_addr = listener.local_addr()?;
        tracing::info!("Callback listener bound on {}", callback_addr);

        let store = EnvironmentStore::new(config.environments_path());
        let handler = CallbackHandler::new(session, alias, exchanger, store);

        Ok(Self {
            auth_url,
            callback_addr,
            pending: listener.spawn(handler),
            timeout: config.callback_timeout(),
        })
    }

    /// Wait for the handshake, then give the browser response time to flush
    pub async fn finish(self) -> Result<Connected> {
        let result = self.pending.wait(self.timeout).await;
        tokio::time::sleep(GRACE_PERIOD).await;
        result
    }
}

/// Run the full connect flow for `alias` against the configured provider
pub async fn connect(config: &Config, alias: &str, open_browser: bool) -> Result<Connected> {
    ui::print_header("Connect");
    ui::print_step(&format!("Environment alias: {}", alias));
    ui::print_step(&format!("Login URL: {}", config.login_url));

    let exchanger = Arc::new(HttpTokenClient::from_config(config));
    let attempt = ConnectAttempt::start(config, alias, exchanger).await?;

    ui::print_step(&format!("Callback listening on {}", config.redirect_uri));
    println!("\nOpen this URL in a browser to connect the org:");
    ui::print_url(&attempt.auth_url);

    if open_browser {
        if let Err(e) = open::that(&attempt.auth_url) {
            tracing::warn!("Failed to open browser: {}", e);
            ui::print_warning("Could not open a browser, copy the URL above instead");
        }
    }

    match config.callback_timeout() {
        Some(limit) => ui::print_thinking(&format!("Waiting up to {}s for the login to complete", limit.as_secs())),
        None => ui::print_thinking("Waiting for the login to complete"),
    }

    let connected = attempt.finish().await?;
    let org = connected.record.org_id.as_deref().unwrap_or("unknown org");
    match connected.outcome {
        MergeOutcome::Updated(_) => ui::print_success(&format!(
            "Environment \"{} | {}\" already existed, record updated",
            org, connected.record.instance_url
        )),
        MergeOutcome::Added => ui::print_success(&format!(
            "Environment \"{} | {}\" added",
            org, connected.record.instance_url
        )),
    }

    Ok(connected)
}
