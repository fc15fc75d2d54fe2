//! Authorization request URL
//!
//! Builds the provider-facing authorize URL the operator opens in a browser.

use url::Url;
use crate::Result;
use crate::config::Config;
use crate::error::Error;
use super::pkce::{Session, CHALLENGE_METHOD};

/// Inputs of the authorize URL
#[derive(Debug, Clone)]
pub struct AuthorizeParams<'a> {
    pub authorize_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a str,
    pub code_challenge: &'a str,
    pub state: &'a str,
}

impl<'a> AuthorizeParams<'a> {
    pub fn new(config: &'a Config, authorize_endpoint: &'a str, session: &'a Session) -> Self {
        Self {
            authorize_endpoint,
            client_id: &config.client_id,
            redirect_uri: &config.redirect_uri,
            scopes: &config.scopes,
            code_challenge: &session.code_challenge,
            state: &session.state,
        }
    }
}

/// Build the authorization URL
///
/// `prompt=login` forces the provider to re-authenticate instead of silently
/// reusing an existing browser session.
pub fn build_authorize_url(params: &AuthorizeParams<'_>) -> Result<String> {
    let mut url = Url::parse(params.authorize_endpoint)
        .map_err(|e| Error::Config(format!("Invalid authorize URL {}: {}", params.authorize_endpoint, e)))?;

    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", params.client_id)
        .append_pair("redirect_uri", params.redirect_uri)
        .append_pair("scope", params.scopes)
        .append_pair("code_challenge", params.code_challenge)
        .append_pair("code_challenge_method", CHALLENGE_METHOD)
        .append_pair("state", params.state)
        .append_pair("prompt", "login");

    Ok(url.to_string())
}
