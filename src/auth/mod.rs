//! OAuth2 Authorization Code + PKCE handshake
//!
//! This module provides:
//! - PKCE verifier/challenge/state generation and the per-attempt session
//! - Authorization URL construction
//! - The single-use callback listener
//! - The authorization code to token exchange

mod pkce;
mod authorize;
mod token_exchange;
mod callback_server;

pub use pkce::{Session, generate_code_verifier, generate_code_challenge, generate_state, CHALLENGE_METHOD};
pub use authorize::{AuthorizeParams, build_authorize_url};
pub use token_exchange::{TokenExchanger, HttpTokenClient, TokenResponse, org_id_from_identity_url};
pub use callback_server::{CallbackHandler, CallbackListener, CallbackParams, Connected, PendingCallback};
