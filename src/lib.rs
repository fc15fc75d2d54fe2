//! sfauth - connect a CLI session to Salesforce orgs
//!
//! This library implements the OAuth2 Authorization Code flow with PKCE
//! against a Salesforce login endpoint and keeps the resulting credentials
//! in a local registry keyed by organization id.

pub mod auth;
pub mod config;
pub mod connect;
pub mod environments;
pub mod error;
pub mod ui;

pub use error::{Error, Result};
