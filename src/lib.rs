//! Credential lifecycle for the pingcli PingOne command line tool.
//!
//! - [`config`] - Layered configuration (TOML file plus `PINGCLI_*` environment overrides)
//! - [`oauth`] - Grant flows, token caching and the token source resolver
//! - [`client`] - Authenticated PingOne API client handle

pub mod client;
pub mod config;
pub mod oauth;
