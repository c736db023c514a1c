//! # Sitelink Daemon
//!
//! Issuer side of site grants. The daemon watches the grant store, keeps
//! every record normalized, and serves `POST /<uid>` redemptions that hand
//! a joining site its link and client credential.
//!
//! ## Layout
//!
//! - [`store`] - durable grant records with optimistic versioning
//! - [`registry`] - in-process cache and atomic redemption
//! - [`watch`] - store polling feeding the manager
//! - [`manager`] - redemption URL/CA sourcing and server lifecycle
//! - [`services`] - the HTTP redemption handler and its rate limit
//! - [`server`] - accept loop, TLS termination
//! - [`generator`] - credential bundle minting
//! - [`resolver`] - externally reachable addresses per ingress strategy
//! - [`tls`] - site authority and server TLS configuration
//! - [`config`] - command line and environment options

pub mod config;
pub mod generator;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod server;
pub mod services;
pub mod store;
pub mod tls;
pub mod watch;
