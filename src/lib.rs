//! # tlsfactory
//!
//! Remote factory for TLS server endpoints, used to drive handshake test matrices.
//!
//! A test driver talks to the factory over a newline-delimited JSON RPC and asks it
//! to provision secure endpoints, each with its own trust anchors, identity,
//! client-certificate policy, protocol/cipher restrictions and expected peer
//! identity. Every connection attempt on an endpoint is recorded as a
//! [`HandshakeOutcome`](endpoint::HandshakeOutcome) the driver can pull back.
//!
//! ## Key Modules
//! * `security` – security configuration, failure classification, client probe.
//! * `endpoint` – secure endpoint lifecycle, handshake observer, registry.
//! * `factory` – the remotely invokable facade.
//! * `network` – factory RPC listener, client and wire messages.
//! * `events` – structured logging/events dispatcher.
//! * `config` – process configuration (TOML).

pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod factory;
pub mod network;
pub mod prelude; // curated re-exports for drivers and tests
pub mod security;
