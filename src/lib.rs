//! Rust implementation of the Agent Payments Protocol (AP2).
//!
//! AP2 is a trust and authorization fabric for AI-agent-initiated commerce:
//! a shopping agent acts for a user, merchants commit to carts, and a payment
//! processor captures funds — with every party holding cryptographic evidence
//! of what the user authorized, what the merchant committed to, and that the
//! committed cart is exactly what is being charged.
//!
//! The heart of the system is the **mandate chain** — three signed,
//! content-addressed credentials defined in the [`ap2-types`](ap2_types)
//! crate — carried between services over signed A2A envelopes and verified
//! end to end by the payment processor.
//!
//! # Modules
//!
//! - [`crypto`] — canonical hashing, key storage, JWTs, SD-JWT+KB, WebAuthn
//! - [`did_resolver`] — `did:ap2:*` resolution: cache, local registry, HTTP
//! - [`a2a`] — envelope signing, replay defense, dispatch, and the client
//! - [`risk`] — the deterministic risk engine shared by agent and processor
//! - [`services`] — the seven cooperating services, one HTTP surface each
//! - [`catalog`] — the demo product catalog behind the merchant agent
//! - [`store`] — TTL'd in-process stores for all shared mutable state
//! - [`config`] — roles, endpoints, key locations, passphrases
//! - [`receipt`] — minimal PDF receipt rendering
//! - [`telemetry`] — structured logging setup
//!
//! # Running
//!
//! The single binary serves any role: `ap2-rs keygen` provisions encrypted
//! keys and DID documents, then `ap2-rs serve --role merchant-agent` (etc.)
//! starts one service per process.

pub mod a2a;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod did_resolver;
pub mod error;
pub mod receipt;
pub mod risk;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod util;
