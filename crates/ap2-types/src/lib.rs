//! Core data structures for the Agent Payments Protocol (AP2).
//!
//! This crate defines the wire format and in-process representations shared by
//! every AP2 role: the mandate chain (intent, cart, payment), the W3C Payment
//! Request shapes mandates embed, the signed A2A message frame agents exchange,
//! and the canonical-JSON hashing that binds the chain together.
//!
//! # Key Types
//!
//! - [`mandate::IntentMandate`] — what a user asked to buy
//! - [`mandate::CartMandate`] — what a merchant committed to sell, plus the
//!   merchant-authorization JWT once signed
//! - [`mandate::PaymentMandate`] — what is about to be charged, plus the
//!   user-authorization SD-JWT+KB once approved
//! - [`a2a::A2aMessage`] — the signed envelope carrying mandates between agents
//! - [`canonical`] — RFC 8785 canonicalization used for all signing and hashing
//! - [`error::ErrorKind`] — the wire-level error taxonomy
//!
//! The crate contains no I/O: key handling, HTTP, and service
//! state live in the `ap2-rs` crate.

pub mod a2a;
pub mod canonical;
pub mod did;
pub mod error;
pub mod mandate;
pub mod money;
pub mod payment;
pub mod timestamp;
