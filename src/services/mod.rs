//! The seven cooperating AP2 services.
//!
//! Each module owns one role's state and HTTP surface:
//!
//! - [`shopping_agent`] — orchestrates intent → carts → passkey → payment
//! - [`merchant_agent`] — plans carts and collects merchant signatures
//! - [`merchant`] — the merchant signing service and its approval machine
//! - [`processor`] — verifies the mandate chain and captures funds
//! - [`credential_provider`] — passkeys, tokenized methods, issuer JWTs
//! - [`network`] — the simulated card network: tokenize and charge

pub mod credential_provider;
pub mod merchant;
pub mod merchant_agent;
pub mod network;
pub mod processor;
pub mod shopping_agent;
