//! Configuration for the AP2 services.
//!
//! One binary serves every role; `--role` picks which service a process runs.
//! Values come from an optional JSON config file with serde defaults that
//! fall back to environment variables (`AP2_KEYS_DIRECTORY`,
//! `AP2_<ROLE>_PASSPHRASE`, `MERCHANT_AI_MODE`, `DATABASE_URL`, `REDIS_URL`,
//! `HOST`, `PORT`), then to hardcoded defaults matching the Docker-style
//! service names.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use url::Url;

use ap2_types::did::{Did, DidRole};

use crate::services::merchant::SignMode;

/// Which service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceRole {
    ShoppingAgent,
    MerchantAgent,
    Merchant,
    Processor,
    CredentialProvider,
    Network,
}

impl ServiceRole {
    /// The conventional port for this role.
    pub fn default_port(&self) -> u16 {
        match self {
            ServiceRole::ShoppingAgent => 8001,
            ServiceRole::MerchantAgent => 8002,
            ServiceRole::Merchant => 8003,
            ServiceRole::Processor => 8004,
            ServiceRole::CredentialProvider => 8005,
            ServiceRole::Network => 8006,
        }
    }

    /// The `AP2_<ROLE>_PASSPHRASE` variable guarding this role's key.
    pub fn passphrase_var(&self) -> &'static str {
        match self {
            ServiceRole::ShoppingAgent => "AP2_SHOPPING_AGENT_PASSPHRASE",
            ServiceRole::MerchantAgent => "AP2_MERCHANT_AGENT_PASSPHRASE",
            ServiceRole::Merchant => "AP2_MERCHANT_PASSPHRASE",
            ServiceRole::Processor => "AP2_PROCESSOR_PASSPHRASE",
            ServiceRole::CredentialProvider => "AP2_CP_PASSPHRASE",
            ServiceRole::Network => "AP2_NETWORK_PASSPHRASE",
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceRole::ShoppingAgent => "shopping-agent",
            ServiceRole::MerchantAgent => "merchant-agent",
            ServiceRole::Merchant => "merchant",
            ServiceRole::Processor => "payment-processor",
            ServiceRole::CredentialProvider => "credential-provider",
            ServiceRole::Network => "payment-network",
        }
    }

    /// Roles that hold a signing identity (the network does not).
    pub fn needs_key(&self) -> bool {
        !matches!(self, ServiceRole::Network)
    }
}

/// Peer base URLs, defaulting to Docker-style DNS names.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    #[serde(default = "endpoint_defaults::shopping_agent")]
    pub shopping_agent: Url,
    #[serde(default = "endpoint_defaults::merchant_agent")]
    pub merchant_agent: Url,
    #[serde(default = "endpoint_defaults::merchant")]
    pub merchant: Url,
    #[serde(default = "endpoint_defaults::processor")]
    pub processor: Url,
    #[serde(default = "endpoint_defaults::credential_provider")]
    pub credential_provider: Url,
    #[serde(default = "endpoint_defaults::network")]
    pub network: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            shopping_agent: endpoint_defaults::shopping_agent(),
            merchant_agent: endpoint_defaults::merchant_agent(),
            merchant: endpoint_defaults::merchant(),
            processor: endpoint_defaults::processor(),
            credential_provider: endpoint_defaults::credential_provider(),
            network: endpoint_defaults::network(),
        }
    }
}

mod endpoint_defaults {
    use url::Url;

    fn parse(default: &str) -> Url {
        default.parse().expect("static URL literal")
    }
    pub fn shopping_agent() -> Url {
        parse("http://shopping_agent:8001/")
    }
    pub fn merchant_agent() -> Url {
        parse("http://merchant_agent:8002/")
    }
    pub fn merchant() -> Url {
        parse("http://merchant:8003/")
    }
    pub fn processor() -> Url {
        parse("http://payment_processor:8004/")
    }
    pub fn credential_provider() -> Url {
        parse("http://credential_provider:8005/")
    }
    pub fn network() -> Url {
        parse("http://payment_network:8006/")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::host")]
    pub host: IpAddr,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "config_defaults::keys_directory")]
    pub keys_directory: PathBuf,
    #[serde(default = "config_defaults::rp_id")]
    pub rp_id: String,
    #[serde(default = "config_defaults::merchant_mode")]
    pub merchant_mode: SignMode,
    #[serde(default = "config_defaults::merchant_name")]
    pub merchant_name: String,
    #[serde(default = "config_defaults::merchant_id")]
    pub merchant_id: String,
    #[serde(default = "config_defaults::credential_provider_id")]
    pub credential_provider_id: String,
    #[serde(default = "config_defaults::network_name")]
    pub network_name: String,
    /// Accepted for deployment parity; the reference stores are in-process.
    #[serde(default = "config_defaults::database_url")]
    pub database_url: Option<String>,
    #[serde(default = "config_defaults::redis_url")]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

mod config_defaults {
    use std::env;
    use std::net::IpAddr;
    use std::path::PathBuf;

    use crate::services::merchant::SignMode;

    pub fn host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|h| h.parse().ok())
            .unwrap_or_else(|| "0.0.0.0".parse().expect("static IP literal"))
    }

    pub fn keys_directory() -> PathBuf {
        env::var("AP2_KEYS_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./keys"))
    }

    pub fn rp_id() -> String {
        env::var("AP2_RP_ID").unwrap_or_else(|_| "localhost".to_string())
    }

    pub fn merchant_mode() -> SignMode {
        match env::var("MERCHANT_AI_MODE").as_deref() {
            Ok("human") | Ok("manual") => SignMode::Manual,
            _ => SignMode::Auto,
        }
    }

    pub fn merchant_name() -> String {
        "Mugi Shoten".to_string()
    }

    pub fn merchant_id() -> String {
        "mugi_shoten".to_string()
    }

    pub fn credential_provider_id() -> String {
        "demo_cp".to_string()
    }

    pub fn network_name() -> String {
        "SimNet".to_string()
    }

    pub fn database_url() -> Option<String> {
        env::var("DATABASE_URL").ok()
    }

    pub fn redis_url() -> Option<String> {
        env::var("REDIS_URL").ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("missing passphrase variable {0}")]
    MissingPassphrase(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        // An empty JSON object resolves every field through its default.
        serde_json::from_str("{}").expect("defaults are total")
    }
}

impl Config {
    /// Loads from `path` when given, otherwise from `./config.json` when it
    /// exists, otherwise pure defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = PathBuf::from("config.json");
                fallback.exists().then_some(fallback)
            }
        };
        match candidate {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::FileRead(path, e))?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn port_for(&self, role: ServiceRole) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or_else(|| role.default_port())
    }

    /// The passphrase guarding `role`'s private key. Absence is a startup
    /// failure.
    pub fn passphrase(&self, role: ServiceRole) -> Result<String, ConfigError> {
        std::env::var(role.passphrase_var())
            .map_err(|_| ConfigError::MissingPassphrase(role.passphrase_var()))
    }

    /// `{keys_dir}/../data/did_documents`, the shared local DID registry.
    pub fn did_documents_dir(&self) -> PathBuf {
        self.keys_directory.join("..").join("data").join("did_documents")
    }

    /// The identity each role signs as.
    pub fn identity(&self, role: ServiceRole) -> Did {
        match role {
            ServiceRole::ShoppingAgent => Did::agent("shopping_agent"),
            ServiceRole::MerchantAgent => Did::agent("merchant_agent"),
            ServiceRole::Merchant => Did::merchant(self.merchant_id.clone()),
            ServiceRole::Processor => Did::agent("payment_processor"),
            ServiceRole::CredentialProvider => {
                Did::new(DidRole::Cp, self.credential_provider_id.clone())
            }
            ServiceRole::Network => Did::agent("payment_network"),
        }
    }

    /// DID name → base URL, the Docker-DNS stand-in used by HTTP resolution.
    pub fn service_map(&self) -> HashMap<String, Url> {
        let mut map = HashMap::new();
        map.insert("shopping_agent".to_string(), self.endpoints.shopping_agent.clone());
        map.insert("merchant_agent".to_string(), self.endpoints.merchant_agent.clone());
        map.insert(self.merchant_id.clone(), self.endpoints.merchant.clone());
        map.insert("payment_processor".to_string(), self.endpoints.processor.clone());
        map.insert(
            self.credential_provider_id.clone(),
            self.endpoints.credential_provider.clone(),
        );
        map
    }
}
