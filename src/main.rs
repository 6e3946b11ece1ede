//! AP2 service entrypoint.
//!
//! One binary serves every AP2 role:
//!
//! ```text
//! ap2-rs keygen                       # provision all encrypted keys + DID docs
//! ap2-rs serve --role merchant-agent  # run one service
//! ```
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `AP2_KEYS_DIRECTORY`, `AP2_<ROLE>_PASSPHRASE` locate and unlock keys
//! - `HOST`, `PORT` control binding; `MERCHANT_AI_MODE` picks auto vs manual
//!   cart signing; `OTEL_*` variables shape logging
//!
//! Exit codes: 0 on clean shutdown, 1 on startup failure (missing keys,
//! unreadable DID documents), 2 on fatal runtime errors.

use axum::Router;
use axum::http::Method;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use ap2_rs::a2a::{A2aEndpoint, HandlerRegistry, MessageSigner, MessageVerifier};
use ap2_rs::config::{Config, ServiceRole};
use ap2_rs::crypto::keys::PrivateKey;
use ap2_rs::crypto::keystore::KeyStore;
use ap2_rs::did_resolver::{DidDocument, DidResolver};
use ap2_rs::services::credential_provider::CredentialProvider;
use ap2_rs::services::merchant::MerchantService;
use ap2_rs::services::merchant_agent::{self, MerchantAgent, MerchantAgentState};
use ap2_rs::services::network::PaymentNetwork;
use ap2_rs::services::processor::{self, PaymentProcessor, ProcessorState};
use ap2_rs::services::shopping_agent::{ShoppingAgent, ShoppingAgentConfig};
use ap2_rs::telemetry::Telemetry;
use ap2_rs::util::shutdown_token;
use ap2_types::a2a::SignatureAlgorithm;

#[derive(Parser)]
#[command(name = "ap2-rs")]
#[command(about = "Agent Payments Protocol services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one AP2 service.
    Serve {
        #[arg(long, value_enum)]
        role: ServiceRole,
        /// Path to the JSON configuration file.
        #[arg(long, short, env = "CONFIG")]
        config: Option<PathBuf>,
    },
    /// Provision encrypted keys and DID documents.
    Keygen {
        /// Restrict to one role; default is every key-holding role.
        #[arg(long, value_enum)]
        role: Option<ServiceRole>,
        #[arg(long, short, env = "CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Failures with their process exit code.
struct Fatal {
    code: i32,
    message: String,
}

impl Fatal {
    fn startup(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    fn runtime(message: impl Into<String>) -> Self {
        Self {
            code: 2,
            message: message.into(),
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    if let Err(fatal) = run(cli).await {
        tracing::error!("{}", fatal.message);
        eprintln!("ap2-rs: {}", fatal.message);
        std::process::exit(fatal.code);
    }
}

async fn run(cli: Cli) -> Result<(), Fatal> {
    match cli.command {
        Command::Keygen { role, config } => keygen(role, config.as_deref()),
        Command::Serve { role, config } => serve(role, config.as_deref()).await,
    }
}

fn keygen(role: Option<ServiceRole>, config_path: Option<&std::path::Path>) -> Result<(), Fatal> {
    Telemetry::new().with_name("ap2-keygen").register();
    let config = Config::load(config_path).map_err(|e| Fatal::startup(e.to_string()))?;
    let store = KeyStore::new(&config.keys_directory);
    let did_dir = config.did_documents_dir();
    std::fs::create_dir_all(&did_dir).map_err(|e| Fatal::startup(e.to_string()))?;

    let roles = match role {
        Some(role) => vec![role],
        None => vec![
            ServiceRole::ShoppingAgent,
            ServiceRole::MerchantAgent,
            ServiceRole::Merchant,
            ServiceRole::Processor,
            ServiceRole::CredentialProvider,
        ],
    };
    for role in roles {
        if !role.needs_key() {
            continue;
        }
        let identity = config.identity(role);
        let passphrase = config
            .passphrase(role)
            .map_err(|e| Fatal::startup(e.to_string()))?;
        if store.exists(identity.name()) {
            tracing::info!(%identity, "key already provisioned, skipping");
            continue;
        }
        let key = PrivateKey::generate(SignatureAlgorithm::Es256);
        store
            .save(identity.name(), &key, &passphrase)
            .map_err(|e| Fatal::startup(e.to_string()))?;
        let document = DidDocument::for_identity(&identity, &key.public_key(), None)
            .map_err(|e| Fatal::startup(e.to_string()))?;
        let path = did_dir.join(format!("{}_did.json", identity.name()));
        let json = serde_json::to_vec_pretty(&document).map_err(|e| Fatal::startup(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| Fatal::startup(e.to_string()))?;
        tracing::info!(%identity, path = %path.display(), "provisioned key and DID document");
    }
    Ok(())
}

async fn serve(role: ServiceRole, config_path: Option<&std::path::Path>) -> Result<(), Fatal> {
    Telemetry::new()
        .with_name(role.service_name())
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();
    let config = Config::load(config_path).map_err(|e| Fatal::startup(e.to_string()))?;

    let did_dir = config.did_documents_dir();
    let resolver = Arc::new(DidResolver::new(Some(did_dir.clone()), config.service_map()));
    if did_dir.exists() {
        let seeded = resolver
            .seed_from_dir(&did_dir)
            .map_err(|e| Fatal::startup(format!("DID registry unreadable: {e}")))?;
        tracing::info!(seeded, dir = %did_dir.display(), "seeded DID registry");
    }

    let router = build_router(role, &config, resolver)?;
    let app = router
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port_for(role));
    tracing::info!(service = role.service_name(), %addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Fatal::startup(format!("failed to bind {addr}: {e}")))?;

    let token = shutdown_token().map_err(|e| Fatal::startup(e.to_string()))?;
    let graceful = async move { token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
        .map_err(|e| Fatal::runtime(e.to_string()))
}

/// Loads `role`'s key and registers its DID document with the resolver.
fn load_identity(
    role: ServiceRole,
    config: &Config,
    resolver: &DidResolver,
) -> Result<(ap2_types::did::Did, Arc<PrivateKey>, DidDocument), Fatal> {
    let identity = config.identity(role);
    let passphrase = config
        .passphrase(role)
        .map_err(|e| Fatal::startup(e.to_string()))?;
    let store = KeyStore::new(&config.keys_directory);
    let key = store
        .load(identity.name(), &passphrase)
        .map_err(|e| Fatal::startup(format!("cannot load key for {identity}: {e}")))?;
    let document = DidDocument::for_identity(&identity, &key.public_key(), None)
        .map_err(|e| Fatal::startup(e.to_string()))?;
    resolver.register(document.clone());
    Ok((identity, Arc::new(key), document))
}

fn build_router(
    role: ServiceRole,
    config: &Config,
    resolver: Arc<DidResolver>,
) -> Result<Router, Fatal> {
    match role {
        ServiceRole::Merchant => {
            let (identity, key, document) = load_identity(role, config, &resolver)?;
            let service = Arc::new(MerchantService::new(
                identity,
                key,
                config.merchant_mode,
                document,
            ));
            Ok(ap2_rs::services::merchant::router(service))
        }
        ServiceRole::MerchantAgent => {
            let (identity, key, document) = load_identity(role, config, &resolver)?;
            let agent = Arc::new(MerchantAgent::new(
                identity.clone(),
                config.identity(ServiceRole::Merchant),
                config.merchant_name.clone(),
                config.endpoints.merchant.clone(),
            ));
            let mut registry = HandlerRegistry::new();
            merchant_agent::register_handlers(&mut registry, Arc::clone(&agent));
            let state = Arc::new(MerchantAgentState {
                agent,
                endpoint: A2aEndpoint {
                    signer: MessageSigner::new(identity, key),
                    verifier: MessageVerifier::new(Arc::clone(&resolver)),
                    registry,
                },
                did_document: document,
            });
            Ok(merchant_agent::router(state))
        }
        ServiceRole::ShoppingAgent => {
            let (identity, key, _document) = load_identity(role, config, &resolver)?;
            let agent = Arc::new(ShoppingAgent::new(
                ShoppingAgentConfig {
                    identity: identity.clone(),
                    merchant_agent: config.identity(ServiceRole::MerchantAgent),
                    processor: config.identity(ServiceRole::Processor),
                    merchant_agent_url: config.endpoints.merchant_agent.clone(),
                    processor_url: config.endpoints.processor.clone(),
                    credential_provider_url: config.endpoints.credential_provider.clone(),
                    rp_id: config.rp_id.clone(),
                },
                MessageSigner::new(identity, key),
                MessageVerifier::new(Arc::clone(&resolver)),
            ));
            Ok(ap2_rs::services::shopping_agent::router(agent))
        }
        ServiceRole::Processor => {
            let (identity, key, document) = load_identity(role, config, &resolver)?;
            let payment_processor = Arc::new(PaymentProcessor::new(
                identity.clone(),
                Arc::clone(&resolver),
                config.rp_id.clone(),
                config.endpoints.processor.clone(),
                config.endpoints.credential_provider.clone(),
                config.endpoints.network.clone(),
            ));
            let mut registry = HandlerRegistry::new();
            processor::register_handlers(&mut registry, Arc::clone(&payment_processor));
            let state = Arc::new(ProcessorState {
                processor: payment_processor,
                endpoint: A2aEndpoint {
                    signer: MessageSigner::new(identity, key),
                    verifier: MessageVerifier::new(Arc::clone(&resolver)),
                    registry,
                },
                did_document: document,
            });
            Ok(processor::router(state))
        }
        ServiceRole::CredentialProvider => {
            let (identity, _key, _document) = load_identity(role, config, &resolver)?;
            let provider = Arc::new(CredentialProvider::new(
                identity,
                config.rp_id.clone(),
                Arc::clone(&resolver),
                Some(config.did_documents_dir()),
                config.endpoints.network.clone(),
            ));
            Ok(ap2_rs::services::credential_provider::router(provider))
        }
        ServiceRole::Network => {
            let network = Arc::new(PaymentNetwork::new(config.network_name.clone()));
            Ok(ap2_rs::services::network::router(network))
        }
    }
}
