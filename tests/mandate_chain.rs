//! End-to-end mandate chain scenarios.
//!
//! Every test spins up the real services — payment network, credential
//! provider, merchant signing service, merchant agent, payment processor, and
//! shopping agent — as axum servers on ephemeral ports sharing one in-memory
//! DID resolver, then drives the flows over HTTP exactly as the front end
//! would, with a software authenticator standing in for the passkey ceremony.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use url::Url;

use ap2_rs::a2a::{A2aEndpoint, HandlerRegistry, MessageSigner, MessageVerifier};
use ap2_rs::crypto::b64;
use ap2_rs::crypto::keys::PrivateKey;
use ap2_rs::crypto::webauthn::SoftwareAuthenticator;
use ap2_rs::did_resolver::{DidDocument, DidResolver, register_identity};
use ap2_rs::services::credential_provider::{self, CredentialProvider};
use ap2_rs::services::merchant::{self, MerchantService, SignMode};
use ap2_rs::services::merchant_agent::{self, MerchantAgent, MerchantAgentState};
use ap2_rs::services::network::{self, PaymentNetwork};
use ap2_rs::services::processor::{self, PaymentProcessor, ProcessorState, TransactionRecord};
use ap2_rs::services::shopping_agent::{
    self, AuthorizePaymentRequest, ChatRequest, ChatResponse, ConfirmCartRequest,
    ConfirmCartResponse, ShoppingAgent, ShoppingAgentConfig,
};
use ap2_types::a2a::{PaymentRequestPayload, PaymentResult, PaymentStatus, SignatureAlgorithm};
use ap2_types::did::Did;
use ap2_types::mandate::{self, PaymentMandate, PaymentMandateContents};
use ap2_types::money::MoneyAmount;
use ap2_types::payment::PaymentResponse;
use ap2_types::timestamp::UnixTimestamp;

const RP_ID: &str = "ap2.example";

async fn spawn(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/").parse().unwrap()
}

struct Pipeline {
    resolver: Arc<DidResolver>,
    http: reqwest::Client,
    shopping_agent_url: Url,
    processor_url: Url,
    credential_provider_url: Url,
    merchant_url: Url,
    merchant_service: Arc<MerchantService>,
    merchant_key: Arc<PrivateKey>,
}

impl Pipeline {
    /// Brings up the whole system. `merchant_mode` selects auto vs manual
    /// cart signing; manual tests shrink the agent's poll cadence.
    async fn start(merchant_mode: SignMode) -> Self {
        let resolver = Arc::new(DidResolver::in_memory());

        let network_url = spawn(network::router(Arc::new(PaymentNetwork::new("SimNet")))).await;

        let cp_identity = Did::new(ap2_types::did::DidRole::Cp, "demo_cp");
        let credential_provider_url = spawn(credential_provider::router(Arc::new(
            CredentialProvider::new(
                cp_identity,
                RP_ID.to_string(),
                Arc::clone(&resolver),
                None,
                network_url.clone(),
            ),
        )))
        .await;

        let merchant_identity = Did::merchant("mugi_shoten");
        let merchant_key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        register_identity(&resolver, &merchant_identity, &merchant_key).unwrap();
        let merchant_document =
            DidDocument::for_identity(&merchant_identity, &merchant_key.public_key(), None)
                .unwrap();
        let merchant_service = Arc::new(MerchantService::new(
            merchant_identity.clone(),
            Arc::clone(&merchant_key),
            merchant_mode,
            merchant_document.clone(),
        ));
        let merchant_url = spawn(merchant::router(Arc::clone(&merchant_service))).await;

        let agent_identity = Did::agent("merchant_agent");
        let agent_key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        register_identity(&resolver, &agent_identity, &agent_key).unwrap();
        let agent_document =
            DidDocument::for_identity(&agent_identity, &agent_key.public_key(), None).unwrap();
        let agent = Arc::new(
            MerchantAgent::new(
                agent_identity.clone(),
                merchant_identity.clone(),
                "Mugi Shoten".to_string(),
                merchant_url.clone(),
            )
            .with_poll_timing(Duration::from_millis(20), Duration::from_millis(200)),
        );
        let mut agent_registry = HandlerRegistry::new();
        merchant_agent::register_handlers(&mut agent_registry, Arc::clone(&agent));
        let merchant_agent_url = spawn(merchant_agent::router(Arc::new(MerchantAgentState {
            agent,
            endpoint: A2aEndpoint {
                signer: MessageSigner::new(agent_identity, agent_key),
                verifier: MessageVerifier::new(Arc::clone(&resolver)),
                registry: agent_registry,
            },
            did_document: agent_document,
        })))
        .await;

        // The processor needs its public URL for receipt links, so bind first.
        let processor_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let processor_url: Url = format!("http://{}/", processor_listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let processor_identity = Did::agent("payment_processor");
        let processor_key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        register_identity(&resolver, &processor_identity, &processor_key).unwrap();
        let processor_document =
            DidDocument::for_identity(&processor_identity, &processor_key.public_key(), None)
                .unwrap();
        let payment_processor = Arc::new(PaymentProcessor::new(
            processor_identity.clone(),
            Arc::clone(&resolver),
            RP_ID.to_string(),
            processor_url.clone(),
            credential_provider_url.clone(),
            network_url.clone(),
        ));
        let mut processor_registry = HandlerRegistry::new();
        processor::register_handlers(&mut processor_registry, Arc::clone(&payment_processor));
        let processor_router = processor::router(Arc::new(ProcessorState {
            processor: payment_processor,
            endpoint: A2aEndpoint {
                signer: MessageSigner::new(processor_identity, processor_key),
                verifier: MessageVerifier::new(Arc::clone(&resolver)),
                registry: processor_registry,
            },
            did_document: processor_document,
        }));
        tokio::spawn(async move {
            axum::serve(processor_listener, processor_router).await.unwrap();
        });

        let shopper_identity = Did::agent("shopping_agent");
        let shopper_key = Arc::new(PrivateKey::generate(SignatureAlgorithm::Es256));
        register_identity(&resolver, &shopper_identity, &shopper_key).unwrap();
        let shopping_agent = Arc::new(ShoppingAgent::new(
            ShoppingAgentConfig {
                identity: shopper_identity.clone(),
                merchant_agent: Did::agent("merchant_agent"),
                processor: Did::agent("payment_processor"),
                merchant_agent_url,
                processor_url: processor_url.clone(),
                credential_provider_url: credential_provider_url.clone(),
                rp_id: RP_ID.to_string(),
            },
            MessageSigner::new(shopper_identity, shopper_key),
            MessageVerifier::new(Arc::clone(&resolver)),
        ));
        let shopping_agent_url = spawn(shopping_agent::router(shopping_agent)).await;

        Self {
            resolver,
            http: reqwest::Client::new(),
            shopping_agent_url,
            processor_url,
            credential_provider_url,
            merchant_url,
            merchant_service,
            merchant_key,
        }
    }

    /// Registers a passkey for `user_id` through the credential provider.
    async fn register_passkey(&self, user_id: &str) -> SoftwareAuthenticator {
        let authenticator = SoftwareAuthenticator::new(RP_ID);
        let begun: serde_json::Value = self
            .http
            .post(self.credential_provider_url.join("register-passkey").unwrap())
            .json(&serde_json::json!({"user_id": user_id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let challenge = begun["challenge"].as_str().unwrap();
        let completed = self
            .http
            .post(self.credential_provider_url.join("complete-registration").unwrap())
            .json(&serde_json::json!({
                "user_id": user_id,
                "challenge": challenge,
                "cose_public_key": b64::encode(authenticator.cose_public_key()),
                "sign_count": 0,
            }))
            .send()
            .await
            .unwrap();
        assert!(completed.status().is_success());
        authenticator
    }

    async fn chat(&self, user_id: &str, message: &str, max_amount: Option<u64>) -> ChatResponse {
        self.chat_request(ChatRequest {
            user_id: user_id.to_string(),
            message: message.to_string(),
            max_amount,
            skus: None,
        })
        .await
    }

    async fn chat_request(&self, request: ChatRequest) -> ChatResponse {
        self.http
            .post(self.shopping_agent_url.join("chat").unwrap())
            .json(&request)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn confirm_cart(&self, session_id: &str, cart_id: &str) -> ConfirmCartResponse {
        self.http
            .post(
                self.shopping_agent_url
                    .join(&format!("sessions/{session_id}/confirm-cart"))
                    .unwrap(),
            )
            .json(&ConfirmCartRequest {
                cart_id: cart_id.to_string(),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn authorize(
        &self,
        session_id: &str,
        authenticator: &mut SoftwareAuthenticator,
        challenge: &str,
    ) -> PaymentResult {
        self.http
            .post(
                self.shopping_agent_url
                    .join(&format!("sessions/{session_id}/authorize-payment"))
                    .unwrap(),
            )
            .json(&AuthorizePaymentRequest {
                webauthn_assertion: authenticator.assert(challenge),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn transaction(&self, id: &str) -> TransactionRecord {
        self.http
            .get(self.processor_url.join(&format!("transactions/{id}")).unwrap())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Builds a complete processor payload by hand: a merchant-signed cart,
    /// a payment mandate, and a fresh user authorization over the pair.
    async fn handmade_payload(
        &self,
        user_id: &str,
        authenticator: &mut SoftwareAuthenticator,
        tamper_total_to: Option<u64>,
        assertion_count: Option<u32>,
    ) -> PaymentRequestPayload {
        // A signed cart straight from the merchant service.
        let agent = MerchantAgent::new(
            Did::agent("merchant_agent"),
            Did::merchant("mugi_shoten"),
            "Mugi Shoten".to_string(),
            self.merchant_url.clone(),
        );
        let product = agent.catalog.by_sku("SHOE-001").unwrap().clone();
        let unsigned = agent.build_cart_mandate(&merchant_agent::CartPlan {
            label: "single_item",
            product,
            quantity: 1,
        });
        let mut cart = self
            .merchant_service
            .sign_cart(unsigned)
            .unwrap()
            .signed_cart_mandate
            .unwrap();
        if let Some(total) = tamper_total_to {
            cart.contents.payment_request.details.total.amount = MoneyAmount::jpy(total);
        }

        // A tokenized method and issuer JWT from the credential provider.
        let method: serde_json::Value = self
            .http
            .post(self.credential_provider_url.join("payment-method").unwrap())
            .json(&serde_json::json!({"user_id": user_id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let details = &cart.contents.payment_request.details;
        let contents = PaymentMandateContents {
            payment_mandate_id: format!("pm_handmade_{}", uuid_suffix()),
            payment_details_id: details.id.clone(),
            payment_details_total: details.total.clone(),
            payment_response: PaymentResponse::tokenized(
                details.id.clone(),
                method["card_brand"].as_str().unwrap(),
                method["token"].as_str().unwrap(),
            ),
            merchant_agent: Did::agent("merchant_agent"),
            timestamp: chrono::Utc::now(),
        };

        let cart_hash = mandate::mandate_hash_b64url(&cart).unwrap();
        let payment_hash = mandate::mandate_hash_b64url(&contents).unwrap();
        let nonce = ap2_rs::crypto::sd_jwt::new_nonce();
        let assertion = match assertion_count {
            Some(count) => authenticator.assert_with_count(&nonce, count),
            None => authenticator.assert(&nonce),
        };
        let user_authorization = ap2_rs::crypto::sd_jwt::assemble_user_authorization(
            method["issuer_jwt"].as_str().unwrap(),
            &Did::user(user_id),
            &assertion,
            &cart_hash,
            &payment_hash,
            &nonce,
            UnixTimestamp::try_now().unwrap(),
        )
        .unwrap();

        PaymentRequestPayload {
            cart_mandate: cart,
            payment_mandate: PaymentMandate {
                payment_mandate_contents: contents,
                user_authorization: Some(user_authorization),
            },
            webauthn_assertion: assertion,
            intent_mandate: None,
            risk: None,
        }
    }
}

fn uuid_suffix() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[tokio::test]
async fn s1_happy_path_human_present() {
    let pipeline = Pipeline::start(SignMode::Auto).await;
    let mut authenticator = pipeline.register_passkey("hanako").await;

    let chat = pipeline.chat("hanako", "Buy a red basketball shoe", None).await;
    assert_eq!(chat.status, "carts_ready");
    assert!(!chat.carts.is_empty() && chat.carts.len() <= 3);
    // 8000 + 800 tax + 500 shipping.
    let cart = chat
        .carts
        .iter()
        .find(|c| c.total == MoneyAmount::jpy(9300))
        .expect("a 9300 JPY shoe cart");
    assert_eq!(cart.merchant_name, "Mugi Shoten");

    let confirmed = pipeline.confirm_cart(&chat.session_id, &cart.cart_id).await;
    assert_eq!(confirmed.total, MoneyAmount::jpy(9300));
    assert!(!confirmed.challenge.is_empty());

    let result = pipeline
        .authorize(&chat.session_id, &mut authenticator, &confirmed.challenge)
        .await;
    assert_eq!(result.status, PaymentStatus::Captured, "error: {:?}", result.error);
    let transaction_id = result.transaction_id.expect("transaction id");
    assert!(!transaction_id.is_empty());

    // Receipt URL resolves to a non-empty PDF.
    let receipt_url = result.receipt_url.expect("receipt url");
    let pdf = pipeline
        .http
        .get(&receipt_url)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert!(pdf.len() > 100);

    // Risk score below the approval threshold.
    let record = pipeline.transaction(&transaction_id).await;
    assert!(record.risk_score < 30, "risk {}", record.risk_score);
    assert_eq!(record.amount, MoneyAmount::jpy(9300));
}

#[tokio::test]
async fn s2_cart_tamper_detected() {
    let pipeline = Pipeline::start(SignMode::Auto).await;
    let mut authenticator = pipeline.register_passkey("hanako").await;
    // Total altered after merchant signing; user authorization is consistent
    // with the tampered cart, so only the merchant JWT hash can catch it.
    let payload = pipeline
        .handmade_payload("hanako", &mut authenticator, Some(9301), None)
        .await;

    let response = pipeline
        .http
        .post(pipeline.processor_url.join("process").unwrap())
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    // Opaque: no hint of which check failed.
    assert_eq!(body["detail"], "authorization failed");
}

#[tokio::test]
async fn s3_replayed_payment_rejected() {
    let pipeline = Pipeline::start(SignMode::Auto).await;
    let mut authenticator = pipeline.register_passkey("hanako").await;
    let payload = pipeline
        .handmade_payload("hanako", &mut authenticator, None, None)
        .await;

    let first = pipeline
        .http
        .post(pipeline.processor_url.join("process").unwrap())
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let first: PaymentResult = first.json().await.unwrap();
    assert_eq!(first.status, PaymentStatus::Captured, "error: {:?}", first.error);

    // Byte-identical resubmission: the merchant JWT jti is already consumed.
    let second = pipeline
        .http
        .post(pipeline.processor_url.join("process").unwrap())
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn s4_constraint_violation_declined() {
    let pipeline = Pipeline::start(SignMode::Auto).await;
    let mut authenticator = pipeline.register_passkey("hanako").await;

    // The intent pins the shoe SKU with a 5000 JPY ceiling; no cart can fit,
    // so the merchant proposes the violating one and risk catches it.
    let chat = pipeline
        .chat_request(ChatRequest {
            user_id: "hanako".to_string(),
            message: "Buy a red basketball shoe".to_string(),
            max_amount: Some(5000),
            skus: Some(vec!["SHOE-001".to_string()]),
        })
        .await;
    assert_eq!(chat.status, "carts_ready");
    let cart = chat
        .carts
        .iter()
        .find(|c| c.total == MoneyAmount::jpy(9300))
        .expect("the over-budget shoe cart is still proposed");

    let confirmed = pipeline.confirm_cart(&chat.session_id, &cart.cart_id).await;
    let result = pipeline
        .authorize(&chat.session_id, &mut authenticator, &confirmed.challenge)
        .await;
    assert_eq!(result.status, PaymentStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("High risk"));

    let record = pipeline.transaction(&result.transaction_id.unwrap()).await;
    assert!(record.risk_score >= 80, "risk {}", record.risk_score);
}

#[tokio::test]
async fn s5_manual_approval_timeout_yields_empty() {
    // Manual mode, nobody approves; the merchant agent's poll loop hits its
    // cap and the shopping agent reports no carts, without error.
    let pipeline = Pipeline::start(SignMode::Manual).await;
    pipeline.register_passkey("hanako").await;

    let chat = pipeline.chat("hanako", "Buy a red basketball shoe", None).await;
    assert_eq!(chat.status, "no_carts");
    assert!(chat.carts.is_empty());

    // The carts are parked, visible to the operator.
    let pending: Vec<serde_json::Value> = pipeline
        .http
        .get(pipeline.merchant_url.join("pending").unwrap())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!pending.is_empty());
}

#[tokio::test]
async fn s5_manual_approval_signs_cart() {
    // Same manual pipeline, but the operator approves while the agent polls.
    let pipeline = Pipeline::start(SignMode::Manual).await;
    pipeline.register_passkey("hanako").await;

    let merchant_service = Arc::clone(&pipeline.merchant_service);
    let approver = tokio::spawn(async move {
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let pending = merchant_service.pending();
            for cart in pending {
                let _ = merchant_service.approve(&cart.cart_mandate_id);
            }
        }
    });

    let chat = pipeline.chat("hanako", "Buy a red basketball shoe", None).await;
    approver.abort();
    assert_eq!(chat.status, "carts_ready");
    assert!(!chat.carts.is_empty());
}

#[tokio::test]
async fn s6_webauthn_counter_regression_rejected() {
    let pipeline = Pipeline::start(SignMode::Auto).await;
    let mut authenticator = pipeline.register_passkey("hanako").await;

    // A legitimate payment first, leaving the processor's stored counter at 5.
    let payload = pipeline
        .handmade_payload("hanako", &mut authenticator, None, Some(5))
        .await;
    let first: PaymentResult = pipeline
        .http
        .post(pipeline.processor_url.join("process").unwrap())
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first.status, PaymentStatus::Captured, "error: {:?}", first.error);

    // A fresh bundle whose assertion carries a lower counter: replayed device
    // state. Everything else about it is valid.
    let stale = pipeline
        .handmade_payload("hanako", &mut authenticator, None, Some(3))
        .await;
    let response = pipeline
        .http
        .post(pipeline.processor_url.join("process").unwrap())
        .json(&stale)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn a2a_verification_covers_service_documents() {
    // The resolver serves every registered party, including CP-minted users.
    let pipeline = Pipeline::start(SignMode::Auto).await;
    pipeline.register_passkey("hanako").await;
    assert!(pipeline.resolver.resolve(&Did::user("hanako")).await.is_some());
    assert!(pipeline.resolver.resolve(&Did::merchant("mugi_shoten")).await.is_some());
    // And merchant keys resolve by fragment for JWT verification.
    let resolved = pipeline
        .resolver
        .resolve_public_key(&Did::merchant("mugi_shoten").key_1())
        .await
        .unwrap();
    assert_eq!(
        resolved.to_spki_pem().unwrap(),
        pipeline.merchant_key.public_key().to_spki_pem().unwrap()
    );
}
