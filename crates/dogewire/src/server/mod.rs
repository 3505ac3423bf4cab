mod error;
mod events;
mod wallet;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use dogewire_core::electrum::{ConnectionTarget, ElectrumApi};
use dogewire_core::RawTxCache;

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub electrum: Arc<dyn ElectrumApi>,
    pub cache: Arc<RawTxCache>,
    /// Server that per-request overrides are applied on top of.
    pub default_target: ConnectionTarget,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState) -> Router {
    // Wallet frontends are served from arbitrary origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let shared = Arc::new(state);

    let wallet_api = Router::new()
        .route("/api/v1/balance", get(wallet::get_balance))
        .route("/api/v1/balances", get(wallet::get_balances))
        .route("/api/v1/balance/total", get(wallet::get_total_balance))
        .route("/api/v1/utxos", get(wallet::get_utxos))
        .route("/api/v1/txs", get(wallet::get_history))
        .route("/api/v1/txs/all", get(wallet::scan_history))
        .route("/api/v1/height", get(wallet::get_height))
        .route("/api/v1/estimatefee", get(wallet::estimate_fee))
        .route("/api/v1/rawtx", get(wallet::get_raw_tx))
        .route("/api/v1/broadcast", post(wallet::broadcast));

    let events_api = Router::new()
        .route("/api/v1/subscriptions", post(events::open_subscription))
        .route(
            "/api/v1/subscriptions/{channel_id}",
            axum::routing::delete(events::close_subscription),
        )
        .route(
            "/api/v1/subscriptions/{channel_id}/events",
            get(events::stream_events),
        );

    Router::new()
        .route("/api/v1/health", get(health))
        .merge(wallet_api)
        .merge(events_api)
        .route("/api", any(api_not_found))
        .route("/api/{*path}", any(api_not_found))
        .layer(cors)
        .with_state(shared)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn api_not_found() -> error::AppError {
    error::AppError::NotFound("API route not found".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::encode::serialize_hex;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
    use dogewire_core::electrum::{
        Balance, ChannelId, EventStream, HeaderTip, HistoryEntry, SubscriptionRegistry, Transport, UnspentEntry,
    };
    use dogewire_core::wallet::KeyPair;
    use dogewire_core::{Address, CoreError, FeeRate, Network, RpcError, Scripthash};
    use futures::StreamExt;
    use tower::ServiceExt;

    // ==========================================================================
    // Fake Electrum
    // ==========================================================================

    struct FakeElectrum {
        funding: Transaction,
        owner: Address,
        registry: Arc<SubscriptionRegistry>,
        retargets: Mutex<Vec<ConnectionTarget>>,
        broadcasts: Mutex<Vec<String>>,
        fail_upstream: bool,
    }

    impl FakeElectrum {
        fn new() -> Self {
            let owner = address(1);
            let funding = Transaction {
                version: Version::ONE,
                lock_time: LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: OutPoint::new(Txid::from_byte_array([7; 32]), 0),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                }],
                output: vec![TxOut {
                    value: Amount::from_sat(250_000),
                    script_pubkey: owner.script_pubkey(),
                }],
            };
            Self {
                funding,
                owner,
                registry: Arc::new(SubscriptionRegistry::new()),
                retargets: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
                fail_upstream: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_upstream: true,
                ..Self::new()
            }
        }

        fn upstream(&self) -> Result<(), CoreError> {
            if self.fail_upstream {
                return Err(CoreError::ConnectionLost);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ElectrumApi for FakeElectrum {
        fn network(&self) -> Network {
            Network::Dogecoin
        }

        async fn get_balance(&self, address: &Address) -> Result<Balance, CoreError> {
            self.upstream()?;
            if *address == self.owner {
                return Ok(Balance { confirmed: 250_000, unconfirmed: -1_000 });
            }
            Ok(Balance { confirmed: 5, unconfirmed: 0 })
        }

        async fn get_utxos(&self, address: &Address) -> Result<Vec<UnspentEntry>, CoreError> {
            self.upstream()?;
            if *address != self.owner {
                return Ok(Vec::new());
            }
            Ok(vec![UnspentEntry {
                tx_hash: self.funding.compute_txid(),
                tx_pos: 0,
                value: 250_000,
                height: 95,
            }])
        }

        async fn get_history(&self, address: &Address) -> Result<Vec<HistoryEntry>, CoreError> {
            self.upstream()?;
            if *address != self.owner {
                return Ok(Vec::new());
            }
            Ok(vec![HistoryEntry {
                tx_hash: self.funding.compute_txid(),
                height: 95,
                fee: None,
            }])
        }

        async fn get_tip(&self) -> Result<HeaderTip, CoreError> {
            self.upstream()?;
            Ok(HeaderTip { height: 100, hex: "00".repeat(80) })
        }

        async fn estimate_fee(&self, target_blocks: u16) -> Result<Option<FeeRate>, CoreError> {
            self.upstream()?;
            Ok((target_blocks < 25).then(|| FeeRate::from_sat_per_kb(1_000_000)))
        }

        async fn fetch_raw_tx(&self, txid: &Txid) -> Result<String, CoreError> {
            self.upstream()?;
            if *txid == self.funding.compute_txid() {
                return Ok(serialize_hex(&self.funding));
            }
            Err(RpcError::ServerError {
                code: Some(2),
                message: "No such mempool or blockchain transaction".to_string(),
            }
            .into())
        }

        async fn get_block_header(&self, _height: u32) -> Result<String, CoreError> {
            self.upstream()?;
            let mut header = [0u8; 80];
            header[68..72].copy_from_slice(&1_650_000_000u32.to_le_bytes());
            Ok(header.iter().map(|b| format!("{b:02x}")).collect())
        }

        async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, CoreError> {
            self.upstream()?;
            if raw_tx_hex == "00" {
                return Err(RpcError::ServerError {
                    code: Some(1),
                    message: "TX decode failed".to_string(),
                }
                .into());
            }
            self.broadcasts.lock().expect("lock").push(raw_tx_hex.to_string());
            Ok(self.funding.compute_txid())
        }

        async fn retarget(&self, target: &ConnectionTarget) -> Result<(), CoreError> {
            self.retargets.lock().expect("lock").push(target.clone());
            Ok(())
        }

        async fn open_subscription(&self, addresses: Vec<Address>) -> Result<ChannelId, CoreError> {
            self.upstream()?;
            let channel_id = ChannelId::random();
            self.registry.subscribe_channel(channel_id.clone(), addresses);
            Ok(channel_id)
        }

        fn attach_stream(&self, channel_id: &ChannelId) -> Result<EventStream, CoreError> {
            self.registry.attach_sink(channel_id)
        }

        fn close_subscription(&self, channel_id: &ChannelId) -> bool {
            self.registry.close_channel(channel_id)
        }
    }

    fn address(byte: u8) -> Address {
        let mut bytes = [0x33u8; 32];
        bytes[31] = byte;
        let secret = SecretKey::from_slice(&bytes).expect("valid secret");
        KeyPair::from_secret(&Secp256k1::new(), secret).address(Network::Dogecoin)
    }

    fn default_target() -> ConnectionTarget {
        ConnectionTarget::new("electrum.example", 50002, Transport::Tls)
    }

    fn test_router_with(fake: Arc<FakeElectrum>) -> Router {
        build_router(AppState {
            electrum: fake,
            cache: Arc::new(RawTxCache::default()),
            default_target: default_target(),
        })
    }

    fn test_router() -> Router {
        test_router_with(Arc::new(FakeElectrum::new()))
    }

    async fn get(router: Router, uri: &str) -> axum::response::Response {
        router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request must build"),
            )
            .await
            .expect("router should serve request")
    }

    async fn post_json(router: Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
        router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request must build"),
            )
            .await
            .expect("router should serve request")
    }

    async fn response_body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .expect("response body must be readable");
        serde_json::from_slice(&bytes).expect("response body must be valid JSON")
    }

    fn error_of(json: &serde_json::Value) -> Option<&str> {
        json.get("error").and_then(serde_json::Value::as_str)
    }

    // ==========================================================================
    // Tests
    // ==========================================================================

    #[tokio::test]
    async fn health_reports_ok() {
        let response = get(test_router(), "/api/v1/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_api_route_returns_json_404() {
        let response = get(test_router(), "/api/v1/does-not-exist").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_body_json(response).await;
        assert_eq!(error_of(&json), Some("API route not found"));
    }

    #[tokio::test]
    async fn balance_returns_confirmed_and_unconfirmed() {
        let owner = address(1);
        let response = get(test_router(), &format!("/api/v1/balance?address={owner}")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_body_json(response).await;
        assert_eq!(json["address"], owner.to_string());
        assert_eq!(json["confirmed"], 250_000);
        assert_eq!(json["unconfirmed"], -1_000);
    }

    #[tokio::test]
    async fn balance_requires_a_valid_address() {
        let response = get(test_router(), "/api/v1/balance").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&response_body_json(response).await), Some("address is required"));

        let response = get(test_router(), "/api/v1/balance?address=not-an-address").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn total_balance_sums_confirmed_only() {
        let uri = format!("/api/v1/balance/total?addresses={},%20{}", address(1), address(2));
        let response = get(test_router(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["confirmed"], 250_005);
        assert_eq!(json["addresses"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn balances_keep_request_order() {
        let uri = format!("/api/v1/balances?addresses={},{}", address(2), address(1));
        let json = response_body_json(get(test_router(), &uri).await).await;
        let balances = json["balances"].as_array().expect("array");
        assert_eq!(balances[0]["address"], address(2).to_string());
        assert_eq!(balances[1]["confirmed"], 250_000);
    }

    #[tokio::test]
    async fn utxos_attach_parent_and_confirmations() {
        let uri = format!("/api/v1/utxos?addresses={}", address(1));
        let response = get(test_router(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_body_json(response).await;
        let utxo = &json["utxos"][0];
        assert_eq!(utxo["value"], 250_000);
        assert_eq!(utxo["confirmations"], 6);
        assert!(utxo["raw_tx_hex"].is_string());
    }

    #[tokio::test]
    async fn history_scan_reports_direction_and_time() {
        let uri = format!("/api/v1/txs/all?addresses={}", address(1));
        let json = response_body_json(get(test_router(), &uri).await).await;
        let tx = &json["txs"][0];
        assert_eq!(tx["direction"], "received");
        assert_eq!(tx["amount"], 250_000);
        assert_eq!(tx["time"], 1_650_000_000u32);
        assert_eq!(tx["confirmations"], 6);
    }

    #[tokio::test]
    async fn single_address_history_lists_records() {
        let uri = format!("/api/v1/txs?address={}", address(1));
        let json = response_body_json(get(test_router(), &uri).await).await;
        assert_eq!(json["txs"][0]["height"], 95);
    }

    #[tokio::test]
    async fn height_and_fee_estimate() {
        let json = response_body_json(get(test_router(), "/api/v1/height").await).await;
        assert_eq!(json["height"], 100);

        let json = response_body_json(get(test_router(), "/api/v1/estimatefee").await).await;
        assert_eq!(json["blocks"], 6);
        assert_eq!(json["fee_per_kb"], 1_000_000);

        let json = response_body_json(get(test_router(), "/api/v1/estimatefee?blocks=100").await).await;
        assert!(json["fee_per_kb"].is_null());

        let response = get(test_router(), "/api/v1/estimatefee?blocks=0").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn raw_tx_is_served_and_missing_tx_is_bad_gateway() {
        let fake = FakeElectrum::new();
        let txid = fake.funding.compute_txid();
        let expected = serialize_hex(&fake.funding);
        let router = test_router_with(Arc::new(fake));

        let json = response_body_json(get(router.clone(), &format!("/api/v1/rawtx?txid={txid}")).await).await;
        assert_eq!(json["raw_tx"], expected);

        let missing = Txid::from_byte_array([9; 32]);
        let response = get(router.clone(), &format!("/api/v1/rawtx?txid={missing}")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = get(router, "/api/v1/rawtx?txid=zz").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn broadcast_relays_hex_and_surfaces_rejections() {
        let fake = Arc::new(FakeElectrum::new());
        let router = test_router_with(Arc::clone(&fake));

        let response = post_json(router.clone(), "/api/v1/broadcast", serde_json::json!({ "tx_hex": "0100" })).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fake.broadcasts.lock().expect("lock").as_slice(), ["0100".to_string()]);

        let response = post_json(router.clone(), "/api/v1/broadcast", serde_json::json!({ "tx_hex": "00" })).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_of(&response_body_json(response).await), Some("TX decode failed"));

        let response = post_json(router, "/api/v1/broadcast", serde_json::json!({ "tx_hex": " " })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_override_applies_to_one_request_only() {
        let fake = Arc::new(FakeElectrum::new());
        let router = test_router_with(Arc::clone(&fake));

        let response = get(router.clone(), "/api/v1/height?host=other.example&transport=tcp").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = get(router, "/api/v1/height").await;
        assert_eq!(response.status(), StatusCode::OK);

        let retargets = fake.retargets.lock().expect("lock").clone();
        assert_eq!(
            retargets,
            vec![ConnectionTarget::new("other.example", 50002, Transport::Tcp), default_target()]
        );
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_bad_gateway() {
        let router = test_router_with(Arc::new(FakeElectrum::failing()));
        let response = get(router, "/api/v1/height").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_of(&response_body_json(response).await), Some("electrum connection lost before a response arrived"));
    }

    #[tokio::test]
    async fn subscription_stream_starts_with_subscribed_event() {
        let fake = Arc::new(FakeElectrum::new());
        let router = test_router_with(Arc::clone(&fake));
        let owner = address(1);

        let response = post_json(
            router.clone(),
            "/api/v1/subscriptions",
            serde_json::json!({ "addresses": [owner.to_string()] }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let channel_id = response_body_json(response).await["channel_id"]
            .as_str()
            .expect("channel id")
            .to_string();

        let response = get(router, &format!("/api/v1/subscriptions/{channel_id}/events")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.expect("first frame").expect("bytes");
        let text = String::from_utf8(first.to_vec()).expect("utf8");
        assert!(text.contains("event: subscribed"));
        assert!(text.contains(&owner.to_string()));

        fake.registry
            .on_topic_notification(&Scripthash::from_address(&owner), Some("deadbeef"));
        let second = body.next().await.expect("second frame").expect("bytes");
        let text = String::from_utf8(second.to_vec()).expect("utf8");
        assert!(text.contains("event: status"));
        assert!(text.contains("deadbeef"));
    }

    #[tokio::test]
    async fn unknown_channel_is_404() {
        let response = get(test_router(), "/api/v1/subscriptions/ffff/events").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/subscriptions/ffff")
                    .body(Body::empty())
                    .expect("request must build"),
            )
            .await
            .expect("router should serve request");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subscription_rejects_empty_or_invalid_addresses() {
        let response = post_json(test_router(), "/api/v1/subscriptions", serde_json::json!({ "addresses": [] })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post_json(
            test_router(),
            "/api/v1/subscriptions",
            serde_json::json!({ "addresses": ["1BoatSLRHtKNngkdXEeobR76b53LETtpyT"] }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
