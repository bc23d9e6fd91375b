use std::time::Duration;

use actix_web::{http::StatusCode, test, test::TestRequest, App};
use agg_common::{Amount, Secret};
use aggregator_engine::{
    agg_api::{Deposit, MatchOutcome},
    db_types::{
        ConversionRateType,
        InstitutionType,
        LockOrderStatus,
        LockPaymentOrder,
        NewFiatCurrency,
        NewInstitution,
        NewNetwork,
        NewProviderOrderToken,
        NewProviderProfile,
        NewProvisionBucket,
        NewToken,
        ProviderProfile,
        ProvisionMode,
    },
    helpers::sign_payload,
    CatalogApi,
    SqliteDatabase,
};
use log::debug;
use serde::Serialize;
use serde_json::json;

use crate::{
    config::ServerConfig,
    data_objects::{DepositResponse, PaymentOrderResponse},
    integrations::SIGNATURE_HEADER,
    server::{build_context, configure_routes, AppContext},
};

pub const PROVIDER_SECRET: &str = "provider-secret-for-tests";
pub const MARKET_RATE: i64 = 1_500;

/// A fully wired aggregator on a fresh database, with one token, one currency (NGN at 1,500), two provision buckets and
/// an online provider in the lower bucket.
pub struct TestAggregator {
    pub config: ServerConfig,
    pub context: AppContext,
    pub provider: ProviderProfile,
}

impl TestAggregator {
    pub async fn new() -> Self {
        let _ = env_logger::try_init();
        let url = format!("sqlite://{}/agg_server_test_{}.db", std::env::temp_dir().display(), rand::random::<u64>());
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        db.migrate().await.expect("Error running migrations");
        let provider = seed_catalog(&db).await;
        let mut config = ServerConfig::new("127.0.0.1", 0);
        config.database_url = url;
        config.address_seed = Secret::new("endpoint test seed".to_string());
        config.webhook_secret = Secret::new("webhook-secret-for-tests".to_string());
        config.provider_secret = Secret::new(PROVIDER_SECRET.to_string());
        config.chain_start_block = 1_000;
        let context = build_context(&config, db).await.expect("Failed to build the app context");
        Self { config, context, provider }
    }

    /// Sends `req` through the full app. Errors raised by middleware come back as `Err` with their message.
    pub async fn call(&self, req: TestRequest) -> Result<(StatusCode, String), String> {
        let app = App::new().configure(|cfg| configure_routes(cfg, &self.config, &self.context));
        let service = test::init_service(app).await;
        debug!("Making request");
        let res = test::try_call_service(&service, req.to_request()).await.map_err(|e| e.to_string())?;
        let status = res.status();
        let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
        Ok((status, body))
    }

    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        self.call(TestRequest::get().uri(path)).await.expect("Request failed")
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> (StatusCode, String) {
        self.call(TestRequest::post().uri(path).set_json(body)).await.expect("Request failed")
    }

    /// Posts `body` to a provider callback, signed with `secret`.
    pub async fn signed_post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        secret: &str,
    ) -> Result<(StatusCode, String), String> {
        let payload = serde_json::to_vec(body).unwrap();
        let signature = sign_payload(secret, &payload).unwrap();
        let req = TestRequest::post()
            .uri(path)
            .insert_header(("content-type", "application/json"))
            .insert_header((SIGNATURE_HEADER, signature))
            .set_payload(payload);
        self.call(req).await
    }

    /// Creates a payment order for `tokens` USDC through the API.
    pub async fn create_order(&self, tokens: i64) -> PaymentOrderResponse {
        let (status, body) = self.post("/v1/orders", &new_order_json(tokens)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        serde_json::from_str(&body).unwrap()
    }

    pub async fn deposit(&self, deposit: &Deposit) -> DepositResponse {
        let (status, body) = self.post("/v1/deposits", deposit).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        serde_json::from_str(&body).unwrap()
    }

    /// Creates and funds an order, then waits until the provider has been assigned the resulting lock order.
    pub async fn assigned_lock_order(&self, tokens: i64, tx_hash: &str) -> LockPaymentOrder {
        let order = self.create_order(tokens).await;
        let address = order.receive_address.expect("No receive address").address;
        let lock_order = match self.deposit(&deposit(&address, tokens, tx_hash)).await {
            DepositResponse::Recorded { order } => order,
            other => panic!("Expected a new lock order, got {other:?}"),
        };
        // The deposit hook runs the matcher as well. Whoever gets there first wins.
        match self.context.matching.assign_provider(lock_order.id).await.unwrap() {
            MatchOutcome::Assigned { order, .. } => return order,
            MatchOutcome::AlreadyTaken { .. } => {},
            other => panic!("Expected the order to be matched, got {other:?}"),
        }
        for _ in 0..100 {
            let order = self.context.fulfillment.lock_order(lock_order.id).await.unwrap();
            if order.status == LockOrderStatus::Processing {
                return order;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Lock order #{} was never assigned", lock_order.id);
    }
}

pub fn new_order_json(tokens: i64) -> serde_json::Value {
    json!({
        "token": "USDC",
        "network": "base",
        "amount": Amount::from_units(tokens),
        "currency": "NGN",
        "institution": "GTBINGLA",
        "account_identifier": "0123456789",
        "account_name": "Ada Obi"
    })
}

pub fn deposit(to_address: &str, tokens: i64, tx_hash: &str) -> Deposit {
    Deposit {
        to_address: to_address.to_string(),
        amount: Amount::from_units(tokens),
        tx_hash: tx_hash.to_string(),
        block_number: 1_010,
        confirmations: 12,
    }
}

async fn seed_catalog(db: &SqliteDatabase) -> ProviderProfile {
    let catalog = CatalogApi::new(db.clone());
    let network = catalog
        .add_network(NewNetwork {
            identifier: "base".into(),
            chain_id: 8453,
            block_time_secs: 2,
            is_testnet: false,
        })
        .await
        .unwrap();
    let token = catalog
        .add_token(NewToken {
            symbol: "USDC".into(),
            contract_address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".into(),
            decimals: 6,
            network_id: network.id,
        })
        .await
        .unwrap();
    let currency = catalog
        .add_fiat_currency(NewFiatCurrency {
            code: "NGN".into(),
            name: "Nigerian Naira".into(),
            symbol: "₦".into(),
            market_rate: Amount::from_units(MARKET_RATE),
        })
        .await
        .unwrap();
    catalog
        .add_institution(NewInstitution {
            code: "GTBINGLA".into(),
            name: "Guaranty Trust Bank".into(),
            institution_type: InstitutionType::Bank,
            currency_id: currency.id,
        })
        .await
        .unwrap();
    let mut buckets = vec![];
    for (min, max) in [(1_000, 50_000), (50_001, 500_000)] {
        let bucket = NewProvisionBucket {
            currency_id: currency.id,
            min_amount: Amount::from_units(min),
            max_amount: Amount::from_units(max),
        };
        buckets.push(catalog.add_provision_bucket(bucket).await.unwrap());
    }
    let provider = catalog
        .register_provider(NewProviderProfile {
            trading_name: "Swift Naira".into(),
            currency_id: currency.id,
            provision_mode: ProvisionMode::Auto,
            is_partner: false,
            callback_url: None,
        })
        .await
        .unwrap();
    catalog
        .set_provider_token(NewProviderOrderToken {
            provider_id: provider.id,
            token_id: token.id,
            min_order_amount: Amount::from_units(1),
            max_order_amount: Amount::from_units(30),
            conversion_rate_type: ConversionRateType::Floating,
            fixed_conversion_rate: Amount::zero(),
            floating_conversion_rate: Amount::zero(),
            rate_slippage_bps: 100,
            address: "0xswiftnaira".into(),
            network: "base".into(),
        })
        .await
        .unwrap();
    catalog.add_provider_to_bucket(provider.id, buckets[0].id).await.unwrap();
    catalog.set_provider_availability(provider.id, true).await.unwrap()
}
