#![allow(dead_code)]
mod prepare_env;

use std::convert::Infallible;

use agg_common::Amount;
use aggregator_engine::{
    agg_api::{
        AddressAllocatorApi,
        AllocatorOptions,
        ChainIndexerApi,
        Deposit,
        DepositOutcome,
        IndexerOptions,
    },
    db_types::{
        ConversionRateType,
        InstitutionType,
        LockPaymentOrder,
        NewFiatCurrency,
        NewInstitution,
        NewNetwork,
        NewPaymentOrder,
        NewProviderOrderToken,
        NewProviderProfile,
        NewProvisionBucket,
        NewToken,
        PaymentOrder,
        ProviderProfile,
        ProvisionBucket,
        ProvisionMode,
        ReceiveAddress,
    },
    events::EventProducers,
    helpers::SeededAddressDeriver,
    traits::ChainHead,
    CatalogApi,
    SqliteDatabase,
};
pub use prepare_env::{prepare_test_env, random_db_path};

pub const CURRENCY: &str = "NGN";
pub const MARKET_RATE: i64 = 1_500;

/// A chain that never moves.
#[derive(Debug, Clone, Copy)]
pub struct FixedChainHead(pub i64);

impl ChainHead for FixedChainHead {
    type Error = Infallible;

    async fn current_block(&self) -> Result<i64, Self::Error> {
        Ok(self.0)
    }
}

pub type Allocator = AddressAllocatorApi<SqliteDatabase, FixedChainHead, SeededAddressDeriver>;

/// A migrated database with one network, one token, one currency and two buckets:
/// `[1,000 - 50,000]` and `[50,001 - 500,000]`.
pub struct Fixture {
    pub db: SqliteDatabase,
    pub token_id: i64,
    pub currency_id: i64,
    pub buckets: Vec<ProvisionBucket>,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let catalog = CatalogApi::new(db.clone());
        let network = catalog
            .add_network(NewNetwork {
                identifier: "base".into(),
                chain_id: 8453,
                block_time_secs: 2,
                is_testnet: false,
            })
            .await
            .expect("Failed to add network");
        let token = catalog
            .add_token(NewToken {
                symbol: "USDC".into(),
                contract_address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".into(),
                decimals: 6,
                network_id: network.id,
            })
            .await
            .expect("Failed to add token");
        let currency = catalog
            .add_fiat_currency(NewFiatCurrency {
                code: CURRENCY.into(),
                name: "Nigerian Naira".into(),
                symbol: "₦".into(),
                market_rate: Amount::from_units(MARKET_RATE),
            })
            .await
            .expect("Failed to add currency");
        catalog
            .add_institution(NewInstitution {
                code: "GTBINGLA".into(),
                name: "Guaranty Trust Bank".into(),
                institution_type: InstitutionType::Bank,
                currency_id: currency.id,
            })
            .await
            .expect("Failed to add institution");
        let mut buckets = vec![];
        for (min, max) in [(1_000, 50_000), (50_001, 500_000)] {
            let bucket = NewProvisionBucket {
                currency_id: currency.id,
                min_amount: Amount::from_units(min),
                max_amount: Amount::from_units(max),
            };
            buckets.push(catalog.add_provision_bucket(bucket).await.expect("Failed to add bucket"));
        }
        Self { db, token_id: token.id, currency_id: currency.id, buckets }
    }

    pub fn catalog(&self) -> CatalogApi<SqliteDatabase> {
        CatalogApi::new(self.db.clone())
    }

    pub fn allocator(&self) -> Allocator {
        self.allocator_with(AllocatorOptions::default())
    }

    pub fn allocator_with(&self, options: AllocatorOptions) -> Allocator {
        AddressAllocatorApi::new(
            self.db.clone(),
            FixedChainHead(1_000),
            SeededAddressDeriver::new("test seed"),
            options,
            EventProducers::default(),
        )
    }

    pub fn indexer(&self) -> ChainIndexerApi<SqliteDatabase> {
        ChainIndexerApi::new(self.db.clone(), IndexerOptions::default(), EventProducers::default())
    }

    pub fn new_payment_order(&self, tokens: i64) -> NewPaymentOrder {
        NewPaymentOrder {
            token_id: self.token_id,
            amount: Amount::from_units(tokens),
            rate: Amount::from_units(MARKET_RATE),
            institution: "GTBINGLA".into(),
            account_identifier: "0123456789".into(),
            account_name: "Ada Obi".into(),
            currency: CURRENCY.into(),
            memo: None,
            webhook_url: None,
        }
    }

    pub async fn create_payment_order(&self, tokens: i64) -> (PaymentOrder, ReceiveAddress) {
        self.allocator().create_payment_order(self.new_payment_order(tokens)).await.expect("Failed to create order")
    }

    /// Registers an online provider in `bucket_id` whose token limits are `[min, max]` whole tokens, quoting the market
    /// rate.
    pub async fn add_provider(&self, name: &str, bucket_id: i64, min: i64, max: i64) -> ProviderProfile {
        let catalog = self.catalog();
        let provider = catalog
            .register_provider(NewProviderProfile {
                trading_name: name.into(),
                currency_id: self.currency_id,
                provision_mode: ProvisionMode::Auto,
                is_partner: false,
                callback_url: None,
            })
            .await
            .expect("Failed to register provider");
        catalog
            .set_provider_token(NewProviderOrderToken {
                provider_id: provider.id,
                token_id: self.token_id,
                min_order_amount: Amount::from_units(min),
                max_order_amount: Amount::from_units(max),
                conversion_rate_type: ConversionRateType::Floating,
                fixed_conversion_rate: Amount::zero(),
                floating_conversion_rate: Amount::zero(),
                rate_slippage_bps: 100,
                address: format!("0x{name}"),
                network: "base".into(),
            })
            .await
            .expect("Failed to set provider token");
        catalog.add_provider_to_bucket(provider.id, bucket_id).await.expect("Failed to add provider to bucket");
        catalog.set_provider_availability(provider.id, true).await.expect("Failed to bring provider online")
    }

    /// Creates a payment order for `tokens` and funds it in full, returning the resulting lock order.
    pub async fn funded_lock_order(&self, tokens: i64, tx_hash: &str) -> LockPaymentOrder {
        let (_, address) = self.create_payment_order(tokens).await;
        let deposit = deposit(&address.address, tokens, tx_hash, 1_010);
        match self.indexer().record_deposit(deposit).await.expect("Failed to record deposit") {
            DepositOutcome::Recorded(order) => order,
            other => panic!("Expected a new lock order, got {other:?}"),
        }
    }
}

pub fn deposit(to_address: &str, tokens: i64, tx_hash: &str, block_number: i64) -> Deposit {
    Deposit {
        to_address: to_address.to_string(),
        amount: Amount::from_units(tokens),
        tx_hash: tx_hash.to_string(),
        block_number,
        confirmations: 12,
    }
}
