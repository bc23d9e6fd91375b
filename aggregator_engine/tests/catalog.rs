mod support;

use agg_common::Amount;
use support::{Fixture, CURRENCY, MARKET_RATE};

use aggregator_engine::{
    agg_api::{CatalogError, TilingGap},
    db_types::{ConversionRateType, NewFiatCurrency, NewNetwork, NewProviderOrderToken, NewProvisionBucket},
    traits::{MarketRates, ProviderManagement},
};

#[tokio::test]
async fn catalog_inserts_are_idempotent() {
    let fx = Fixture::new().await;
    let catalog = fx.catalog();
    let network = NewNetwork { identifier: "base".into(), chain_id: 8453, block_time_secs: 2, is_testnet: false };
    let again = catalog.add_network(network).await.unwrap();
    assert_eq!(catalog.network("base").await.unwrap(), Some(again.clone()));
    let token = catalog.token_by_symbol("USDC", again.id).await.unwrap().unwrap();
    assert_eq!(token.id, fx.token_id);

    let currency = catalog
        .add_fiat_currency(NewFiatCurrency {
            code: CURRENCY.into(),
            name: "Naira".into(),
            symbol: "N".into(),
            market_rate: Amount::from_units(1),
        })
        .await
        .unwrap();
    assert_eq!(currency.id, fx.currency_id);
    assert_eq!(currency.market_rate, Amount::from_units(MARKET_RATE));
    assert!(catalog.institution("GTBINGLA").await.unwrap().is_some());
}

#[tokio::test]
async fn market_rates_can_be_updated() {
    let fx = Fixture::new().await;
    let catalog = fx.catalog();
    assert_eq!(fx.db.market_rate(CURRENCY).await.unwrap(), Some(Amount::from_units(MARKET_RATE)));
    let updated = catalog.set_market_rate(CURRENCY, "1612.25".parse().unwrap()).await.unwrap();
    assert_eq!(updated.market_rate.to_string(), "1612.25");
    assert_eq!(fx.db.market_rate(CURRENCY).await.unwrap(), Some(updated.market_rate));
    assert!(fx.db.market_rate("KES").await.unwrap().is_none());

    assert!(matches!(catalog.set_market_rate("KES", Amount::from_units(130)).await, Err(CatalogError::UnknownCurrency(_))));
    assert!(matches!(catalog.set_market_rate(CURRENCY, Amount::zero()).await, Err(CatalogError::InvalidRate(_))));
}

#[tokio::test]
async fn overlapping_buckets_are_rejected() {
    let fx = Fixture::new().await;
    let catalog = fx.catalog();
    let overlapping = NewProvisionBucket {
        currency_id: fx.currency_id,
        min_amount: Amount::from_units(40_000),
        max_amount: Amount::from_units(60_000),
    };
    let err = catalog.add_provision_bucket(overlapping).await.unwrap_err();
    assert!(matches!(err, CatalogError::OverlappingBucket { existing, .. } if existing == fx.buckets[0].id));

    let inverted =
        NewProvisionBucket { currency_id: fx.currency_id, min_amount: Amount::from_units(9), max_amount: Amount::from_units(1) };
    assert!(matches!(catalog.add_provision_bucket(inverted).await, Err(CatalogError::InvalidBucket(_))));

    // sharing a boundary with the top bucket is fine
    let touching = NewProvisionBucket {
        currency_id: fx.currency_id,
        min_amount: Amount::from_units(500_000),
        max_amount: Amount::from_units(900_000),
    };
    catalog.add_provision_bucket(touching).await.unwrap();
    assert_eq!(catalog.provision_buckets(CURRENCY).await.unwrap().len(), 3);
}

#[tokio::test]
async fn tiling_gaps_are_reported() {
    let fx = Fixture::new().await;
    let catalog = fx.catalog();
    assert!(catalog.validate_bucket_tiling(CURRENCY).await.unwrap().is_empty());
    let detached = NewProvisionBucket {
        currency_id: fx.currency_id,
        min_amount: Amount::from_units(600_000),
        max_amount: Amount::from_units(900_000),
    };
    catalog.add_provision_bucket(detached).await.unwrap();
    let gaps = catalog.validate_bucket_tiling(CURRENCY).await.unwrap();
    assert_eq!(gaps, vec![TilingGap { after: Amount::from_units(500_000), before: Amount::from_units(600_000) }]);
    assert!(matches!(catalog.validate_bucket_tiling("XYZ").await, Err(CatalogError::UnknownCurrency(_))));
}

#[tokio::test]
async fn provider_membership_and_settings() {
    let fx = Fixture::new().await;
    let catalog = fx.catalog();
    let provider = fx.add_provider("acme", fx.buckets[0].id, 0, 100).await;
    assert!(provider.is_available);
    assert!(provider.last_seen_at.is_some());

    let candidates = fx.db.fetch_bucket_candidates(fx.buckets[0].id, fx.token_id).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].token.max_order_amount, Amount::from_units(100));

    let mut settings = NewProviderOrderToken {
        provider_id: provider.id,
        token_id: fx.token_id,
        min_order_amount: Amount::from_units(5),
        max_order_amount: Amount::from_units(500),
        conversion_rate_type: ConversionRateType::Fixed,
        fixed_conversion_rate: Amount::from_units(1_490),
        floating_conversion_rate: Amount::zero(),
        rate_slippage_bps: 100,
        address: "0xacme".into(),
        network: "base".into(),
    };
    let updated = catalog.set_provider_token(settings.clone()).await.unwrap();
    assert_eq!(updated.max_order_amount, Amount::from_units(500));
    assert_eq!(updated.conversion_rate_type, ConversionRateType::Fixed);
    let candidates = fx.db.fetch_bucket_candidates(fx.buckets[0].id, fx.token_id).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].token.id, updated.id);

    settings.min_order_amount = Amount::from_units(1_000);
    assert!(matches!(catalog.set_provider_token(settings).await, Err(CatalogError::InvalidProviderSettings(_))));

    catalog.add_provider_to_bucket(provider.id, fx.buckets[0].id).await.unwrap();
    catalog.remove_provider_from_bucket(provider.id, fx.buckets[0].id).await.unwrap();
    assert!(fx.db.fetch_bucket_candidates(fx.buckets[0].id, fx.token_id).await.unwrap().is_empty());

    let offline = catalog.set_provider_availability(provider.id, false).await.unwrap();
    assert!(!offline.is_available);
    assert!(matches!(catalog.set_provider_availability(9_999, true).await, Err(CatalogError::ProviderNotFound(9_999))));
}
