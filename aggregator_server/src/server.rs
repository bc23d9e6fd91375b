use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use aggregator_engine::{
    events::EventProducers,
    helpers::SeededAddressDeriver,
    traits::AggregatorDatabase,
    AddressAllocatorApi,
    CatalogApi,
    ChainIndexerApi,
    FulfillmentApi,
    MatchingApi,
    SqliteDatabase,
    WebhookApi,
};
use log::*;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::{
        notifications::{create_alert_handlers, create_deposit_handlers, create_notification_handlers, Webhooks},
        HttpWebhookTransport,
        ScannerChainHead,
        SIGNATURE_HEADER,
    },
    middleware::HmacMiddlewareFactory,
    routes::{
        health,
        CancelOrderRoute,
        ConfirmRefundRoute,
        CreateOrderRoute,
        ExhaustedWebhooksRoute,
        FulfillOrderRoute,
        LockOrderRoute,
        PaymentOrderRoute,
        RecordDepositRoute,
        RefundOrderRoute,
        ReviewQueueRoute,
        ValidateOrderRoute,
    },
    workers::{start_housekeeping_worker, start_matching_worker, start_webhook_retry_worker, Allocator},
};

/// Every long-lived component of a running aggregator, built once at start-up and shared by the HTTP workers and the
/// background tasks.
#[derive(Clone)]
pub struct AppContext {
    pub db: SqliteDatabase,
    pub producers: EventProducers,
    pub chain_head: ScannerChainHead,
    pub allocator: Arc<Allocator>,
    pub matching: Arc<MatchingApi<SqliteDatabase>>,
    pub fulfillment: Arc<FulfillmentApi<SqliteDatabase>>,
    pub webhooks: Arc<Webhooks>,
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let mut db_handle = db.clone();
    let context = build_context(&config, db).await?;
    start_workers(&config, &context);
    let srv = create_server_instance(config, context)?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    info!("🚀️ Server stopped. Closing {}", db_handle.url());
    if let Err(e) = db_handle.close().await {
        warn!("🚀️ Could not close the database cleanly. {e}");
    }
    result
}

/// Builds the component APIs and wires up the event hooks between them.
///
/// Hooks are created in stages, because later hooks call into components that publish to earlier ones: the webhook
/// API escalates to the alert hooks, and the deposit hook runs the matcher, which publishes provider assignments to
/// the notification hooks. The producers of every stage are merged, and that one set is handed to all components.
pub async fn build_context(config: &ServerConfig, db: SqliteDatabase) -> Result<AppContext, ServerError> {
    if !config.webhook_secret.is_set() {
        return Err(ServerError::ConfigurationError("AGG_WEBHOOK_SECRET must be set".into()));
    }
    if !config.address_seed.is_set() {
        return Err(ServerError::ConfigurationError("AGG_ADDRESS_SEED must be set".into()));
    }
    let transport = HttpWebhookTransport::new(config.webhook.timeout)
        .map_err(|e| ServerError::InitializeError(format!("Could not build the webhook HTTP client. {e}")))?;

    let alerts = create_alert_handlers();
    let producers = alerts.producers();
    let webhooks = Arc::new(WebhookApi::new(
        db.clone(),
        transport,
        config.webhook_secret.clone(),
        config.webhook_options(),
        producers.clone(),
    ));
    let notifications = create_notification_handlers(Arc::clone(&webhooks));
    let producers = producers.merge(notifications.producers());
    let matching = Arc::new(MatchingApi::new(db.clone(), config.matching_options(), producers.clone()));
    let deposits = create_deposit_handlers(Arc::clone(&webhooks), Arc::clone(&matching));
    let producers = producers.merge(deposits.producers());
    alerts.start_handlers().await;
    notifications.start_handlers().await;
    deposits.start_handlers().await;
    info!("📬️ Event handlers started");

    let chain_head = ScannerChainHead::new(config.chain_start_block);
    let deriver = SeededAddressDeriver::new(config.address_seed.reveal());
    let allocator = Arc::new(AddressAllocatorApi::new(
        db.clone(),
        chain_head.clone(),
        deriver,
        config.allocator_options(),
        producers.clone(),
    ));
    let fulfillment = Arc::new(FulfillmentApi::new(db.clone(), config.fulfillment_options(), producers.clone()));
    Ok(AppContext { db, producers, chain_head, allocator, matching, fulfillment, webhooks })
}

pub fn start_workers(config: &ServerConfig, context: &AppContext) {
    let intervals = config.intervals;
    start_matching_worker(Arc::clone(&context.matching), intervals.matching);
    start_webhook_retry_worker(Arc::clone(&context.webhooks), intervals.webhook_retry);
    start_housekeeping_worker(Arc::clone(&context.allocator), Arc::clone(&context.fulfillment), intervals.housekeeping);
}

pub fn create_server_instance(config: ServerConfig, context: AppContext) -> Result<Server, ServerError> {
    let (host, port) = (config.host.clone(), config.port);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("agg::access_log"))
            .configure(|cfg| configure_routes(cfg, &config, &context))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Registers the shared state and every route. Called once per HTTP worker.
pub fn configure_routes(cfg: &mut web::ServiceConfig, config: &ServerConfig, context: &AppContext) {
    let indexer_api = ChainIndexerApi::new(context.db.clone(), config.indexer_options(), context.producers.clone());
    let catalog_api = CatalogApi::new(context.db.clone());
    let provider_scope = web::scope("/v1/provider")
        .wrap(HmacMiddlewareFactory::new(SIGNATURE_HEADER, config.provider_secret.clone(), config.provider_hmac_checks))
        .service(FulfillOrderRoute::<SqliteDatabase>::new())
        .service(ValidateOrderRoute::<SqliteDatabase>::new())
        .service(CancelOrderRoute::<SqliteDatabase>::new());
    cfg.app_data(web::Data::from(Arc::clone(&context.allocator)))
        .app_data(web::Data::from(Arc::clone(&context.matching)))
        .app_data(web::Data::from(Arc::clone(&context.fulfillment)))
        .app_data(web::Data::from(Arc::clone(&context.webhooks)))
        .app_data(web::Data::new(indexer_api))
        .app_data(web::Data::new(catalog_api))
        .app_data(web::Data::new(context.chain_head.clone()))
        .service(health)
        .service(CreateOrderRoute::<SqliteDatabase>::new())
        .service(PaymentOrderRoute::<SqliteDatabase>::new())
        .service(RecordDepositRoute::<SqliteDatabase>::new())
        .service(ReviewQueueRoute::<SqliteDatabase>::new())
        .service(ExhaustedWebhooksRoute::<SqliteDatabase>::new())
        .service(provider_scope)
        .service(ConfirmRefundRoute::<SqliteDatabase>::new())
        .service(RefundOrderRoute::<SqliteDatabase>::new())
        .service(LockOrderRoute::<SqliteDatabase>::new());
}
