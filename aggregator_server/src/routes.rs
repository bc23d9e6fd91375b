//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests:
//! ```nocompile
//!     fn my_handler() -> impl Responder {
//!         std::thread::sleep(Duration::from_secs(5)); // <-- Bad practice! Will cause the current worker thread to
//! hang!
//!     }
//! ```
//! For this reason, any long, non-cpu-bound operation (e.g. I/O, database operations, etc.) should be expressed as
//! futures or asynchronous functions. Async handlers get executed concurrently by worker threads and thus don’t block
//! execution:
//!
//! ```nocompile
//!     async fn my_handler() -> impl Responder {
//!         tokio::time::sleep(Duration::from_secs(5)).await; // <-- Ok. Worker thread will handle other requests here
//!     }
//! ```
//!
//! ## Paths
//! `/v1/orders/{id}` and everything below it address *lock orders*, the unit that providers fulfil and that gets
//! refunded. Merchants create payment orders with `POST /v1/orders` and read them back from `/v1/payment_orders/{id}`.
use actix_web::{get, web, HttpResponse, Responder};
use aggregator_engine::{
    agg_api::{Deposit, DepositOutcome, ValidationOutcome},
    db_types::NewPaymentOrder,
    helpers::SeededAddressDeriver,
    traits::{
        AddressManagement,
        CatalogManagement,
        LockOrderManagement,
        MarketRates,
        PaymentOrderManagement,
        ProviderManagement,
        WebhookManagement,
    },
    AddressAllocatorApi,
    CatalogApi,
    ChainIndexerApi,
    FulfillmentApi,
    MatchingApi,
    WebhookApi,
};
use log::*;
use serde_json::json;

use crate::{
    data_objects::{
        CancelRequest,
        DepositResponse,
        FulfillRequest,
        JsonResponse,
        LockOrderResponse,
        NewOrderRequest,
        PaymentOrderResponse,
        RefundRequest,
        ValidateRequest,
        ValidationVerdict,
    },
    errors::ServerError,
    integrations::{HttpWebhookTransport, ScannerChainHead},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:path),+) => {
        paste::paste! { pub struct [<$name:camel Route>]<B>(core::marker::PhantomData<fn() -> B>);}
        paste::paste! { impl<B> [<$name:camel Route>]<B> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> B>)
            }
        }}
        paste::paste! { impl<B> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<B>
        where
            B: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<B>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

pub type AllocatorApi<B> = AddressAllocatorApi<B, ScannerChainHead, SeededAddressDeriver>;

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Payment orders  ----------------------------------------------
route!(create_order => Post "/v1/orders" impl AddressManagement, PaymentOrderManagement, CatalogManagement, ProviderManagement);
/// Route handler for creating a payment order
///
/// Resolves the token and currency from the catalog, stores the order and leases a deposit address to it. The
/// response carries the address the customer must pay into before the funding window closes.
///
/// If no rate is given, the currency's current market rate is used.
pub async fn create_order<B>(
    body: web::Json<NewOrderRequest>,
    allocator: web::Data<AllocatorApi<B>>,
    catalog: web::Data<CatalogApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: AddressManagement + PaymentOrderManagement + CatalogManagement + ProviderManagement,
{
    let req = body.into_inner();
    trace!("💻️ Received new order request: {req:?}");
    let network = catalog
        .network(&req.network)
        .await?
        .ok_or_else(|| ServerError::InvalidRequestBody(format!("Unknown network: {}", req.network)))?;
    let token = catalog
        .token_by_symbol(&req.token, network.id)
        .await?
        .filter(|t| t.is_enabled)
        .ok_or_else(|| ServerError::InvalidRequestBody(format!("{} is not supported on {}", req.token, req.network)))?;
    let currency = catalog
        .fiat_currency(&req.currency)
        .await?
        .filter(|c| c.is_enabled)
        .ok_or_else(|| ServerError::InvalidRequestBody(format!("{} is not a supported currency", req.currency)))?;
    let order = NewPaymentOrder {
        token_id: token.id,
        amount: req.amount,
        rate: req.rate.unwrap_or(currency.market_rate),
        institution: req.institution,
        account_identifier: req.account_identifier,
        account_name: req.account_name,
        currency: currency.code,
        memo: req.memo,
        webhook_url: req.webhook_url,
    };
    let (order, address) = allocator.create_payment_order(order).await?;
    debug!("💻️ Payment order #{} created. Pay into {}", order.id, address.address);
    Ok(HttpResponse::Created().json(PaymentOrderResponse { order, receive_address: Some(address) }))
}

route!(payment_order => Get "/v1/payment_orders/{id}" impl AddressManagement, PaymentOrderManagement);
pub async fn payment_order<B>(
    path: web::Path<i64>,
    allocator: web::Data<AllocatorApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: AddressManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    debug!("💻️ GET payment order #{id}");
    let order = allocator
        .fetch_payment_order(id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment order #{id}")))?;
    let receive_address = allocator.fetch_address_for_order(id).await?;
    Ok(HttpResponse::Ok().json(PaymentOrderResponse { order, receive_address }))
}

//----------------------------------------------   Chain scanner  ----------------------------------------------
route!(record_deposit => Post "/v1/deposits" impl AddressManagement, PaymentOrderManagement, LockOrderManagement, MarketRates);
/// Route handler for transfers reported by the chain scanner
///
/// The scanner may deliver the same transfer any number of times. The first confirmed delivery creates a lock order;
/// every later one is answered with `duplicate` and changes nothing.
pub async fn record_deposit<B>(
    body: web::Json<Deposit>,
    api: web::Data<ChainIndexerApi<B>>,
    chain_head: web::Data<ScannerChainHead>,
) -> Result<HttpResponse, ServerError>
where
    B: AddressManagement + PaymentOrderManagement + LockOrderManagement + MarketRates,
{
    let deposit = body.into_inner();
    trace!("💻️ Received deposit: {deposit:?}");
    chain_head.observe(deposit.block_number, deposit.confirmations);
    let response = match api.record_deposit(deposit).await? {
        DepositOutcome::Recorded(order) => DepositResponse::Recorded { order },
        DepositOutcome::Duplicate(order) => DepositResponse::Duplicate { order },
        DepositOutcome::Unconfirmed { confirmations, required } => {
            DepositResponse::Unconfirmed { confirmations, required }
        },
        DepositOutcome::NotLeased => DepositResponse::NotLeased,
    };
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Lock orders  ----------------------------------------------
route!(lock_order => Get "/v1/orders/{id}" impl LockOrderManagement, PaymentOrderManagement);
pub async fn lock_order<B>(
    path: web::Path<i64>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    debug!("💻️ GET lock order #{id}");
    let order = api.lock_order(id).await?;
    let cancellations = api.cancellation_history(id).await?;
    Ok(HttpResponse::Ok().json(LockOrderResponse { order, cancellations }))
}

route!(refund_order => Post "/v1/orders/{id}/refund" impl LockOrderManagement, PaymentOrderManagement);
/// Records the on-chain refund of a cancelled lock order.
pub async fn refund_order<B>(
    path: web::Path<i64>,
    body: web::Json<RefundRequest>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    debug!("💻️ POST refund for lock order #{id}");
    let order = api.refund(id, &body.refund_tx_hash).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(confirm_refund => Post "/v1/orders/{id}/refund/confirm" impl LockOrderManagement, PaymentOrderManagement);
pub async fn confirm_refund<B>(
    path: web::Path<i64>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    debug!("💻️ POST refund confirmation for lock order #{id}");
    let order = api.confirm_refund(id).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(review_queue => Get "/v1/review/orders" impl LockOrderManagement, ProviderManagement, CatalogManagement, MarketRates);
/// Lock orders that could not be matched after the maximum number of sweeps and need an operator's attention.
pub async fn review_queue<B>(api: web::Data<MatchingApi<B>>) -> Result<HttpResponse, ServerError>
where B: LockOrderManagement + ProviderManagement + CatalogManagement + MarketRates {
    debug!("💻️ GET manual review queue");
    let orders = api.orders_for_manual_review().await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(exhausted_webhooks => Get "/v1/webhooks/exhausted" impl WebhookManagement);
pub async fn exhausted_webhooks<B>(
    api: web::Data<WebhookApi<B, HttpWebhookTransport>>,
) -> Result<HttpResponse, ServerError>
where
    B: WebhookManagement,
{
    debug!("💻️ GET exhausted webhooks");
    let attempts = api.exhausted_attempts().await?;
    Ok(HttpResponse::Ok().json(attempts))
}

//----------------------------------------------   Provider callbacks  ----------------------------------------------
// These are mounted under the `/v1/provider` scope, which checks the HMAC signature of every request.

route!(fulfill_order => Post "/orders/{id}/fulfill" impl LockOrderManagement, PaymentOrderManagement);
/// The assigned provider reports that it has paid out the order.
pub async fn fulfill_order<B>(
    path: web::Path<i64>,
    body: web::Json<FulfillRequest>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    let req = body.into_inner();
    debug!("💻️ Provider #{} reports lock order #{id} fulfilled", req.provider_id);
    let (order, fulfillment) = api.mark_fulfilled(id, req.provider_id, &req.tx_id, &req.psp).await?;
    Ok(HttpResponse::Ok().json(json!({ "order": order, "fulfillment": fulfillment })))
}

route!(validate_order => Post "/orders/{id}/validate" impl LockOrderManagement, PaymentOrderManagement);
/// Records whether the reported payout actually reached the recipient.
pub async fn validate_order<B>(
    path: web::Path<i64>,
    body: web::Json<ValidateRequest>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    let req = body.into_inner();
    let outcome = match req.status {
        ValidationVerdict::Success => ValidationOutcome::Success,
        ValidationVerdict::Failed => {
            ValidationOutcome::Failed(req.reason.unwrap_or_else(|| "No reason given".to_string()))
        },
    };
    debug!("💻️ Validation verdict for lock order #{id}: {outcome:?}");
    let order = api.validate(id, outcome).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(cancel_order => Post "/orders/{id}/cancel" impl LockOrderManagement, PaymentOrderManagement);
/// The assigned provider declines the order. It goes back to the matching pool, or is cancelled for a refund if it
/// has failed too many times.
pub async fn cancel_order<B>(
    path: web::Path<i64>,
    body: web::Json<CancelRequest>,
    api: web::Data<FulfillmentApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: LockOrderManagement + PaymentOrderManagement,
{
    let id = path.into_inner();
    let req = body.into_inner();
    debug!("💻️ Provider #{} declines lock order #{id}: {}", req.provider_id, req.reason);
    let order = api.cancel(id, req.provider_id, &req.reason).await?;
    let message = format!("Lock order #{id} is now {}", order.status);
    Ok(HttpResponse::Ok().json(JsonResponse::success(message)))
}
