use crate::traits::{
    AddressManagement,
    CatalogManagement,
    LockOrderManagement,
    PaymentOrderManagement,
    ProviderManagement,
    StorageError,
    WebhookManagement,
};

/// The highest level of behaviour for backends supporting the aggregator. A backend implementing this trait can serve
/// every API in [`crate::agg_api`].
#[allow(async_fn_in_trait)]
pub trait AggregatorDatabase:
    Clone
    + CatalogManagement
    + PaymentOrderManagement
    + AddressManagement
    + LockOrderManagement
    + ProviderManagement
    + WebhookManagement
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
