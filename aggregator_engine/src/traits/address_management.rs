use crate::{
    db_types::{AddressLease, ReceiveAddress},
    traits::{InsertResult, StorageError},
};

/// Deposit address leasing.
///
/// `account_index` is unique across all addresses, so an index is never handed out twice. Minting is a
/// claim-and-retry: the caller reads [`Self::next_account_index`], tries to insert, and on
/// [`InsertResult::AlreadyExists`] (another allocator won the index) reads the next index again.
#[allow(async_fn_in_trait)]
pub trait AddressManagement {
    /// Atomically takes an address from the recycling pool (released without ever receiving funds) and leases it to
    /// the order in `lease`. The order's `receive_address_text` is updated in the same transaction.
    /// Returns `None` if the pool is empty.
    async fn lease_recycled_address(&self, lease: &AddressLease) -> Result<Option<ReceiveAddress>, StorageError>;

    /// One more than the highest account index issued so far (0 for an empty table).
    async fn next_account_index(&self) -> Result<i64, StorageError>;

    /// Stores a freshly minted address leased to the order in `lease`, and updates the order's
    /// `receive_address_text`. Returns `AlreadyExists` carrying the current holder of that index if the index (or
    /// address) was already taken.
    async fn insert_receive_address(
        &self,
        address: &str,
        account_index: i64,
        lease: &AddressLease,
    ) -> Result<InsertResult<ReceiveAddress>, StorageError>;

    async fn fetch_receive_address(&self, address: &str) -> Result<Option<ReceiveAddress>, StorageError>;

    async fn fetch_address_for_order(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, StorageError>;

    /// Ends the lease held by `payment_order_id`. The address becomes `Expired`. If it never received funds, it is also
    /// detached from the order so that it re-enters the recycling pool; otherwise it stays bound to the order forever.
    /// This decision is made atomically with the update, so a deposit racing the release can never be lost.
    ///
    /// Returns `None` if the order holds no active lease.
    async fn release_address(&self, payment_order_id: i64) -> Result<Option<ReceiveAddress>, StorageError>;
}
