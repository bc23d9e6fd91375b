//! Boundaries to the chain RPC collaborator. The core never talks to a node directly.

/// Reports the current chain head, used to stamp `last_indexed_block` on newly leased addresses.
#[allow(async_fn_in_trait)]
pub trait ChainHead {
    type Error: std::error::Error;

    async fn current_block(&self) -> Result<i64, Self::Error>;
}

/// Turns an account index into a deposit address. Implementations must be deterministic and injective: distinct indices
/// must never produce the same address.
pub trait AddressDeriver {
    fn derive_address(&self, account_index: i64) -> String;
}
