use blake2::{
    digest::consts::{U20, U32},
    Blake2b,
    Digest,
};

use crate::traits::AddressDeriver;

/// Derives deposit addresses by hashing a secret seed with the account index.
///
/// This stands in for an HD wallet: it is deterministic and distinct indices give distinct addresses, which is all the
/// allocator relies on.
#[derive(Clone)]
pub struct SeededAddressDeriver {
    seed: Vec<u8>,
}

impl SeededAddressDeriver {
    pub fn new<S: AsRef<[u8]>>(seed: S) -> Self {
        Self { seed: seed.as_ref().to_vec() }
    }
}

impl std::fmt::Debug for SeededAddressDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SeededAddressDeriver(****)")
    }
}

impl AddressDeriver for SeededAddressDeriver {
    fn derive_address(&self, account_index: i64) -> String {
        let digest = Blake2b::<U20>::new()
            .chain_update(b"aggregator.receive_address.v1")
            .chain_update(&self.seed)
            .chain_update(account_index.to_le_bytes())
            .finalize();
        format!("0x{}", hex::encode(digest))
    }
}

/// The external correlation id of the lock order created by a deposit. The same transfer always yields the same id.
pub fn lock_order_id(tx_hash: &str, to_address: &str) -> String {
    let digest = Blake2b::<U32>::new()
        .chain_update(b"aggregator.lock_order.v1")
        .chain_update(tx_hash.to_lowercase().as_bytes())
        .chain_update(b":")
        .chain_update(to_address.to_lowercase().as_bytes())
        .finalize();
    format!("0x{}", hex::encode(digest))
}
