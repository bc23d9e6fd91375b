use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use aggregator_engine::traits::ChainHead;

/// The chain head as last reported by the chain scanner.
///
/// The scanner pushes transfers to `/v1/deposits`; each one tells us the chain has reached at least
/// `block_number + confirmations - 1`. Newly leased addresses are stamped with this height.
#[derive(Clone, Debug, Default)]
pub struct ScannerChainHead {
    height: Arc<AtomicI64>,
}

impl ScannerChainHead {
    pub fn new(start_height: i64) -> Self {
        Self { height: Arc::new(AtomicI64::new(start_height)) }
    }

    pub fn observe(&self, block_number: i64, confirmations: i64) {
        let head = block_number + confirmations.max(1) - 1;
        self.height.fetch_max(head, Ordering::Relaxed);
    }

    pub fn height(&self) -> i64 {
        self.height.load(Ordering::Relaxed)
    }
}

impl ChainHead for ScannerChainHead {
    type Error = Infallible;

    async fn current_block(&self) -> Result<i64, Self::Error> {
        Ok(self.height())
    }
}
