//! State shared by both connections.

use crate::blockchain::Wallet;
use crate::lifecycle::Shutdown;

/// Immutable relay identity plus the root lifetime.
#[derive(Clone)]
pub struct Session {
    wallet: Wallet,
    private_key: Vec<u8>,
    lifetime: Shutdown,
}

impl Session {
    pub fn new(wallet: Wallet) -> Self {
        let private_key = wallet.private_key_bytes();
        Self {
            wallet,
            private_key,
            lifetime: Shutdown::new(),
        }
    }

    pub fn wallet_address(&self) -> &str {
        self.wallet.address()
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn lifetime(&self) -> &Shutdown {
        &self.lifetime
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("wallet", &self.wallet)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
