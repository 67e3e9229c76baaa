use tidepool_core::blockchain::block::Hash;
use tokio_util::sync::CancellationToken;

/// The tip currently being mined and the token that stops its reissue loop.
///
/// Only one epoch is live at a time: installing a new one cancels the
/// previous epoch first.
#[derive(Debug)]
pub struct MiningEpoch {
    tip: Hash,
    token: CancellationToken,
}

impl MiningEpoch {
    pub fn new(tip: Hash) -> Self {
        Self {
            tip,
            token: CancellationToken::new(),
        }
    }

    pub fn tip(&self) -> Hash {
        self.tip
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Holder of the live epoch.
#[derive(Debug, Default)]
pub struct EpochSlot {
    current: Option<MiningEpoch>,
}

impl EpochSlot {
    /// Cancel whatever is live and install `epoch`.
    pub fn replace(&mut self, epoch: MiningEpoch) {
        if let Some(old) = self.current.take() {
            old.cancel();
        }
        self.current = Some(epoch);
    }

    pub fn current(&self) -> Option<&MiningEpoch> {
        self.current.as_ref()
    }
}
