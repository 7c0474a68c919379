use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// Outcome of an auxiliary light toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxSupport {
    /// The request was applied
    Applied,
    /// The hardware does not expose a controllable light
    Unsupported,
}

/// Auxiliary light (torch/flash) capability.
///
/// Unsupported hardware is a degraded state, not a failure: callers log and
/// capture without illumination.
#[async_trait]
pub trait AuxLight: Send + Sync {
    async fn set_active(&self, active: bool) -> Result<AuxSupport>;
}

/// Screen/system wake-lock capability held while armed.
#[async_trait]
pub trait WakeLock: Send + Sync {
    async fn acquire(&self) -> Result<()>;

    async fn release(&self);
}

/// Aux light stand-in for platforms without a torch.
pub struct NullAuxLight;

#[async_trait]
impl AuxLight for NullAuxLight {
    async fn set_active(&self, active: bool) -> Result<AuxSupport> {
        debug!("Aux light request ignored (unsupported): active={}", active);
        Ok(AuxSupport::Unsupported)
    }
}

/// Wake-lock stand-in for platforms without one.
pub struct NullWakeLock;

#[async_trait]
impl WakeLock for NullWakeLock {
    async fn acquire(&self) -> Result<()> {
        debug!("Wake lock request ignored (unsupported)");
        Ok(())
    }

    async fn release(&self) {}
}
