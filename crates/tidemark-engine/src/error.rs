//! Engine-level convenience error.
//!
//! Not a "god error": a thin wrapper over the canonical capability errors,
//! preserving their retry semantics.

use thiserror::Error;

use tidemark_core::{CoreError, Transience};
use tidemark_store::{LeaseError, StoreError};

use crate::remote::TransportError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Lease(#[from] LeaseError),
}

impl EngineError {
    pub fn transience(&self) -> Transience {
        match self {
            EngineError::Transport(e) => e.transience(),
            EngineError::Store(e) => e.transience(),
            EngineError::Core(e) => e.transience(),
            EngineError::Lease(e) => e.transience(),
        }
    }
}
