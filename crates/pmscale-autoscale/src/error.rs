//! Autoscaler error types.

use std::time::Duration;

use thiserror::Error;

use pmscale_supervisor::SupervisorError;

/// Why a scale command did not complete.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("supervisor rejected scale command: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("scale command did not complete within {0:?}")]
    Timeout(Duration),
}
