//! pmscale-supervisor: the boundary to the process supervisor and host.
//!
//! The autoscaler only needs two capabilities from the outside world:
//! the supervisor's process list plus a "scale to N" command
//! ([`Supervisor`]) and the host's free memory and core count
//! ([`HostProbe`]). [`Pm2Cli`] drives a local PM2 through its CLI;
//! [`SysinfoHost`] reads host stats with `sysinfo`.

pub mod error;
pub mod host;
pub mod pm2;

use std::future::Future;
use std::pin::Pin;

use pmscale_core::{ProcessRecord, ScaleTarget};

pub use error::{SupervisorError, SupervisorResult};
pub use host::{HostProbe, SysinfoHost};
pub use pm2::Pm2Cli;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A process supervisor that can list its processes and resize an
/// application's worker pool.
pub trait Supervisor: Send + Sync {
    /// Current process list, one record per process.
    fn list(&self) -> BoxFuture<'_, SupervisorResult<Vec<ProcessRecord>>>;

    /// Resize application `name`. Resolves once the supervisor has
    /// acknowledged the command.
    fn scale<'a>(&'a self, name: &'a str, target: ScaleTarget)
    -> BoxFuture<'a, SupervisorResult<()>>;
}
