//! Command handlers, one module per subcommand.
//!
//! Every handler takes its parsed arguments plus a
//! [`ConfigService`](crate::config::ConfigService) reference so tests
//! can inject configuration. The central [`dispatcher`] routes
//! [`Commands`](crate::cli::Commands) variants to handlers.

pub mod config_command;
pub mod dispatch_command;
pub mod dispatcher;
pub mod export_command;
pub mod filter_command;
pub mod normalize_command;
pub mod sample_command;
pub mod schedule_command;
pub mod work_command;
pub mod wrap_command;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Result;
use crate::core::broker::{Broker, RedisBroker};
use crate::core::sampler::nodemeta;

/// Connect the production broker.
pub(crate) async fn connect_broker(url: &str) -> Result<Arc<dyn Broker>> {
    Ok(Arc::new(RedisBroker::connect(url).await?))
}

/// Node identity: explicit flag, `NODE_ID`, then the hostname.
pub(crate) fn node_identity(explicit: Option<String>) -> String {
    explicit
        .filter(|n| !n.is_empty())
        .or_else(|| std::env::var("NODE_ID").ok().filter(|n| !n.is_empty()))
        .unwrap_or_else(nodemeta::hostname)
}

/// Stop flag flipped by Ctrl-C, shared with the long-running loops.
pub(crate) fn ctrl_c_stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::Relaxed);
        }
    });
    stop
}
