pub mod keygen;
pub mod tokens;

use std::sync::Arc;

use anyhow::{Context, Result};
use sessionward_auth::{BackendKind, LifecycleConfig, LifecycleManager, TracingAuditSink};

use crate::output::print_warning;

/// Connects to the configured store and builds the manager.
pub async fn connect(config: LifecycleConfig) -> Result<LifecycleManager> {
    if config.backend == BackendKind::Memory {
        print_warning("memory backend: records are discarded when this command exits");
    }
    sessionward_auth_redis::create_lifecycle_manager(config, Arc::new(TracingAuditSink))
        .await
        .context("Failed to start the token lifecycle manager")
}
