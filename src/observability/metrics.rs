//! Prometheus metrics.
//!
//! Counters emitted by the crate:
//!
//! | Name | Labels |
//! |------|--------|
//! | `likes_store_requests_total` | `backend`, `operation`, `status` |
//! | `likes_store_retries_total` | `backend` |
//! | `likes_mutations_total` | `action` |
//! | `likes_http_requests_total` | `route`, `status` |

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Metrics configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsConfig {
    /// Address of the scrape endpoint; metrics are off when unset.
    pub listen_addr: Option<SocketAddr>,
}

impl MetricsConfig {
    /// Exposes metrics on `port` on all interfaces.
    #[must_use]
    pub const fn on_port(port: u16) -> Self {
        Self {
            listen_addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
        }
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// The listener task runs on the current tokio runtime, so this must be
/// called from inside one.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    let Some(addr) = config.listen_addr else {
        return Ok(None);
    };

    let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::OperationFailed {
        operation: "metrics_runtime".to_string(),
        cause: e.to_string(),
    })?;

    let (recorder, exporter) = {
        let _guard = runtime.enter();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "metrics_exporter_build".to_string(),
                cause: e.to_string(),
            })?
    };
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
        operation: "metrics_recorder_install".to_string(),
        cause: e.to_string(),
    })?;
    runtime.spawn(exporter);

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(Some(handle))
}
