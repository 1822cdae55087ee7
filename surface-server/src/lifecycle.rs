//! Lifecycle & Supervision (spec §4.10): startup ordering and the
//! shutdown drain deadline. The accept loops and task wiring themselves
//! live in `main.rs`, which is what actually owns the sockets; this
//! module holds the small pieces of policy that don't belong to any one
//! component.

use std::time::Duration;

use crate::types::{Area, AreaId};

/// "drain outbound queues for up to 2 s, then close" (spec §4.10).
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Waits for Ctrl-C (or, on Unix, SIGTERM) and returns once either fires.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received sigterm, shutting down"),
    }
}

/// Finds the area id matching `name`, for resolving configured runway
/// names (`RWY_A`/`RWY_B`) to the ids the pilot channel queries against.
#[must_use]
pub fn find_area_id(areas: &[Area], name: &str) -> Option<AreaId> {
    areas.iter().find(|a| a.name == name).map(|a| a.id)
}
