/// Resolves once the process receives `SIGINT` or `SIGTERM` (SPEC_FULL §4.7
/// "Signals"). Used by both the parent and each worker-group process.
#[cfg(unix)]
pub async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
