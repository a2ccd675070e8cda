use alias_short::{api, config, url_service::url_service_capsule, visit_worker};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let (container, worker) = config::init_container().await?;
    let (url_service, addr, shutdown_grace) = container.read((
        url_service_capsule,
        config::addr_capsule,
        config::shutdown_grace_capsule,
    ));
    let app = api::router(url_service);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // NOTE: the container owns the last visit sender; the worker only
    // stops once it is gone
    drop(container);
    info!("Server stopped; draining queued visits");
    if visit_worker::wait_for_visit_worker(worker, shutdown_grace).await {
        info!("Visit queue drained");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(?err, "Failed to install SIGTERM handler; only SIGINT will stop the server");
                wait_for_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT, shutting down"),
        Err(err) => {
            warn!(?err, "Failed to listen for SIGINT; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
