//! Accept loop, worker-thread runtime, and signal-driven shutdown (§4.5
//! "Architecture"). This crate builds no binary; `run` is the entry point an
//! external CLI or service wrapper calls after parsing a [`ServerConfig`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::connection::{handle_connection, WatchdogConfig};
use crate::request_handler::RequestHandler;

/// Build the `n_threads`-worker multi-threaded runtime described in §4.5 and
/// run the accept loop to completion (until a shutdown signal arrives).
pub fn run(config: ServerConfig, watchdog: WatchdogConfig) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.n_threads as usize)
        .enable_all()
        .build()?;
    runtime.block_on(run_async(config, watchdog))
}

async fn run_async(config: ServerConfig, watchdog: WatchdogConfig) -> io::Result<()> {
    config.install_limits();

    if let Some(pid_file) = &config.pid_file {
        std::fs::write(pid_file, std::process::id().to_string())?;
    }

    let handler = Arc::new(RequestHandler::new(
        &config.index_dir,
        &config.methylome_dir,
        config.max_resident,
        config.max_resident,
    ));

    let listener = TcpListener::bind((config.hostname.as_str(), config.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "server listening");

    let stopping = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let signal_stopping = Arc::clone(&stopping);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_stopping.store(true, Ordering::SeqCst);
        let _ = signal_tx.send(());
    });

    let mut tasks = Vec::new();
    while !stopping.load(Ordering::SeqCst) {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, _) = accepted?;
                let handler = Arc::clone(&handler);
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, &handler, watchdog).await {
                        tracing::warn!(error = %e, "connection ended with an I/O error");
                    }
                }));
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    for task in tasks {
        let _ = task.await;
    }

    if let Some(pid_file) = &config.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }

    Ok(())
}

/// Race SIGINT/SIGTERM/SIGHUP (Unix) and resolve on whichever fires first.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

/// Default watchdog timeouts (§4.5), overridable per-deployment.
#[must_use]
pub fn default_watchdog() -> WatchdogConfig {
    WatchdogConfig {
        comm_timeout: Duration::from_secs(30),
        work_timeout: Duration::from_secs(60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use crate::genome_index::GenomeIndex;
    use crate::request::{limits, Request};
    use crate::response::ResponseHeader;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[serial]
    #[tokio::test]
    async fn test_accept_loop_serves_one_request_then_stops_on_signal() {
        limits::reset_to_defaults();
        let index_dir = tempfile::tempdir().unwrap();
        let methylome_dir = tempfile::tempdir().unwrap();
        let index = GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50, 900]]);
        index.write(index_dir.path(), "toy").unwrap();

        let handler = Arc::new(RequestHandler::new(index_dir.path(), methylome_dir.path(), 8, 8));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handler = Arc::clone(&handler);
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, &server_handler, default_watchdog()).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let req = Request::new_bins(false, index.hash, 500, vec!["missing".to_string()]);
        client.write_all(&req.compose().unwrap()).await.unwrap();

        let mut header_buf = vec![0u8; crate::response::RESPONSE_HEADER_BUFFER_SIZE];
        let n = client.read(&mut header_buf).await.unwrap();
        header_buf.truncate(n);
        let header = ResponseHeader::parse(&header_buf).unwrap();
        assert_eq!(header.status, crate::error::ServerError::MethylomeNotFound);

        server.await.unwrap();
    }
}
