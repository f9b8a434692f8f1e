//! HTTPS listener

use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use relay_core::ListenerConfig;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    addr: SocketAddr,
    tls: RustlsConfig,
    grace: Duration,
}

impl Server {
    /// Resolve the bind address and load the TLS material
    pub async fn new(listener: &ListenerConfig, port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", listener.bind_address, port)
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", listener.bind_address))?;
        let tls = load_tls(&listener.ssl_cert, &listener.ssl_key, listener.ssl_ca_cert.as_deref()).await?;

        Ok(Self {
            addr,
            tls,
            grace: listener.shutdown_grace(),
        })
    }

    /// Serve until `shutdown` resolves, then stop accepting connections
    pub async fn run<F>(self, router: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::new();
        let grace = self.grace;

        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("Stopping listener");
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        info!(addr = %self.addr, "HTTPS listener started");

        axum_server::bind_rustls(self.addr, self.tls)
            .handle(handle)
            .serve(router.layer(TraceLayer::new_for_http()).into_make_service())
            .await
            .context("HTTPS listener error")
    }
}

/// Build the rustls config, appending the CA chain to the certificate
async fn load_tls(cert: &Path, key: &Path, ca_chain: Option<&Path>) -> Result<RustlsConfig> {
    let mut cert_pem = tokio::fs::read(cert)
        .await
        .with_context(|| format!("Failed to read certificate {}", cert.display()))?;
    if let Some(ca_chain) = ca_chain {
        let chain = tokio::fs::read(ca_chain)
            .await
            .with_context(|| format!("Failed to read CA chain {}", ca_chain.display()))?;
        if !cert_pem.ends_with(b"\n") {
            cert_pem.push(b'\n');
        }
        cert_pem.extend_from_slice(&chain);
    }

    let key_pem = tokio::fs::read(key)
        .await
        .with_context(|| format!("Failed to read private key {}", key.display()))?;

    RustlsConfig::from_pem(cert_pem, key_pem)
        .await
        .context("Invalid TLS certificate or key")
}

/// Ctrl+C and SIGTERM, captured from the moment of installation
///
/// A signal arriving before [`ShutdownSignal::recv`] is first awaited is
/// kept, not handled by the default action.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received interrupt"),
            _ = self.terminate.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}
