// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP liveness probe.
//!
//! Every accepted connection receives [`LIVENESS_TOKEN`] and is closed. The
//! reply says nothing about tracker health, only that the process is alive.

use crate::config::HealthConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Reply sent to every probe connection.
pub const LIVENESS_TOKEN: &[u8] = b"OK\n";

/// Liveness listener.
pub struct HealthProbe {
    listener: TcpListener,
    shutdown: Arc<Notify>,
}

impl HealthProbe {
    /// Bind the configured address.
    pub async fn bind(config: &HealthConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        Ok(Self {
            listener,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Notifier that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Serve probes until shut down.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Health probe listening on {}", addr);
        }

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tokio::spawn(async move {
                                if let Err(e) = reply(stream).await {
                                    tracing::debug!("Health probe from {} failed: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("Health probe accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    tracing::debug!("Health probe shutting down");
                    break;
                }
            }
        }
    }
}

async fn reply(mut stream: TcpStream) -> std::io::Result<()> {
    stream.write_all(LIVENESS_TOKEN).await?;
    stream.shutdown().await
}
