//! Viewer listener
//!
//! Handles the TCP accept loop and submits each connection to the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::dispatch::{ClientHandle, DeliveryHandler};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::server::config::ListenerConfig;

/// Accepts viewers and feeds the admission queue
pub struct ViewerListener<H>
where
    H: DeliveryHandler<Connection = TcpStream>,
{
    config: ListenerConfig,
    pipeline: Arc<Pipeline<H>>,
}

impl<H> ViewerListener<H>
where
    H: DeliveryHandler<Connection = TcpStream>,
{
    pub fn new(config: ListenerConfig, pipeline: Arc<Pipeline<H>>) -> Self {
        Self { config, pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<H>> {
        &self.pipeline
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Viewer listener bound");
        Ok(listener)
    }

    /// Bind and accept forever
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(&listener).await
    }

    /// Bind and accept until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind().await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(&listener) => result,
        }
    }

    /// Accept loop on an already bound socket
    pub async fn serve(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(peer = %peer_addr, error = %e, "Failed to configure socket");
            return;
        }

        let client_id = self.pipeline.next_client_id();
        tracing::debug!(client_id, peer = %peer_addr, "New viewer connection");

        let handle = ClientHandle::new(client_id, socket).with_peer(peer_addr);
        if !self.pipeline.submit_or_close(handle) {
            tracing::debug!(client_id, peer = %peer_addr, "Viewer connection closed on admission");
        }
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}
