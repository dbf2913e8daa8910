//! Synthetic camera streaming demo
//!
//! Run with: cargo run --example synthetic_stream [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example synthetic_stream                  # binds to 0.0.0.0:8081
//!   cargo run --example synthetic_stream 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Each viewer receives frames as `[u32 big-endian length][frame bytes]`.
//! Try it with:
//!   nc localhost 8081 | xxd | head
//!
//! The pipeline toggles offline/online every 20 seconds to exercise the
//! lifecycle, the way a flaky Wi-Fi link would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use camstream::{
    ClientHandle, Connectivity, DeliveryHandler, HeapMemory, ListenerConfig, Pipeline,
    PipelineConfig, SyntheticCamera, ViewerListener, WorkerContext,
};

/// Length-prefixed raw frame writer
struct RawFrames;

impl DeliveryHandler for RawFrames {
    type Connection = TcpStream;

    async fn deliver(
        &self,
        mut client: ClientHandle<TcpStream>,
        ctx: WorkerContext,
    ) -> camstream::Result<()> {
        let mut header = BytesMut::with_capacity(4);

        while let Some(frame) = ctx.next_frame(client.last_sequence()).await {
            header.clear();
            header.put_u32(frame.len() as u32);

            let socket = client.connection_mut();
            tokio::select! {
                _ = ctx.cancelled() => break,
                result = async {
                    socket.write_all(&header).await?;
                    socket.write_all(&frame).await?;
                    Ok::<_, std::io::Error>(())
                } => result?,
            }

            ctx.frame_sent(&mut client, frame);
        }

        tracing::info!(
            slot = ctx.slot(),
            client_id = client.id(),
            frames = client.frames_sent(),
            "Viewer finished"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let bind_addr: SocketAddr = match args.get(1) {
        Some(addr) => addr.parse()?,
        None => "0.0.0.0:8081".parse()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camstream=debug".parse()?)
                .add_directive("synthetic_stream=info".parse()?),
        )
        .init();

    let config = PipelineConfig::default()
        .resolution(320, 240)
        .frame_interval(Duration::from_millis(100));
    let mut memory = HeapMemory::for_config(&config);
    let camera = SyntheticCamera::new(24 * 1024);

    let pipeline = match Pipeline::bootstrap(config, &mut memory, camera, RawFrames) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, "Cannot run without frame buffers");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Online);
    let follower = pipeline.follow_connectivity(connectivity_rx);

    let listener = ViewerListener::new(ListenerConfig::with_addr(bind_addr), Arc::clone(&pipeline));
    let server = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            tracing::error!(error = %e, "Listener failed");
        }
    });

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    let mut flap_interval = tokio::time::interval(Duration::from_secs(20));
    flap_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = pipeline.stats().await;
                tracing::info!(
                    state = %stats.state,
                    viewers = stats.occupied_slots,
                    received = stats.frames.received,
                    stored = stats.frames.stored,
                    dropped = stats.frames.dropped(),
                    sent = stats.frames.sent,
                    rejected = stats.dispatch.rejected(),
                    "Stats"
                );
            }
            _ = flap_interval.tick() => {
                let next = match *connectivity_tx.borrow() {
                    Connectivity::Online => Connectivity::Offline,
                    Connectivity::Offline => Connectivity::Online,
                };
                tracing::info!(status = %next, "Simulated connectivity change");
                connectivity_tx.send_replace(next);
            }
        }
    }

    server.abort();
    drop(connectivity_tx);
    follower.await?;
    pipeline.stop().await;

    Ok(())
}
