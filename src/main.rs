//! Process entry point: parse configuration, wire every component from
//! `spec.md` §2 together, and run until shutdown. Signal handling and
//! startup sequencing follow `firezone-relay`'s `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use dmx_artnet_bridge::artnet::codec::ARTNET_PORT;
use dmx_artnet_bridge::artnet::node::NodeRegistry;
use dmx_artnet_bridge::bridge;
use dmx_artnet_bridge::config::Config;
use dmx_artnet_bridge::dispatch::{DispatchContext, Dispatcher, MAX_IN_FLIGHT};
use dmx_artnet_bridge::http::{self, AppState, SystemTimeSource};
use dmx_artnet_bridge::hub;
use dmx_artnet_bridge::metrics::Metrics;
use dmx_artnet_bridge::udp::UdpEndpoint;
use dmx_artnet_bridge::workers::{self, ReceivedFrame, SendFrame};

/// Probe target used only to resolve this node's outbound IPv4 address; no
/// packet is ever sent to it (`spec.md` §4.G, §9).
const DEFAULT_PROBE_TARGET: &str = "8.8.8.8:80";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        http_port = config.http_port,
        channel_buffer_size = config.channel_buffer_size(),
        poll_interval_seconds = config.artnet_poll_interval_seconds,
        "starting dmx-artnet-bridge",
    );

    let artnet_addr = std::net::SocketAddr::from(([0, 0, 0, 0], ARTNET_PORT));
    let endpoint = Arc::new(
        UdpEndpoint::bind(artnet_addr)
            .await
            .context("failed to bind Art-Net UDP endpoint")?,
    );

    let metrics = Arc::new(Metrics::new(config.channel_buffer_size()));
    let nodes = Arc::new(NodeRegistry::new());
    let hub_handle = hub::spawn();

    let (receive_tx, receive_rx) = mpsc::channel::<ReceivedFrame>(config.channel_buffer_size());
    let (send_tx, send_rx) = mpsc::channel::<SendFrame>(config.channel_buffer_size());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(MAX_IN_FLIGHT);
    let dispatch_ctx = DispatchContext {
        hub: hub_handle.clone(),
        send_tx: send_tx.clone(),
        nodes: nodes.clone(),
        metrics: metrics.clone(),
        short_name: Arc::from(config.artnet_short_name.as_str()),
        long_name: Arc::from(config.artnet_long_name.as_str()),
        probe_target: DEFAULT_PROBE_TARGET
            .parse()
            .expect("DEFAULT_PROBE_TARGET is a valid socket address literal"),
    };

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(workers::receive_worker(
        endpoint.clone(),
        receive_tx.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(workers::send_worker(
        endpoint.clone(),
        send_rx,
        metrics.clone(),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(workers::poll_scheduler(
        config.poll_interval(),
        send_tx.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    )));
    {
        let receive_tx_for_stats = receive_tx.clone();
        let send_tx_for_stats = send_tx.clone();
        tasks.push(tokio::spawn(workers::stat_monitor(
            move || receive_tx_for_stats.max_capacity() - receive_tx_for_stats.capacity(),
            move || send_tx_for_stats.max_capacity() - send_tx_for_stats.capacity(),
            metrics.clone(),
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(bridge::run(
        receive_rx,
        dispatcher,
        dispatch_ctx,
        shutdown_rx.clone(),
    )));

    let app_state = AppState::new(
        endpoint.clone(),
        metrics.clone(),
        nodes.clone(),
        hub_handle.clone(),
        Arc::new(SystemTimeSource),
        receive_tx.clone(),
        send_tx.clone(),
    );
    let app = http::router(app_state, config.http_timeout());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .context("failed to bind HTTP listener")?;
    tracing::info!(port = config.http_port, "HTTP surface listening");

    let server_shutdown_rx = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let mut shutdown_rx = server_shutdown_rx;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, stopping");
    endpoint.close();
    let _ = shutdown_tx.send(true);

    if let Err(error) = server.await {
        tracing::error!(%error, "HTTP server task panicked");
    }
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
