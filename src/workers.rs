//! Receive/Send Workers, Poll Scheduler, Stat Monitor
//! (`spec.md` §2 components D, E, F, G).
//!
//! One `tokio::spawn`'d loop per worker, communicating over bounded
//! `tokio::sync::mpsc` channels with `try_send` on every data-plane path,
//! per `spec.md` §9. Loop shapes are ported from
//! `original_source/.../infrastructure/artnet/server_workers.go` and
//! `server_stats.go`, translated from Go's `select { case <-done: ...
//! case x := <-ch: ... }` to `tokio::select!`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::artnet::codec;
use crate::metrics::{health_status, utilization_percent, HealthStatus, Metrics};
use crate::udp::UdpEndpoint;

/// Raw bytes plus the address they arrived from. Consumed exactly once by
/// the Bridge Loop (`spec.md` §3).
#[derive(Debug)]
pub struct ReceivedFrame {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
}

/// Raw bytes plus a destination. Consumed exactly once by the Send Worker.
#[derive(Debug)]
pub struct SendFrame {
    pub bytes: Vec<u8>,
    pub destination: SocketAddr,
}

pub const ARTNET_BROADCAST: &str = "255.255.255.255:6454";

fn broadcast_addr() -> SocketAddr {
    ARTNET_BROADCAST.parse().expect("valid broadcast literal")
}

/// Single worker: read from the UDP endpoint, non-blocking enqueue onto the
/// receive queue. Never blocks the reader on a full queue (`spec.md` §4.B).
pub async fn receive_worker(
    endpoint: Arc<UdpEndpoint>,
    tx: mpsc::Sender<ReceivedFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("receive worker stopped");
                    return;
                }
            }
            read = endpoint.read(&mut buf) => {
                match read {
                    Ok(Some((n, source))) => {
                        metrics.record_received();
                        let frame = ReceivedFrame {
                            bytes: buf[..n].to_vec(),
                            source,
                        };
                        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                            let dropped = metrics.record_dropped_receive();
                            tracing::warn!(
                                %source,
                                queue_len = tx.max_capacity() - tx.capacity(),
                                buffer_size = metrics.buffer_size(),
                                utilization = utilization_percent(
                                    tx.max_capacity() - tx.capacity(),
                                    metrics.buffer_size(),
                                ),
                                dropped,
                                "receive queue full, dropping frame",
                            );
                        }
                    }
                    Ok(None) => {} // read deadline elapsed: a liveness tick, not an error
                    Err(e) => tracing::warn!(error = %e, "UDP read error, continuing"),
                }
            }
        }
    }
}

/// Single worker: dequeue a `SendFrame`, write it to the UDP endpoint.
pub async fn send_worker(
    endpoint: Arc<UdpEndpoint>,
    mut rx: mpsc::Receiver<SendFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("send worker stopped");
                    return;
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!("send queue closed, stopping send worker");
                    return;
                };
                match endpoint.write(&frame.bytes, frame.destination).await {
                    Ok(n) => tracing::debug!(to = %frame.destination, bytes = n, "sent packet"),
                    Err(e) => tracing::error!(error = %e, to = %frame.destination, "UDP write error"),
                }

                let queue_len = rx.len();
                let utilization = utilization_percent(queue_len, metrics.buffer_size());
                if utilization >= 75.0 {
                    tracing::warn!(queue_len, utilization, "send queue utilization high");
                }
            }
        }
    }
}

/// Periodic ArtPoll broadcast (`spec.md` §4.D).
pub async fn poll_scheduler(
    interval: Duration,
    tx: mpsc::Sender<SendFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("poll scheduler stopped");
                    return;
                }
            }
            _ = ticker.tick() => {
                let frame = SendFrame {
                    bytes: codec::encode_poll(),
                    destination: broadcast_addr(),
                };
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                    let dropped = metrics.record_dropped_send();
                    tracing::warn!(dropped, "send queue full, dropped scheduled ArtPoll");
                }
            }
        }
    }
}

/// Periodic channel-utilization log (`spec.md` §4.E).
pub async fn stat_monitor(
    receive_len: impl Fn() -> usize + Send + 'static,
    send_len: impl Fn() -> usize + Send + 'static,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("stat monitor stopped");
                    return;
                }
            }
            _ = ticker.tick() => {
                log_channel_stats("receive", receive_len(), metrics.dropped_receive(), &metrics);
                log_channel_stats("send", send_len(), metrics.dropped_send(), &metrics);
            }
        }
    }
}

fn log_channel_stats(kind: &str, queue_len: usize, dropped: u64, metrics: &Metrics) {
    let capacity = metrics.buffer_size();
    let utilization = utilization_percent(queue_len, capacity);
    let status = health_status(utilization, dropped);

    match status {
        HealthStatus::Critical => tracing::error!(
            kind, queue_len, capacity, utilization, dropped, "channel critical"
        ),
        HealthStatus::Warning => tracing::warn!(
            kind, queue_len, capacity, utilization, dropped, "channel under pressure"
        ),
        HealthStatus::Healthy => tracing::debug!(
            kind, queue_len, capacity, utilization, dropped, "channel healthy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_exactly_the_excess_frames() {
        let (tx, mut rx) = mpsc::channel::<SendFrame>(2);

        for i in 0..4u8 {
            let frame = SendFrame {
                bytes: vec![i],
                destination: broadcast_addr(),
            };
            let _ = tx.try_send(frame);
        }

        let mut received = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            received.push(frame.bytes[0]);
        }
        assert_eq!(received, vec![0, 1]);
    }
}
