//! Dispatcher (`spec.md` §2 component I / §4.G).
//!
//! One `tokio::spawn`'d task per received frame, capped by an atomic
//! in-flight counter rather than a semaphore so admission is a single CAS
//! rather than an async wait — a full dispatcher drops the frame and logs,
//! it never blocks the Bridge Loop (`spec.md` §9). The goroutine-count cap
//! and drop-when-full admission check are ported from
//! `original_source/.../usecase/artnet_packet_handler.go`'s
//! `HandlePacketAsync`/`GetActiveGoroutines`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::artnet::codec::{self, ArtPollReply, DecodedPacket, PollReplyParams};
use crate::artnet::dmx::DMXData;
use crate::artnet::node::NodeRegistry;
use crate::error::DecodeError;
use crate::hub::HubHandle;
use crate::message::{OutboundMessage, ARTNET_DMX_TOPIC};
use crate::metrics::Metrics;
use crate::udp;
use crate::workers::{self, SendFrame};

pub const MAX_IN_FLIGHT: usize = 100;
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a dispatched handler needs, cheaply cloned into each spawned
/// task.
#[derive(Clone)]
pub struct DispatchContext {
    pub hub: HubHandle,
    pub send_tx: mpsc::Sender<SendFrame>,
    pub nodes: Arc<NodeRegistry>,
    pub metrics: Arc<Metrics>,
    pub short_name: Arc<str>,
    pub long_name: Arc<str>,
    /// Target used to resolve this node's outbound IPv4 address for
    /// ArtPollReply (`spec.md` §4.G, §9). Never actually contacted — see
    /// `udp::local_ipv4`.
    pub probe_target: SocketAddr,
}

/// Admission-controlled fan-out for decoded frames.
#[derive(Clone)]
pub struct Dispatcher {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl Dispatcher {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn try_admit(&self) -> Option<InFlightGuard> {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            if current >= self.max_in_flight {
                return None;
            }
            if self
                .in_flight
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(InFlightGuard {
                    counter: self.in_flight.clone(),
                });
            }
        }
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Release);
    }
}

/// Submit one received frame for decoding and handling. Non-blocking: if the
/// dispatcher is already at `max_in_flight`, the frame is dropped and logged
/// rather than queued.
pub fn dispatch(dispatcher: &Dispatcher, ctx: &DispatchContext, bytes: Vec<u8>, source: SocketAddr) {
    let Some(guard) = dispatcher.try_admit() else {
        tracing::warn!(
            %source,
            in_flight = dispatcher.in_flight(),
            "dispatcher at capacity, dropping frame",
        );
        return;
    };

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let _guard = guard;
        match tokio::time::timeout(DISPATCH_TIMEOUT, process(&ctx, &bytes, source)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::info!(%source, %error, "failed to decode Art-Net frame"),
            Err(_elapsed) => {
                tracing::warn!(%source, "dispatch handler exceeded timeout, abandoning frame")
            }
        }
    });
}

async fn process(ctx: &DispatchContext, bytes: &[u8], source: SocketAddr) -> Result<(), DecodeError> {
    match codec::decode(bytes, source)? {
        DecodedPacket::Dmx(dmx) => handle_dmx(ctx, dmx).await,
        DecodedPacket::Poll => handle_poll(ctx, source).await,
        DecodedPacket::PollReply(reply) => handle_poll_reply(ctx, source, &reply),
        DecodedPacket::Other(opcode) => {
            tracing::debug!(%source, opcode, "ignoring unhandled Art-Net opcode");
        }
    }
    Ok(())
}

/// DMX handler (`spec.md` §4.G item J): wrap the decoded packet and publish
/// it to every client subscribed to the broadcast topic.
async fn handle_dmx(ctx: &DispatchContext, dmx: DMXData) {
    let data = match serde_json::to_value(&dmx) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%error, "failed to serialize DMX packet, dropping");
            return;
        }
    };
    let envelope = OutboundMessage::new("artnet_dmx_packet", data, unix_millis());
    match serde_json::to_string(&envelope) {
        Ok(json) => ctx.hub.broadcast(ARTNET_DMX_TOPIC, json).await,
        Err(error) => tracing::warn!(%error, "failed to serialize outbound envelope, dropping"),
    }
}

/// Poll handler (`spec.md` §4.G item K): answer an ArtPoll with our own
/// ArtPollReply, broadcast back onto the Art-Net segment.
async fn handle_poll(ctx: &DispatchContext, source: SocketAddr) {
    let local_ip = udp::local_ipv4(ctx.probe_target).await;
    let params = PollReplyParams {
        local_ip,
        short_name: &ctx.short_name,
        long_name: &ctx.long_name,
    };
    let destination: SocketAddr = workers::ARTNET_BROADCAST
        .parse()
        .expect("ARTNET_BROADCAST is a valid socket address literal");
    let frame = SendFrame {
        bytes: codec::encode_poll_reply(&params),
        destination,
    };

    if let Err(mpsc::error::TrySendError::Full(_)) = ctx.send_tx.try_send(frame) {
        let dropped = ctx.metrics.record_dropped_send();
        tracing::warn!(%source, dropped, "send queue full, dropped poll reply");
    }
}

/// PollReply handling (`spec.md` §3 `ArtNetNode`, §4.G): refresh the Node
/// Registry entry for the responding node.
fn handle_poll_reply(ctx: &DispatchContext, source: SocketAddr, reply: &ArtPollReply) {
    ctx.nodes.upsert(source.ip(), reply);
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration as StdDuration;

    fn source() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 6454)
    }

    fn test_ctx() -> (DispatchContext, mpsc::Receiver<SendFrame>, HubHandle) {
        let hub = hub::spawn();
        let (send_tx, send_rx) = mpsc::channel(8);
        let ctx = DispatchContext {
            hub: hub.clone(),
            send_tx,
            nodes: Arc::new(NodeRegistry::new()),
            metrics: Arc::new(Metrics::new(1000)),
            short_name: Arc::from("DMX Viewer"),
            long_name: Arc::from("DMX Viewer Application"),
            probe_target: "127.0.0.1:9".parse().unwrap(),
        };
        (ctx, send_rx, hub)
    }

    #[test]
    fn admission_rejects_once_at_capacity() {
        let dispatcher = Dispatcher::new(2);
        let a = dispatcher.try_admit().unwrap();
        let b = dispatcher.try_admit().unwrap();
        assert!(dispatcher.try_admit().is_none());
        drop(a);
        assert!(dispatcher.try_admit().is_some());
        drop(b);
    }

    #[tokio::test]
    async fn dmx_frame_is_broadcast_to_subscribers() {
        let (ctx, _send_rx, hub) = test_ctx();
        let mut rx = hub.join(1, vec![ARTNET_DMX_TOPIC.to_string()]).await;

        let dmx = DMXData::new(1, 0, 5, 2, 2, vec![10, 20], source().ip(), source().port()).unwrap();
        handle_dmx(&ctx, dmx).await;

        let received = tokio::time::timeout(StdDuration::from_millis(200), rx.recv())
            .await
            .expect("message should arrive")
            .expect("channel open");
        assert!(received.contains("artnet_dmx_packet"));
        assert!(received.contains("\"Length\":2"));
    }

    #[tokio::test]
    async fn poll_reply_updates_node_registry() {
        let (ctx, _send_rx, _hub) = test_ctx();
        let reply = ArtPollReply {
            ip_address: Ipv4Addr::new(10, 0, 0, 9),
            port: 6454,
            short_name: "Fixture".into(),
            long_name: "Fixture Node".into(),
            node_report: "OK".into(),
            mac_address: [1, 2, 3, 4, 5, 6],
        };
        handle_poll_reply(&ctx, source(), &reply);
        assert_eq!(ctx.nodes.len(), 1);
        assert_eq!(ctx.nodes.get(&source().ip()).unwrap().short_name, "Fixture");
    }

    #[tokio::test]
    async fn poll_enqueues_a_broadcast_reply() {
        let (ctx, mut send_rx, _hub) = test_ctx();
        handle_poll(&ctx, source()).await;
        let frame = send_rx.try_recv().expect("poll reply should be queued");
        assert_eq!(frame.destination, workers::ARTNET_BROADCAST.parse().unwrap());
    }

    #[tokio::test]
    async fn dispatch_drops_frame_at_capacity_instead_of_blocking() {
        let (ctx, _send_rx, _hub) = test_ctx();
        let dispatcher = Dispatcher::new(0);
        // Capacity zero: every call must drop immediately, never spawn.
        dispatch(&dispatcher, &ctx, codec::encode_poll(), source());
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
