//! Bridge Loop (`spec.md` §2 component N / §3): the single consumer of the
//! receive queue, handing every frame to the [`crate::dispatch`] dispatcher.

use tokio::sync::{mpsc, watch};

use crate::dispatch::{self, DispatchContext, Dispatcher};
use crate::workers::ReceivedFrame;

pub async fn run(
    mut rx: mpsc::Receiver<ReceivedFrame>,
    dispatcher: Dispatcher,
    ctx: DispatchContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::debug!("bridge loop stopped");
                    return;
                }
            }
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!("receive queue closed, stopping bridge loop");
                    return;
                };
                dispatch::dispatch(&dispatcher, &ctx, frame.bytes, frame.source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artnet::node::NodeRegistry;
    use crate::hub;
    use crate::message::ARTNET_DMX_TOPIC;
    use crate::metrics::Metrics;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn frames_flow_from_receive_queue_to_hub_subscribers() {
        let hub = hub::spawn();
        let mut client_rx = hub.join(1, vec![ARTNET_DMX_TOPIC.to_string()]).await;

        let (send_tx, _send_rx) = mpsc::channel(8);
        let ctx = DispatchContext {
            hub,
            send_tx,
            nodes: Arc::new(NodeRegistry::new()),
            metrics: Arc::new(Metrics::new(1000)),
            short_name: Arc::from("DMX Viewer"),
            long_name: Arc::from("DMX Viewer Application"),
            probe_target: "127.0.0.1:9".parse().unwrap(),
        };
        let dispatcher = Dispatcher::new(crate::dispatch::MAX_IN_FLIGHT);

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run(rx, dispatcher, ctx, shutdown_rx));

        let mut frame = Vec::new();
        frame.extend_from_slice(crate::artnet::codec::ARTNET_HEADER);
        frame.extend_from_slice(&0x5000u16.to_le_bytes());
        frame.extend_from_slice(&14u16.to_be_bytes());
        frame.extend_from_slice(&[1, 0, 0, 0]);
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(&[9, 9]);

        let source: SocketAddr = "10.0.0.1:6454".parse().unwrap();
        tx.send(ReceivedFrame { bytes: frame, source }).await.unwrap();

        let message = tokio::time::timeout(Duration::from_millis(500), client_rx.recv())
            .await
            .expect("a message should arrive")
            .expect("hub channel open");
        assert!(message.contains("artnet_dmx_packet"));
    }
}
