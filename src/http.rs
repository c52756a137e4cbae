//! External HTTP surface (`spec.md` §2 component O / §6): `/healthz`,
//! `/readyz`, `/metrics`, `/api/time`, and the websocket upgrade route.
//! Router shape follows `bin-shared`'s health-check service — a small
//! `axum::Router` wrapped in `tower_http`'s trace and timeout layers.

use std::sync::atomic::{AtomicI64, AtomicU64};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::mpsc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::artnet::node::NodeRegistry;
use crate::hub::client::{handle_socket, MAX_FRAME_BYTES};
use crate::hub::HubHandle;
use crate::metrics::{health_status, utilization_percent, HealthStatus, Metrics};
use crate::udp::UdpEndpoint;
use crate::workers::{ReceivedFrame, SendFrame};

/// Clock source for `/api/time`. NTP synchronization itself is external to
/// this process (`spec.md` Non-goals) — this trait only names the seam so a
/// future implementation can be swapped in without touching the router.
pub trait TimeSource: Send + Sync {
    fn now_unix_millis(&self) -> i64;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Gauge set matching the Prometheus collector contract (`spec.md` §6,
/// `original_source/.../infrastructure/metrics/collector.go`) name for name.
struct PrometheusGauges {
    channel_buffer_size: Gauge<i64, AtomicI64>,
    receive_queue_length: Gauge<i64, AtomicI64>,
    send_queue_length: Gauge<i64, AtomicI64>,
    dropped_receive_packets: Gauge<i64, AtomicI64>,
    dropped_send_packets: Gauge<i64, AtomicI64>,
    receive_utilization_percent: Gauge<f64, AtomicU64>,
    send_utilization_percent: Gauge<f64, AtomicU64>,
    health_status: Gauge<i64, AtomicI64>,
    overall_healthy: Gauge<i64, AtomicI64>,
    received_packets_total: Gauge<i64, AtomicI64>,
    received_packets_last_minute: Gauge<i64, AtomicI64>,
}

fn build_registry() -> (Registry, PrometheusGauges) {
    let mut registry = Registry::default();
    let gauges = PrometheusGauges {
        channel_buffer_size: Gauge::default(),
        receive_queue_length: Gauge::default(),
        send_queue_length: Gauge::default(),
        dropped_receive_packets: Gauge::default(),
        dropped_send_packets: Gauge::default(),
        receive_utilization_percent: Gauge::default(),
        send_utilization_percent: Gauge::default(),
        health_status: Gauge::default(),
        overall_healthy: Gauge::default(),
        received_packets_total: Gauge::default(),
        received_packets_last_minute: Gauge::default(),
    };

    registry.register(
        "dmx_artnet_channel_buffer_size",
        "ArtNet channel buffer capacity",
        gauges.channel_buffer_size.clone(),
    );
    registry.register(
        "dmx_artnet_receive_queue_length",
        "Number of items currently queued in the receive channel",
        gauges.receive_queue_length.clone(),
    );
    registry.register(
        "dmx_artnet_send_queue_length",
        "Number of items currently queued in the send channel",
        gauges.send_queue_length.clone(),
    );
    registry.register(
        "dmx_artnet_dropped_receive_packets",
        "Dropped receive packets (current counter value)",
        gauges.dropped_receive_packets.clone(),
    );
    registry.register(
        "dmx_artnet_dropped_send_packets",
        "Dropped send packets (current counter value)",
        gauges.dropped_send_packets.clone(),
    );
    registry.register(
        "dmx_artnet_receive_utilization_percent",
        "Receive channel utilization percent",
        gauges.receive_utilization_percent.clone(),
    );
    registry.register(
        "dmx_artnet_send_utilization_percent",
        "Send channel utilization percent",
        gauges.send_utilization_percent.clone(),
    );
    registry.register(
        "dmx_artnet_health_status",
        "0=healthy,1=warning,2=critical (derived)",
        gauges.health_status.clone(),
    );
    registry.register(
        "dmx_artnet_overall_healthy",
        "1 if healthy, else 0",
        gauges.overall_healthy.clone(),
    );
    registry.register(
        "dmx_artnet_received_packets_total",
        "Total Art-Net packets received since startup",
        gauges.received_packets_total.clone(),
    );
    registry.register(
        "dmx_artnet_received_packets_last_minute",
        "Art-Net packets received in the trailing 60 seconds",
        gauges.received_packets_last_minute.clone(),
    );

    (registry, gauges)
}

#[derive(Clone)]
pub struct AppState {
    pub udp: Arc<UdpEndpoint>,
    pub metrics: Arc<Metrics>,
    pub nodes: Arc<NodeRegistry>,
    pub hub: HubHandle,
    pub time_source: Arc<dyn TimeSource>,
    /// Held only to read the live receive-queue depth (`max_capacity() -
    /// capacity()`) for health derivation and `/metrics`; never sent on.
    receive_tx: mpsc::Sender<ReceivedFrame>,
    send_tx: mpsc::Sender<SendFrame>,
    prometheus: Arc<Mutex<(Registry, PrometheusGauges)>>,
}

impl AppState {
    pub fn new(
        udp: Arc<UdpEndpoint>,
        metrics: Arc<Metrics>,
        nodes: Arc<NodeRegistry>,
        hub: HubHandle,
        time_source: Arc<dyn TimeSource>,
        receive_tx: mpsc::Sender<ReceivedFrame>,
        send_tx: mpsc::Sender<SendFrame>,
    ) -> Self {
        Self {
            udp,
            metrics,
            nodes,
            hub,
            time_source,
            receive_tx,
            send_tx,
            prometheus: Arc::new(Mutex::new(build_registry())),
        }
    }

    fn receive_queue_len(&self) -> usize {
        self.receive_tx.max_capacity() - self.receive_tx.capacity()
    }

    fn send_queue_len(&self) -> usize {
        self.send_tx.max_capacity() - self.send_tx.capacity()
    }

    /// Derived health of the receive and send channels, per `spec.md` §4.E's
    /// utilization/drop thresholds (`crate::metrics::health_status`).
    fn channel_health(&self) -> (HealthStatus, HealthStatus) {
        let capacity = self.metrics.buffer_size();
        let receive_util = utilization_percent(self.receive_queue_len(), capacity);
        let send_util = utilization_percent(self.send_queue_len(), capacity);
        (
            health_status(receive_util, self.metrics.dropped_receive()),
            health_status(send_util, self.metrics.dropped_send()),
        )
    }
}

pub fn router(state: AppState, http_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .route("/api/time", get(api_time))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(http_timeout))
        .with_state(state)
}

/// Liveness: 200 while the derived health of both channels is `Healthy`,
/// 503 with a plaintext reason otherwise (`spec.md` §6).
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let (receive_status, send_status) = state.channel_health();
    let overall = receive_status.max(send_status);

    if overall == HealthStatus::Healthy {
        (StatusCode::OK, "ok".to_string())
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "channels unhealthy: receive={receive_status:?}, send={send_status:?}"
            ),
        )
    }
}

/// Readiness: the UDP endpoint must be accepting traffic (`spec.md` §6).
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.udp.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "udp endpoint stopped")
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let capacity = state.metrics.buffer_size();
    let receive_queue_length = state.receive_queue_len();
    let send_queue_length = state.send_queue_len();
    let receive_util = utilization_percent(receive_queue_length, capacity);
    let send_util = utilization_percent(send_queue_length, capacity);
    let dropped_receive = state.metrics.dropped_receive();
    let dropped_send = state.metrics.dropped_send();
    let overall =
        health_status(receive_util, dropped_receive).max(health_status(send_util, dropped_send));

    let mut guard = state.prometheus.lock();
    let (ref registry, ref mut gauges) = *guard;

    gauges.channel_buffer_size.set(capacity as i64);
    gauges.receive_queue_length.set(receive_queue_length as i64);
    gauges.send_queue_length.set(send_queue_length as i64);
    gauges.dropped_receive_packets.set(dropped_receive as i64);
    gauges.dropped_send_packets.set(dropped_send as i64);
    gauges.receive_utilization_percent.set(receive_util);
    gauges.send_utilization_percent.set(send_util);
    gauges.health_status.set(overall as i64);
    gauges
        .overall_healthy
        .set(if overall == HealthStatus::Healthy { 1 } else { 0 });
    gauges
        .received_packets_total
        .set(state.metrics.received_total() as i64);
    gauges
        .received_packets_last_minute
        .set(state.metrics.received_last_minute() as i64);

    let mut buffer = String::new();
    if let Err(error) = encode(&mut buffer, registry) {
        tracing::error!(%error, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, buffer)
}

async fn api_time(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "unix_millis": state.time_source.now_unix_millis() }))
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artnet::node::NodeRegistry;
    use crate::hub;
    use crate::metrics::Metrics;
    use crate::udp::UdpEndpoint;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn system_time_source_reports_a_plausible_timestamp() {
        let ts = SystemTimeSource.now_unix_millis();
        assert!(ts > 1_700_000_000_000, "timestamp should be post-2023");
    }

    async fn test_state_with_buffer(
        buffer_size: usize,
    ) -> (AppState, mpsc::Sender<ReceivedFrame>, mpsc::Sender<SendFrame>) {
        let endpoint = Arc::new(
            UdpEndpoint::bind("127.0.0.1:0".parse().unwrap())
                .await
                .unwrap(),
        );
        let (receive_tx, _receive_rx) = mpsc::channel(buffer_size);
        let (send_tx, _send_rx) = mpsc::channel(buffer_size);
        let state = AppState::new(
            endpoint,
            Arc::new(Metrics::new(buffer_size)),
            Arc::new(NodeRegistry::new()),
            hub::spawn(),
            Arc::new(SystemTimeSource),
            receive_tx.clone(),
            send_tx.clone(),
        );
        (state, receive_tx, send_tx)
    }

    async fn test_state() -> AppState {
        test_state_with_buffer(1000).await.0
    }

    #[tokio::test]
    async fn healthz_is_ok_when_channels_are_healthy() {
        let app = router(test_state().await, Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_is_unavailable_when_a_channel_has_dropped_packets() {
        let (state, _receive_tx, _send_tx) = test_state_with_buffer(1000).await;
        state.metrics.record_dropped_receive();
        let app = router(state, Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn healthz_is_unavailable_when_a_queue_is_over_the_critical_threshold() {
        let (state, receive_tx, _send_tx) = test_state_with_buffer(4).await;
        // Hold all 4 permits so the receive queue reads as 100% utilized
        // without needing to actually build a `ReceivedFrame`.
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(receive_tx.clone().try_reserve_owned().unwrap());
        }
        let app = router(state, Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        drop(held);
    }

    #[tokio::test]
    async fn readyz_reflects_udp_endpoint_state() {
        let state = test_state().await;
        state.udp.close();
        let app = router(state, Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let app = router(test_state().await, Duration::from_secs(5));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
