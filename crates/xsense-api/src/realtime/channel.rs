// Per-house MQTT connection
//
// One background task owns the connection lifecycle: presign, connect,
// subscribe, pump messages, and re-presign on a fixed interval or after
// a drop. Every attempt builds a fresh rumqttc client because the
// signed URL is baked into the connect options. Messages and health
// changes are delivered to the owner over an mpsc channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::{ReconnectConfig, ReconnectStrategy};
use crate::error::Error;
use crate::rest::{LegacyMqttConfig, XSenseClient};
use crate::signer::Signer;

/// Username the vendor broker expects on WebSocket connections.
pub const AWS_MQTT_USERNAME: &str = "?SDK=iOS&Version=2.26.5";

const EVENT_CHANNEL_SIZE: usize = 256;
const REQUEST_CHANNEL_SIZE: usize = 256;
const MAX_PACKET_SIZE: usize = 512 * 1024;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ── Configuration ────────────────────────────────────────────────────

/// Where a house's connection goes.
#[derive(Debug, Clone)]
pub enum BrokerTarget {
    /// Vendor AWS IoT broker over a presigned WebSocket.
    Aws { server: String, region: String },
    /// Username/password broker from the legacy station settings.
    Legacy {
        station_id: String,
        config: LegacyMqttConfig,
    },
}

/// Settings for one realtime channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub house_id: String,
    pub target: BrokerTarget,
    /// Client ids are `{prefix}_{house}_{unix_ms}`.
    pub client_id_prefix: String,
    /// Re-presign and reconnect this often while connected.
    pub signature_refresh: Duration,
    pub keep_alive: Duration,
    pub reconnect: ReconnectConfig,
}

impl ChannelConfig {
    pub fn new(house_id: impl Into<String>, target: BrokerTarget) -> Self {
        Self {
            house_id: house_id.into(),
            target,
            client_id_prefix: "homey".into(),
            signature_refresh: Duration::from_secs(600),
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// What the channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection came up (`true`) or dropped (`false`).
    Health { house_id: String, healthy: bool },
    /// An inbound publish.
    Message {
        house_id: String,
        topic: String,
        payload: Vec<u8>,
    },
}

// ── Shared state ─────────────────────────────────────────────────────

struct Shared {
    house_id: String,
    /// Every topic requested so far, in request order.
    wanted: Mutex<Vec<String>>,
    /// Topics subscribed on the current connection.
    active: Mutex<HashSet<String>>,
    /// Client of the live connection, if any.
    client: ArcSwapOption<AsyncClient>,
    connected: watch::Sender<bool>,
}

impl Shared {
    fn wanted(&self) -> MutexGuard<'_, Vec<String>> {
        self.wanted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe every wanted topic not yet active on `client`.
    fn subscribe_pending(&self, client: &AsyncClient) {
        let pending: Vec<String> = {
            let wanted = self.wanted();
            let mut active = self.active();
            wanted
                .iter()
                .filter(|t| active.insert((*t).clone()))
                .cloned()
                .collect()
        };
        for topic in pending {
            match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => debug!(house_id = %self.house_id, topic = %topic, "subscribed"),
                Err(e) => {
                    warn!(house_id = %self.house_id, topic = %topic, error = %e, "subscribe failed");
                    self.active().remove(&topic);
                }
            }
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Handle to a running per-house channel.
///
/// Subscriptions are idempotent: a topic requested twice is subscribed
/// once per connection, and all requested topics are restored after a
/// reconnect.
pub struct RealtimeChannel {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("house_id", &self.shared.house_id)
            .field("connected", &*self.shared.connected.borrow())
            .finish_non_exhaustive()
    }
}

impl RealtimeChannel {
    /// Start the connection task. Events arrive on the returned receiver.
    pub fn spawn(
        client: Arc<XSenseClient>,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (connected, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            house_id: config.house_id.clone(),
            wanted: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            client: ArcSwapOption::empty(),
            connected,
        });
        let cancel = CancellationToken::new();

        let task = tokio::spawn(connection_task(
            client,
            config,
            Arc::clone(&shared),
            events_tx,
            cancel.clone(),
        ));

        let channel = Self {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (channel, events_rx)
    }

    pub fn house_id(&self) -> &str {
        &self.shared.house_id
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Watch the connection state.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    /// Topics requested so far.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.wanted().clone()
    }

    /// Request topics; new ones are subscribed now if connected, or on connect.
    ///
    /// Returns how many topics were new.
    pub fn subscribe<I>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let added = {
            let mut wanted = self.shared.wanted();
            let before = wanted.len();
            for topic in topics {
                if !topic.is_empty() && !wanted.contains(&topic) {
                    wanted.push(topic);
                }
            }
            wanted.len() - before
        };
        if added > 0 {
            if let Some(client) = self.shared.client.load_full() {
                self.shared.subscribe_pending(&client);
            }
        }
        added
    }

    /// Publish a JSON payload at QoS 1.
    pub async fn publish(&self, topic: &str, payload: &Value) -> Result<(), Error> {
        let client = self.shared.client.load_full().ok_or(Error::NotConnected)?;
        let body = serde_json::to_vec(payload).map_err(|e| Error::Mqtt(e.to_string()))?;
        client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| Error::Mqtt(e.to_string()))?;
        debug!(house_id = %self.shared.house_id, topic, "published");
        Ok(())
    }

    /// Stop the task and close the connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Connection task ──────────────────────────────────────────────────

enum SessionEnd {
    Shutdown,
    /// Planned re-presign; reconnect immediately.
    Refresh,
    Lost(String),
}

async fn connection_task(
    client: Arc<XSenseClient>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut strategy = ReconnectStrategy::new(config.reconnect.clone());
    let house_id = config.house_id.clone();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let end = match connect_options(&client, &config).await {
            Ok(options) => run_session(options, &config, &shared, &events, &cancel, &mut strategy).await,
            Err(e) => SessionEnd::Lost(e.to_string()),
        };

        let was_connected = shared.connected.send_replace(false);
        shared.client.store(None);

        let delay = match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Refresh => {
                info!(house_id = %house_id, "reconnecting with fresh signature");
                continue;
            }
            SessionEnd::Lost(reason) => {
                let _ = events
                    .send(ChannelEvent::Health {
                        house_id: house_id.clone(),
                        healthy: false,
                    })
                    .await;
                let delay = strategy.next_delay();
                if was_connected {
                    warn!(house_id = %house_id, reason = %reason, "MQTT connection lost");
                } else {
                    debug!(house_id = %house_id, reason = %reason, "MQTT connect attempt failed");
                }
                delay
            }
        };

        info!(
            house_id = %house_id,
            attempt = strategy.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "MQTT reconnecting"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    shared.connected.send_replace(false);
    shared.client.store(None);
    debug!(house_id = %house_id, "MQTT task exiting");
}

async fn run_session(
    options: MqttOptions,
    config: &ChannelConfig,
    shared: &Shared,
    events: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
    strategy: &mut ReconnectStrategy,
) -> SessionEnd {
    let (mqtt, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_SIZE);
    let mqtt = Arc::new(mqtt);
    shared.active().clear();

    let refresh_enabled = matches!(config.target, BrokerTarget::Aws { .. });
    let refresh = tokio::time::sleep(config.signature_refresh);
    tokio::pin!(refresh);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                close_gracefully(&mqtt, &mut eventloop).await;
                return SessionEnd::Shutdown;
            }

            () = &mut refresh, if refresh_enabled && *shared.connected.borrow() => {
                info!(house_id = %config.house_id, "MQTT signature refresh");
                close_gracefully(&mqtt, &mut eventloop).await;
                return SessionEnd::Refresh;
            }

            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(house_id = %config.house_id, "MQTT connected");
                    strategy.reset();
                    shared.client.store(Some(Arc::clone(&mqtt)));
                    shared.connected.send_replace(true);
                    shared.subscribe_pending(&mqtt);
                    let _ = events
                        .send(ChannelEvent::Health {
                            house_id: config.house_id.clone(),
                            healthy: true,
                        })
                        .await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let event = ChannelEvent::Message {
                        house_id: config.house_id.clone(),
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if events.send(event).await.is_err() {
                        debug!(house_id = %config.house_id, "event receiver dropped");
                        close_gracefully(&mqtt, &mut eventloop).await;
                        return SessionEnd::Shutdown;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return SessionEnd::Lost("broker sent DISCONNECT".into());
                }
                Ok(_) => {}
                Err(e) => return SessionEnd::Lost(e.to_string()),
            }
        }
    }
}

/// Send DISCONNECT and give the event loop a moment to flush it.
async fn close_gracefully(mqtt: &AsyncClient, eventloop: &mut EventLoop) {
    if mqtt.try_disconnect().is_err() {
        return;
    }
    let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

// ── Connect options ──────────────────────────────────────────────────

fn client_id(prefix: &str, scope: &str) -> String {
    format!("{prefix}_{scope}_{}", Utc::now().timestamp_millis())
}

/// Build options for one attempt, presigning a fresh URL for AWS targets.
async fn connect_options(client: &XSenseClient, config: &ChannelConfig) -> Result<MqttOptions, Error> {
    let mut options = match &config.target {
        BrokerTarget::Aws { server, region } => {
            let iot = client.ensure_iot_credentials().await?;
            let base = Url::parse(&format!("wss://{server}/mqtt"))?;
            let presigned = Signer::new(iot.credentials.clone()).presign_websocket_url(&base, region)?;
            debug!(house_id = %config.house_id, host = %server, "MQTT URL presigned");

            let mut options = MqttOptions::new(
                client_id(&config.client_id_prefix, &config.house_id),
                presigned.url,
                443,
            );
            options.set_transport(Transport::wss_with_default_config());
            options.set_credentials(AWS_MQTT_USERNAME, "");
            options
        }
        BrokerTarget::Legacy {
            station_id,
            config: legacy,
        } => legacy_options(legacy, &config.client_id_prefix, station_id)?,
    };
    options.set_clean_session(true);
    options.set_keep_alive(config.keep_alive);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    Ok(options)
}

fn legacy_options(
    legacy: &LegacyMqttConfig,
    prefix: &str,
    station_id: &str,
) -> Result<MqttOptions, Error> {
    let url = Url::parse(&legacy.broker)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Mqtt(format!("broker URL has no host: {}", legacy.broker)))?
        .to_owned();
    let id = legacy
        .client_id
        .clone()
        .unwrap_or_else(|| client_id(prefix, station_id));

    let (mut options, transport) = match url.scheme() {
        "mqtt" | "tcp" => (
            MqttOptions::new(id, host, url.port().unwrap_or(1883)),
            Transport::Tcp,
        ),
        "mqtts" | "ssl" | "tls" => (
            MqttOptions::new(id, host, url.port().unwrap_or(8883)),
            Transport::tls_with_default_config(),
        ),
        "ws" => (
            MqttOptions::new(id, legacy.broker.clone(), url.port().unwrap_or(80)),
            Transport::Ws,
        ),
        "wss" => (
            MqttOptions::new(id, legacy.broker.clone(), url.port().unwrap_or(443)),
            Transport::wss_with_default_config(),
        ),
        other => return Err(Error::Mqtt(format!("unsupported broker scheme: {other}"))),
    };
    options.set_transport(transport);
    if let (Some(user), Some(pass)) = (&legacy.username, &legacy.password) {
        options.set_credentials(user.as_str(), pass.expose_secret());
    }
    Ok(options)
}
