// ── Controller abstraction ──
//
// Full lifecycle management for one X-Sense account. Handles login,
// directory refresh, per-house realtime channels, command routing and
// update fan-out through the DataStore.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xsense_api::realtime::topics::{
    self, Outbound, config_command, mute_command, self_test_command,
};
use xsense_api::shadow::is_wifi_type;
use xsense_api::{
    ApiNotice, BrokerTarget, ChannelConfig, ChannelEvent, RealtimeChannel, StationRecord,
    XSenseClient,
};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::ClientConfig;
use crate::dispatch::{self, Followup};
use crate::error::CoreError;
use crate::model::{Device, House, Station};
use crate::store::{DataStore, Subscription, UpdateEvent};

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Station category whose shadow also describes the station's own device.
const SELF_DEVICE_STATION: &str = "SC07-WX";

// ── ClientState ──────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ClientState {
    Created,
    Initializing,
    Ready,
    Destroyed,
}

/// Result of a full directory refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectorySnapshot {
    pub houses: Vec<Arc<House>>,
    pub stations: Vec<Arc<Station>>,
    pub devices: Vec<Arc<Device>>,
}

/// A house's realtime connection.
struct HouseLink {
    channel: Arc<RealtimeChannel>,
    /// Set when the channel uses per-station legacy broker settings.
    legacy_station: Option<String>,
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns its own store,
/// REST client and realtime channels; nothing is shared between
/// accounts.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ClientConfig,
    api: Arc<XSenseClient>,
    store: Arc<DataStore>,
    state: watch::Sender<ClientState>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    links: DashMap<String, HouseLink>,
    health: DashMap<String, bool>,
    temp_refreshed: DashMap<String, Instant>,
    init_lock: Mutex<()>,
    refresh_lock: Mutex<()>,
    realtime_lock: Mutex<()>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("email", &self.inner.config.email)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller. Does NOT log in -- call [`init()`](Self::init).
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let api = XSenseClient::new(
            config.client_settings(),
            config.email.clone(),
            config.password.clone(),
        )?;
        Ok(Self::with_client(config, Arc::new(api)))
    }

    /// Create a controller around an existing wire client.
    pub fn with_client(config: ClientConfig, api: Arc<XSenseClient>) -> Self {
        let (state, _) = watch::channel(ClientState::Created);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                api,
                store: Arc::new(DataStore::new()),
                state,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                links: DashMap::new(),
                health: DashMap::new(),
                temp_refreshed: DashMap::new(),
                init_lock: Mutex::new(()),
                refresh_lock: Mutex::new(()),
                realtime_lock: Mutex::new(()),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    /// The wire-layer client.
    pub fn api(&self) -> &Arc<XSenseClient> {
        &self.inner.api
    }

    /// Subscribe to lifecycle changes.
    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    fn current_state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    fn ensure_ready(&self) -> Result<(), CoreError> {
        match self.current_state() {
            ClientState::Ready => Ok(()),
            ClientState::Destroyed => Err(CoreError::Destroyed),
            ClientState::Created | ClientState::Initializing => Err(CoreError::NotInitialized),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Log in, fetch IoT credentials and start background tasks.
    ///
    /// Idempotent once ready.
    pub async fn init(&self) -> Result<(), CoreError> {
        let _guard = self.inner.init_lock.lock().await;
        match self.current_state() {
            ClientState::Ready => return Ok(()),
            ClientState::Destroyed => return Err(CoreError::Destroyed),
            ClientState::Created | ClientState::Initializing => {}
        }
        self.inner.state.send_replace(ClientState::Initializing);

        if let Err(e) = self.inner.api.authenticate().await {
            self.inner.state.send_replace(ClientState::Created);
            warn!(error = %e, "initialization failed");
            return Err(e.into());
        }

        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));
        }

        handles.push(tokio::spawn(notice_task(
            self.clone(),
            self.inner.api.notices(),
            self.inner.cancel.clone(),
        )));

        let interval = self.inner.config.poll_interval;
        if !interval.is_zero() {
            handles.push(tokio::spawn(poll_task(
                self.clone(),
                interval,
                self.inner.cancel.clone(),
            )));
        }
        drop(handles);

        self.inner.state.send_replace(ClientState::Ready);
        info!(email = %self.inner.config.email, "client ready");
        Ok(())
    }

    /// Tear everything down: timers, realtime channels, cache, session.
    ///
    /// Safe to call more than once.
    pub async fn destroy(&self) {
        let previous = self.inner.state.send_replace(ClientState::Destroyed);
        if previous == ClientState::Destroyed {
            return;
        }
        self.inner.cancel.cancel();

        let links: Vec<Arc<RealtimeChannel>> = self
            .inner
            .links
            .iter()
            .map(|entry| Arc::clone(&entry.value().channel))
            .collect();
        self.inner.links.clear();
        for channel in links {
            channel.shutdown().await;
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.inner.health.clear();
        self.inner.temp_refreshed.clear();
        self.inner.store.clear();
        self.inner.store.clear_observers();
        self.inner.api.clear_session();
        debug!("client destroyed");
    }

    /// One-shot: init, run closure, destroy.
    ///
    /// Disables the poll task since only a single request-response cycle
    /// is needed.
    pub async fn oneshot<F, Fut, T>(config: ClientConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.poll_interval = Duration::ZERO;

        let controller = Controller::new(cfg)?;
        if let Err(e) = controller.init().await {
            controller.destroy().await;
            return Err(e);
        }
        let result = f(controller.clone()).await;
        controller.destroy().await;
        result
    }

    // ── Directory ────────────────────────────────────────────────

    /// Rebuild the whole cache: houses, stations, devices and their
    /// shadow state.
    ///
    /// Listing failures leave the previous cache in place. Shadow
    /// failures for one station are logged and skipped.
    pub async fn get_all_devices(&self) -> Result<DirectorySnapshot, CoreError> {
        self.ensure_ready()?;
        let _guard = self.inner.refresh_lock.lock().await;
        let api = &self.inner.api;
        let store = &self.inner.store;

        let houses: Vec<House> = api.list_houses().await?.into_iter().map(House::from).collect();
        let listings = join_all(houses.iter().map(|house| async move {
            (house.id.clone(), api.list_stations(&house.id).await)
        }))
        .await;
        let mut listed: Vec<(String, Vec<StationRecord>)> = Vec::with_capacity(listings.len());
        for (house_id, result) in listings {
            listed.push((house_id, result?));
        }

        // Station owners below take precedence over this fallback.
        let legacy_owner = api.legacy_user_id().await;
        store.clear();
        for mut house in houses {
            if house.user_id.is_none() {
                house.user_id.clone_from(&legacy_owner);
            }
            store.insert_house(house);
        }

        let mut wifi_stations = Vec::new();
        let mut station_ids = Vec::new();
        for (house_id, records) in listed {
            for record in records {
                let station = Station::from_record(&record, &house_id);
                if let Some(owner) = station.user_id.as_deref() {
                    if store.set_house_owner(&house_id, owner) {
                        info!(house_id = %house_id, owner, "house owner taken from station");
                    }
                }
                for raw in &record.devices {
                    if let Some(device) = Device::from_record(raw, &station) {
                        store.insert_device(device);
                    }
                }
                station_ids.push(station.id.clone());
                if station.is_wifi() {
                    wifi_stations.push(station.id.clone());
                }
                store.insert_station(station);
            }
        }

        join_all(wifi_stations.iter().map(|id| self.enrich_wifi_station(id))).await;

        join_all(station_ids.iter().map(|id| async move {
            if let Err(e) = self.sync_station(id, None, false).await {
                warn!(station_id = %id, error = %e, "station shadow fetch failed");
            }
        }))
        .await;

        store.mark_full_refresh();
        info!(
            houses = store.house_count(),
            stations = store.station_count(),
            devices = store.device_count(),
            "directory refresh complete"
        );
        Ok(self.snapshot())
    }

    /// Current cache contents, sorted by name.
    pub fn snapshot(&self) -> DirectorySnapshot {
        let store = &self.inner.store;
        let mut houses: Vec<_> = store.houses_snapshot().iter().cloned().collect();
        houses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let mut stations: Vec<_> = store.stations_snapshot().iter().cloned().collect();
        stations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        let mut devices: Vec<_> = store.devices_snapshot().iter().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        DirectorySnapshot {
            houses,
            stations,
            devices,
        }
    }

    /// Devices of one station after refreshing its shadow.
    pub async fn get_devices(&self, station_id: &str) -> Result<Vec<Arc<Device>>, CoreError> {
        self.ensure_ready()?;
        if self.inner.store.station(station_id).is_none() {
            return Err(CoreError::StationNotFound {
                station_id: station_id.to_owned(),
            });
        }
        if let Err(e) = self.sync_station(station_id, None, false).await {
            warn!(station_id, error = %e, "station shadow refresh failed");
        }
        Ok(self.inner.store.devices_of_station(station_id))
    }

    /// Station record after refreshing its shadow.
    pub async fn station_state(&self, station_id: &str) -> Result<Arc<Station>, CoreError> {
        self.ensure_ready()?;
        self.sync_station(station_id, None, false).await?;
        self.inner
            .store
            .station(station_id)
            .ok_or_else(|| CoreError::StationNotFound {
                station_id: station_id.to_owned(),
            })
    }

    /// House record after merging its shadow, if the cloud keeps one.
    pub async fn house_state(&self, house_id: &str) -> Result<Arc<House>, CoreError> {
        self.ensure_ready()?;
        let store = &self.inner.store;
        let identity = store
            .house_identity(house_id)
            .ok_or_else(|| CoreError::HouseNotFound {
                house_id: house_id.to_owned(),
            })?;

        let doc = self.inner.api.get_house_shadow(&identity).await?;
        if doc.is_empty() {
            debug!(house_id, "no house shadow found");
        } else {
            store.merge_house(house_id, doc);
        }
        store.house(house_id).ok_or_else(|| CoreError::HouseNotFound {
            house_id: house_id.to_owned(),
        })
    }

    /// Re-sync one device from the cloud, notifying observers.
    ///
    /// An unknown device triggers a full refresh first.
    pub async fn refresh_device(&self, device_id: &str) -> Result<Arc<Device>, CoreError> {
        self.ensure_ready()?;
        let not_found = || CoreError::DeviceNotFound {
            device_id: device_id.to_owned(),
        };

        let Some(device) = self.inner.store.resolve_device(device_id) else {
            debug!(device_id, "device not cached, running full refresh");
            self.get_all_devices().await?;
            return self.inner.store.resolve_device(device_id).ok_or_else(not_found);
        };

        if is_wifi_type(&device.type_code) && device.id == device.station_id {
            self.enrich_wifi_station(&device.station_id).await;
        }
        self.sync_station(&device.station_id, Some(std::slice::from_ref(&device.serial)), true)
            .await?;
        self.inner.store.device(&device.id).ok_or_else(not_found)
    }

    /// Fetch a WiFi station's shadows and (re)build its device view.
    async fn enrich_wifi_station(&self, station_id: &str) {
        let store = &self.inner.store;
        let Some(identity) = store.station_identity(station_id) else {
            return;
        };
        match self.inner.api.get_wifi_device_shadow(&identity).await {
            Ok(doc) if !doc.is_empty() => {
                debug!(station_id, keys = doc.len(), "WiFi shadow merged");
                store.merge_station(station_id, doc);
            }
            Ok(_) => {}
            Err(e) => warn!(station_id, error = %e, "WiFi shadow fetch failed"),
        }
        if let Some(station) = store.station(station_id) {
            let mut device = Device::from_wifi_station(&station);
            if let Some(existing) = store.device(station_id) {
                let mut fields = existing.fields.clone();
                fields.extend(device.fields);
                device.fields = fields;
            }
            store.insert_device(device);
        }
    }

    /// Resolve a station's shadow and fold it into the cache.
    ///
    /// Returns the number of child devices merged.
    async fn sync_station(
        &self,
        station_id: &str,
        serials: Option<&[String]>,
        notify: bool,
    ) -> Result<usize, CoreError> {
        let store = &self.inner.store;
        let identity =
            store
                .station_identity(station_id)
                .ok_or_else(|| CoreError::StationNotFound {
                    station_id: station_id.to_owned(),
                })?;

        let doc = self.inner.api.get_station_shadow(&identity).await?;
        if doc.is_empty() {
            debug!(station_id, "no station shadow found");
            return Ok(0);
        }

        let merged = dispatch::apply_devs(store, &doc, serials, notify);
        let mut state = doc;
        state.remove("devs");
        store.merge_station(station_id, state.clone());

        if identity.type_code == SELF_DEVICE_STATION {
            if notify {
                store.merge_device(station_id, state);
            } else {
                store.merge_device_quiet(station_id, state);
            }
        }
        debug!(station_id, devices = merged, "station shadow applied");
        Ok(merged)
    }

    // ── Realtime ─────────────────────────────────────────────────

    /// Open (or extend) the realtime channel of a house.
    ///
    /// With only `station_id`, its house is used; with neither, the first
    /// house. Subscribes the house topics plus those of `station_id`, or
    /// of every station in the house. Health changes arrive as
    /// [`UpdateEvent::RealtimeHealth`].
    pub async fn connect_realtime(
        &self,
        house_id: Option<&str>,
        station_id: Option<&str>,
    ) -> Result<(), CoreError> {
        self.ensure_ready()?;
        if !self.inner.config.realtime_enabled {
            return Err(CoreError::Config {
                message: "realtime updates are disabled".into(),
            });
        }
        let _guard = self.inner.realtime_lock.lock().await;
        let store = &self.inner.store;

        let house = self.resolve_house(house_id, station_id)?;
        let stations: Vec<Arc<Station>> = match station_id {
            Some(id) => vec![store.station(id).ok_or_else(|| CoreError::StationNotFound {
                station_id: id.to_owned(),
            })?],
            None => store
                .stations_snapshot()
                .iter()
                .filter(|s| s.house_id == house.id)
                .cloned()
                .collect(),
        };

        if !self.inner.links.contains_key(&house.id) {
            self.open_channel(&house, stations.first().map(|s| s.id.as_str()))
                .await?;
        }
        let Some(link) = self.inner.links.get(&house.id) else {
            return Err(CoreError::realtime(&house.id));
        };

        let mut wanted = Vec::new();
        if link.legacy_station.is_some() {
            for station in &stations {
                wanted.extend(topics::legacy_topics(&house.id, &station.id));
            }
        } else {
            let owner = store.house(&house.id).and_then(|h| h.user_id.clone());
            wanted.extend(topics::house_topics(&house.id, owner.as_deref()));
            for station in &stations {
                if let Some(identity) = store.station_identity(&station.id) {
                    wanted.extend(topics::station_topics(&identity));
                }
            }
        }
        let added = link.channel.subscribe(wanted);
        info!(house_id = %house.id, stations = stations.len(), new_topics = added, "realtime subscriptions updated");
        Ok(())
    }

    fn resolve_house(
        &self,
        house_id: Option<&str>,
        station_id: Option<&str>,
    ) -> Result<Arc<House>, CoreError> {
        let store = &self.inner.store;
        if let Some(id) = house_id {
            return store.house(id).ok_or_else(|| CoreError::HouseNotFound {
                house_id: id.to_owned(),
            });
        }
        if let Some(id) = station_id {
            let station = store.station(id).ok_or_else(|| CoreError::StationNotFound {
                station_id: id.to_owned(),
            })?;
            return store
                .house(&station.house_id)
                .ok_or_else(|| CoreError::HouseNotFound {
                    house_id: station.house_id.clone(),
                });
        }
        let mut houses: Vec<_> = store.houses_snapshot().iter().cloned().collect();
        houses.sort_by(|a, b| a.id.cmp(&b.id));
        houses.into_iter().next().ok_or_else(|| CoreError::HouseNotFound {
            house_id: String::new(),
        })
    }

    async fn open_channel(&self, house: &House, station_id: Option<&str>) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let api = &self.inner.api;

        let mut legacy_station = None;
        let mut target = None;
        if config.legacy_login_enabled {
            if let Some(id) = station_id {
                if let Some(settings) = api.legacy_mqtt_config(id).await {
                    info!(house_id = %house.id, station_id = id, "using legacy broker settings");
                    legacy_station = Some(id.to_owned());
                    target = Some(BrokerTarget::Legacy {
                        station_id: id.to_owned(),
                        config: settings,
                    });
                }
            }
        }
        let target = match target {
            Some(target) => target,
            None => {
                let server = house.mqtt_server.clone().ok_or_else(|| CoreError::Config {
                    message: format!("house {} has no MQTT server", house.id),
                })?;
                let region = house
                    .mqtt_region
                    .clone()
                    .or_else(|| api.cognito_region())
                    .ok_or_else(|| CoreError::Config {
                        message: format!("house {} has no MQTT region", house.id),
                    })?;
                BrokerTarget::Aws { server, region }
            }
        };

        let mut channel_config = ChannelConfig::new(house.id.clone(), target);
        channel_config.client_id_prefix.clone_from(&config.client_id_prefix);
        channel_config.signature_refresh = config.signature_refresh;
        channel_config.reconnect = config.reconnect.clone();

        let (channel, events) = RealtimeChannel::spawn(Arc::clone(api), channel_config);
        self.inner.links.insert(
            house.id.clone(),
            HouseLink {
                channel: Arc::new(channel),
                legacy_station,
            },
        );
        self.inner.health.insert(house.id.clone(), false);

        let handle = tokio::spawn(realtime_pump_task(
            self.clone(),
            events,
            self.inner.cancel.clone(),
        ));
        self.inner.task_handles.lock().await.push(handle);
        debug!(house_id = %house.id, "realtime channel started");
        Ok(())
    }

    /// Last reported health of a house's channel; `None` if never connected.
    pub fn realtime_health(&self, house_id: &str) -> Option<bool> {
        self.inner.health.get(house_id).map(|h| *h.value())
    }

    /// Topics requested on a house's channel.
    pub fn realtime_subscriptions(&self, house_id: &str) -> Vec<String> {
        self.inner
            .links
            .get(house_id)
            .map(|link| link.channel.subscriptions())
            .unwrap_or_default()
    }

    /// Whether some known house lacks a healthy realtime connection.
    fn needs_poll(&self) -> bool {
        let houses = self.inner.store.houses_snapshot();
        houses.is_empty()
            || houses
                .iter()
                .any(|h| self.realtime_health(&h.id) != Some(true))
    }

    fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Health { house_id, healthy } => {
                let previous = self.inner.health.insert(house_id.clone(), healthy);
                if previous == Some(healthy) {
                    return;
                }
                if healthy {
                    info!(house_id = %house_id, "realtime connected");
                } else {
                    warn!(house_id = %house_id, "realtime connection lost");
                }
                self.inner
                    .store
                    .emit(&UpdateEvent::RealtimeHealth { house_id, healthy });
            }
            ChannelEvent::Message { topic, payload, .. } => {
                if let Followup::TempDataRefresh {
                    station_id,
                    serials,
                } = dispatch::handle_message(&self.inner.store, &topic, &payload)
                {
                    self.schedule_temp_refresh(station_id, serials);
                }
            }
        }
    }

    /// Re-fetch a station's shadow after a temperature-log announcement,
    /// at most once per debounce window.
    fn schedule_temp_refresh(&self, station_id: String, serials: Option<Vec<String>>) {
        let now = Instant::now();
        let window = self.inner.config.temp_data_debounce;
        if let Some(last) = self.inner.temp_refreshed.get(&station_id) {
            if now.duration_since(*last) < window {
                debug!(station_id = %station_id, "temperature refresh debounced");
                return;
            }
        }
        self.inner.temp_refreshed.insert(station_id.clone(), now);

        let controller = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = controller.sync_station(&station_id, serials.as_deref(), true) => {
                    match result {
                        Ok(n) => debug!(station_id = %station_id, devices = n, "temperature refresh applied"),
                        Err(e) => warn!(station_id = %station_id, error = %e, "temperature refresh failed"),
                    }
                }
            }
        });
    }

    // ── Observers ────────────────────────────────────────────────

    /// Register a callback for every device change, health change and
    /// notice. Drop the returned handle to unregister.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.store.on_update(Arc::new(callback))
    }

    /// Unregister a callback.
    pub fn remove_update_callback(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    /// Broadcast stream of the same events.
    pub fn updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.store.updates()
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn mute_alarm(&self, device_id: &str) -> Result<CommandResult, CoreError> {
        self.execute(Command::MuteAlarm {
            device_id: device_id.to_owned(),
        })
        .await
    }

    pub async fn test_alarm(&self, device_id: &str) -> Result<CommandResult, CoreError> {
        self.execute(Command::TestAlarm {
            device_id: device_id.to_owned(),
        })
        .await
    }

    pub async fn set_station_config(
        &self,
        station_id: &str,
        config: Map<String, Value>,
    ) -> Result<CommandResult, CoreError> {
        self.execute(Command::SetStationConfig {
            station_id: station_id.to_owned(),
            config,
        })
        .await
    }

    /// Execute a command.
    ///
    /// Sends the command through the internal channel to the command
    /// processor task and awaits the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        self.ensure_ready()?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Destroyed)?;

        rx.await.map_err(|_| CoreError::Destroyed)?
    }

    async fn publish(&self, house_id: &str, outbound: Outbound) -> Result<CommandResult, CoreError> {
        let channel = self
            .inner
            .links
            .get(house_id)
            .map(|link| Arc::clone(&link.channel))
            .ok_or_else(|| CoreError::realtime(house_id))?;

        channel
            .publish(&outbound.topic, &outbound.payload)
            .await
            .map_err(|e| match e {
                xsense_api::Error::NotConnected | xsense_api::Error::ChannelClosed => {
                    CoreError::realtime(house_id)
                }
                other => other.into(),
            })?;
        Ok(CommandResult::Published {
            house_id: house_id.to_owned(),
            topic: outbound.topic,
        })
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically refresh the directory while realtime is not healthy.
async fn poll_task(controller: Controller, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !controller.needs_poll() {
                    continue;
                }
                match controller.get_all_devices().await {
                    Ok(snapshot) => {
                        for device in snapshot.devices {
                            controller.inner.store.emit(&UpdateEvent::Device(device));
                        }
                    }
                    Err(e) => warn!(error = %e, "periodic refresh failed"),
                }
            }
        }
    }
}

/// Forward wire-layer notices to observers.
async fn notice_task(
    controller: Controller,
    mut notices: broadcast::Receiver<ApiNotice>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    warn!(kind = %notice.kind, message = %notice.message, "cloud notice");
                    controller.inner.store.emit(&UpdateEvent::Error(notice));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "notice receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Apply realtime events from one house channel.
async fn realtime_pump_task(
    controller: Controller,
    mut events: mpsc::Receiver<ChannelEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                controller.handle_channel_event(event);
            }
        }
    }
}

/// Process commands from the mpsc channel.
async fn command_processor_task(controller: Controller, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = controller.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let name = envelope.command.name();
                let result = route_command(&controller, envelope.command).await;
                if let Err(e) = &result {
                    warn!(command = name, error = %e, "command failed");
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

async fn route_command(controller: &Controller, cmd: Command) -> Result<CommandResult, CoreError> {
    let store = &controller.inner.store;

    match cmd {
        Command::MuteAlarm { device_id } => {
            let device = find_device(store, &device_id)?;
            let (house_id, owner) = owner_of(store, &device.station_id, &device.house_id)?;
            let outbound = mute_command(&owner, &device.type_code, &device.serial);
            controller.publish(&house_id, outbound).await
        }

        Command::TestAlarm { device_id } => {
            let device = find_device(store, &device_id)?;
            let (house_id, owner) = owner_of(store, &device.station_id, &device.house_id)?;
            let outbound =
                self_test_command(&owner, is_wifi_type(&device.type_code), &device.serial);
            controller.publish(&house_id, outbound).await
        }

        Command::SetStationConfig { station_id, config } => {
            let station = store
                .station(&station_id)
                .or_else(|| {
                    store
                        .resolve_device(&station_id)
                        .filter(|d| d.type_code == SELF_DEVICE_STATION)
                        .and_then(|d| store.station(&d.station_id))
                })
                .ok_or_else(|| CoreError::StationNotFound {
                    station_id: station_id.clone(),
                })?;
            let (house_id, owner) = owner_of(store, &station.id, &station.house_id)?;
            let outbound = config_command(&owner, &station.serial, config);
            controller.publish(&house_id, outbound).await
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn find_device(store: &DataStore, id: &str) -> Result<Arc<Device>, CoreError> {
    store
        .resolve_device(id)
        .ok_or_else(|| CoreError::DeviceNotFound {
            device_id: id.to_owned(),
        })
}

/// House id and shadow owner for commands: station owner, then house owner.
fn owner_of(
    store: &DataStore,
    station_id: &str,
    house_id: &str,
) -> Result<(String, String), CoreError> {
    let station_owner = store.station(station_id).and_then(|s| s.user_id.clone());
    let owner = station_owner
        .or_else(|| store.house(house_id).and_then(|h| h.user_id.clone()))
        .filter(|o| !o.is_empty())
        .ok_or_else(|| CoreError::OwnerUnknown {
            house_id: house_id.to_owned(),
        })?;
    Ok((house_id.to_owned(), owner))
}
