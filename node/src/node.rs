//! The running node.
//!
//! A [`Node`] owns the item store and drives it from the network: local
//! changes are flushed as update messages every fast tick, status and
//! full snapshots go out on the slow tick, and everything received is
//! merged into the store. Peers announcing themselves trigger a full
//! pull over TCP.
//!
//! The store sits behind a plain mutex. It is never held across an
//! await, so the item API is synchronous and usable from any thread.

use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::peers::{self, Peer, PeerEvent, PeerTable, REQUEST_ADDRESS_FIELD, REQUEST_PORT_FIELD};
use crate::persist;
use crate::records::{Direction, RecordsWriter};
use crate::sync::{self, ItemListFn, MessageHook};
use crate::transport::{Transport, UdpTransport};
use infodb_engine::units::{DistanceUnits, SpeedUnits, Units};
use infodb_engine::{
    Field, FieldValue, Item, ItemId, ItemRecord, MergeOutcome, MergeReport, Message, MessageKind,
    Store, Timestamp, MAX_DATAGRAM_BYTES,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Status periods a peer may stay silent before it is reported lost.
const MISSED_STATUS_LIMIT: u32 = 3;

/// Current wall-clock time in engine units.
pub fn wall_clock() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: Config,
    node_id: ItemId,
    store: Mutex<Store>,
    transport: Arc<dyn Transport>,
    peers: PeerTable,
    records: Mutex<Option<RecordsWriter>>,
    request_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    records_task: Option<JoinHandle<()>>,
}

/// A database node.
pub struct Node {
    inner: Arc<Inner>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Node {
    /// Create a stopped node sending and receiving through `transport`.
    ///
    /// The node's uuid comes from the configuration, or is generated.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let node_id = config.node_uuid.unwrap_or_else(Uuid::new_v4);
        let store = Store::new(
            node_id,
            config.store_config(),
            config.enum_definitions.clone(),
            wall_clock(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                node_id,
                store: Mutex::new(store),
                transport,
                peers: PeerTable::new(),
                records: Mutex::new(None),
                request_addr: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a node on the UDP multicast transport described by `config`.
    pub async fn with_udp(config: Config) -> Result<Self> {
        let transport = UdpTransport::bind(&config).await?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn node_id(&self) -> ItemId {
        self.inner.node_id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Address serving full-sync pulls, while running.
    pub fn request_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.request_addr)
    }

    /// Peers heard from so far.
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.peers.peers()
    }

    /// Start networking.
    ///
    /// Loads the backup if configured, opens the pull listener, starts
    /// the background tasks and announces the node with a status message
    /// and a full snapshot.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(NodeError::AlreadyStarted);
        }

        let inner = &self.inner;
        let config = &inner.config;

        if config.load_from_backup {
            match inner.load_file(&config.backup_filename, true).await {
                Ok(loaded) => {
                    tracing::info!(path = %config.backup_filename.display(), loaded, "Loaded backup");
                }
                Err(e) => {
                    tracing::warn!(path = %config.backup_filename.display(), error = %e, "Failed to load backup");
                }
            }
        }

        let listener =
            TcpListener::bind((config.request_recv_if_address, config.request_recv_port)).await?;
        let local = listener.local_addr()?;
        *lock(&inner.request_addr) = Some(local);
        inner.store().edit_self(wall_clock(), |item, ts| {
            item.update_int_field(REQUEST_PORT_FIELD, i64::from(local.port()), ts)?;
            item.update_string_field(
                REQUEST_ADDRESS_FIELD,
                config.request_recv_if_address.to_string(),
                ts,
            )
        })?;

        let records_task = if config.save_records {
            let (writer, task) = RecordsWriter::spawn(config.record_base_filename.clone());
            *lock(&inner.records) = Some(writer);
            Some(task)
        } else {
            None
        };

        let cancel = CancellationToken::new();
        let item_list: ItemListFn = {
            let inner = Arc::clone(inner);
            Arc::new(move || inner.item_list_bytes())
        };
        let on_message: MessageHook = {
            let inner = Arc::clone(inner);
            Arc::new(move |direction, body: &[u8]| inner.record(direction, body))
        };
        let tasks = vec![
            tokio::spawn(fast_loop(Arc::clone(inner), cancel.clone())),
            tokio::spawn(slow_loop(Arc::clone(inner), cancel.clone())),
            tokio::spawn(recv_loop(Arc::clone(inner), cancel.clone())),
            tokio::spawn(sync::serve_requests(
                listener,
                item_list,
                on_message,
                config.pull_timeout,
                cancel.clone(),
            )),
        ];

        inner.running.store(true, Ordering::SeqCst);
        *running = Some(Running {
            cancel,
            tasks,
            records_task,
        });
        drop(running);

        inner.send_status().await;
        inner.send_full_snapshot().await;

        tracing::info!(
            node_id = %inner.node_id,
            request_addr = %local,
            state = %config.state,
            "Node started"
        );
        Ok(())
    }

    /// Stop networking.
    ///
    /// Flushes outstanding updates, stops the background tasks, closes the
    /// records file and writes the backup if configured.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(NodeError::NotInitialised);
        };
        let inner = &self.inner;

        inner.flush_updates().await;
        inner.running.store(false, Ordering::SeqCst);
        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Node task ended abnormally");
            }
        }

        drop(lock(&inner.records).take());
        if let Some(task) = running.records_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Records writer ended abnormally");
            }
        }
        *lock(&inner.request_addr) = None;

        if inner.config.save_to_backup {
            inner.save_backup().await?;
        }

        tracing::info!(node_id = %inner.node_id, "Node stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(NodeError::NotInitialised)
        }
    }

    /// Send pending local changes now. Returns the number of items sent.
    pub async fn flush_updates(&self) -> Result<usize> {
        self.ensure_running()?;
        Ok(self.inner.flush_updates().await)
    }

    /// Send a status message now.
    pub async fn send_status(&self) -> Result<()> {
        self.ensure_running()?;
        self.inner.send_status().await;
        Ok(())
    }

    /// Send every owned item now. Returns the number of items sent.
    pub async fn send_full_update(&self) -> Result<usize> {
        self.ensure_running()?;
        Ok(self.inner.send_full_snapshot().await)
    }

    /// Pull the full item list from the node serving pulls at `addr`.
    pub async fn pull_from(&self, addr: SocketAddr) -> Result<MergeReport> {
        self.ensure_running()?;
        self.inner.pull_from(addr).await
    }

    /// Remove deleted items whose purge timeout has passed.
    pub fn purge_deleted(&self) -> Vec<ItemId> {
        self.inner.purge()
    }

    /// Save every item to `path`.
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        self.inner.save_to(path).await
    }

    /// Merge the items saved in `path`. Returns how many were taken.
    ///
    /// Items saved by another node are kept as that node's, not ours.
    pub async fn load_from_file(&self, path: &Path) -> Result<usize> {
        self.inner.load_file(path, false).await
    }

    /// Change the node's state, carried by its self-item.
    pub fn set_state(&self, state: &str) -> Result<()> {
        self.inner.store().set_node_state(state, wall_clock())?;
        Ok(())
    }

    pub fn state(&self) -> String {
        self.inner.store().config().node_state.clone()
    }

    // Items

    /// Create a pending item of `item_type` owned by this node.
    ///
    /// Pending items stay private until [`Node::set_item_live`].
    pub fn create_item(&self, item_type: &str) -> Result<ItemId> {
        Ok(self
            .inner
            .store()
            .create_item(Uuid::new_v4(), item_type, wall_clock())?)
    }

    pub fn is_item_pending(&self, uuid: &ItemId) -> Result<bool> {
        self.read(uuid, |item| Ok(item.is_pending()))
    }

    /// Publish a pending item. Live items are left alone.
    pub fn set_item_live(&self, uuid: &ItemId) -> Result<()> {
        self.inner.store().set_item_live(uuid, wall_clock())?;
        Ok(())
    }

    pub fn update_item_type(&self, uuid: &ItemId, item_type: &str) -> Result<()> {
        self.edit_item(uuid, |item, ts| {
            item.set_type(item_type, ts);
            Ok(())
        })
    }

    pub fn update_item_state(&self, uuid: &ItemId, state: &str) -> Result<()> {
        self.edit_item(uuid, |item, ts| {
            item.set_state(state, ts);
            Ok(())
        })
    }

    pub fn delete_item(&self, uuid: &ItemId) -> Result<()> {
        self.inner.store().delete_item(uuid, wall_clock())?;
        Ok(())
    }

    /// Apply several changes to one item under a single timestamp.
    pub fn edit_item<R>(
        &self,
        uuid: &ItemId,
        f: impl FnOnce(&mut Item, Timestamp) -> infodb_engine::Result<R>,
    ) -> Result<R> {
        Ok(self.inner.store().edit_item(uuid, wall_clock(), f)?)
    }

    /// Set a field, creating it with the value's kind if needed.
    pub fn update_item_field(
        &self,
        uuid: &ItemId,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<()> {
        let value = value.into();
        self.edit_item(uuid, |item, ts| item.update_field(name, value, ts))
    }

    pub fn update_item_distance_field(
        &self,
        uuid: &ItemId,
        name: &str,
        value: f64,
        units: DistanceUnits,
    ) -> Result<()> {
        self.edit_item(uuid, |item, ts| {
            item.update_distance_field(name, value, units, ts)
        })
    }

    pub fn update_item_speed_field(
        &self,
        uuid: &ItemId,
        name: &str,
        value: f64,
        units: SpeedUnits,
    ) -> Result<()> {
        self.edit_item(uuid, |item, ts| item.update_speed_field(name, value, units, ts))
    }

    pub fn delete_item_field(&self, uuid: &ItemId, name: &str) -> Result<()> {
        self.edit_item(uuid, |item, ts| item.delete_field(name, ts))
    }

    pub fn set_item_field_enum_name(&self, uuid: &ItemId, name: &str, enum_name: &str) -> Result<()> {
        self.edit_item(uuid, |item, ts| item.set_field_enum_name(name, enum_name, ts))
    }

    pub fn set_item_field_display_units(
        &self,
        uuid: &ItemId,
        name: &str,
        units: impl Into<Units>,
    ) -> Result<()> {
        let units = units.into();
        self.edit_item(uuid, |item, ts| item.set_field_display_units(name, units, ts))
    }

    pub fn set_item_field_display_num_dp(&self, uuid: &ItemId, name: &str, num_dp: u8) -> Result<()> {
        self.edit_item(uuid, |item, ts| item.set_field_display_num_dp(name, num_dp, ts))
    }

    pub fn set_item_field_unit_label(&self, uuid: &ItemId, name: &str, label: &str) -> Result<()> {
        self.edit_item(uuid, |item, ts| item.set_field_unit_label(name, label, ts))
    }

    // Queries

    fn read<R>(
        &self,
        uuid: &ItemId,
        f: impl FnOnce(&Item) -> infodb_engine::Result<R>,
    ) -> Result<R> {
        let store = self.inner.store();
        Ok(f(store.item(uuid)?)?)
    }

    fn read_field<R>(
        &self,
        uuid: &ItemId,
        name: &str,
        f: impl FnOnce(&Field) -> infodb_engine::Result<R>,
    ) -> Result<R> {
        self.read(uuid, |item| f(item.field(name)?))
    }

    /// Copy of an item.
    pub fn item(&self, uuid: &ItemId) -> Result<Item> {
        self.read(uuid, |item| Ok(item.clone()))
    }

    /// Every item, pending and deleted ones included.
    pub fn items(&self) -> Vec<Item> {
        self.inner.store().items().cloned().collect()
    }

    /// Live, undeleted items.
    pub fn active_items(&self) -> Vec<Item> {
        self.inner.store().active_items().cloned().collect()
    }

    /// Pending or deleted items.
    pub fn inactive_items(&self) -> Vec<Item> {
        self.inner.store().inactive_items().cloned().collect()
    }

    pub fn item_is_active(&self, uuid: &ItemId) -> bool {
        self.inner
            .store()
            .get(uuid)
            .is_some_and(|item| item.is_active())
    }

    pub fn item_timestamp(&self, uuid: &ItemId) -> Result<Timestamp> {
        self.read(uuid, |item| Ok(item.timestamp()))
    }

    pub fn item_type(&self, uuid: &ItemId) -> Result<String> {
        self.read(uuid, |item| Ok(item.item_type().to_string()))
    }

    pub fn item_state(&self, uuid: &ItemId) -> Result<String> {
        self.read(uuid, |item| Ok(item.state().to_string()))
    }

    pub fn item_num_fields(&self, uuid: &ItemId) -> Result<usize> {
        self.read(uuid, |item| Ok(item.num_fields()))
    }

    pub fn item_has_field(&self, uuid: &ItemId, name: &str) -> bool {
        self.inner
            .store()
            .get(uuid)
            .is_some_and(|item| item.has_field(name))
    }

    pub fn item_fields(&self, uuid: &ItemId) -> Result<Vec<Field>> {
        self.read(uuid, |item| Ok(item.fields().to_vec()))
    }

    /// Field value formatted for display, honouring its display settings.
    pub fn item_field_value(&self, uuid: &ItemId, name: &str) -> Result<String> {
        let store = self.inner.store();
        let field = store.item(uuid)?.field(name)?;
        Ok(field.value_string(store.enums()))
    }

    pub fn item_field_value_as_int(&self, uuid: &ItemId, name: &str) -> Result<i64> {
        self.read_field(uuid, name, Field::value_as_int)
    }

    pub fn item_field_value_as_double(&self, uuid: &ItemId, name: &str) -> Result<f64> {
        self.read_field(uuid, name, Field::value_as_double)
    }

    pub fn item_field_value_as_distance(
        &self,
        uuid: &ItemId,
        name: &str,
        units: DistanceUnits,
    ) -> Result<f64> {
        self.read_field(uuid, name, |field| field.value_as_distance(units))
    }

    pub fn item_field_value_as_speed(
        &self,
        uuid: &ItemId,
        name: &str,
        units: SpeedUnits,
    ) -> Result<f64> {
        self.read_field(uuid, name, |field| field.value_as_speed(units))
    }

    pub fn item_field_enum_name(&self, uuid: &ItemId, name: &str) -> Result<String> {
        self.read_field(uuid, name, |field| field.enum_name().map(str::to_string))
    }

    pub fn item_field_display_units(&self, uuid: &ItemId, name: &str) -> Result<Option<Units>> {
        self.read_field(uuid, name, |field| Ok(field.display_units()))
    }

    pub fn item_field_display_num_dp(&self, uuid: &ItemId, name: &str) -> Result<Option<u8>> {
        self.read_field(uuid, name, |field| Ok(field.display_num_dp()))
    }

    pub fn item_field_unit_label(&self, uuid: &ItemId, name: &str) -> Result<Option<String>> {
        self.read_field(uuid, name, |field| {
            Ok(field.unit_label().map(str::to_string))
        })
    }

    // Enumerations

    pub fn enum_value_count(&self, enum_name: &str) -> Result<usize> {
        Ok(self.inner.store().enums().value_count(enum_name)?)
    }

    pub fn enum_value_list(&self, enum_name: &str) -> Result<Vec<i64>> {
        Ok(self.inner.store().enums().value_list(enum_name)?)
    }

    pub fn enum_string_from_value(&self, enum_name: &str, value: i64) -> Result<String> {
        Ok(self
            .inner
            .store()
            .enums()
            .string_for(enum_name, value)?
            .to_string())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.take() {
                running.cancel.cancel();
            }
        }
    }
}

impl Inner {
    fn store(&self) -> MutexGuard<'_, Store> {
        lock(&self.store)
    }

    fn record(&self, direction: Direction, body: &[u8]) {
        if direction == Direction::Sent && !self.config.record_sent_messages {
            return;
        }
        if let Some(writer) = lock(&self.records).as_ref() {
            writer.record(direction, body);
        }
    }

    /// Broadcast `items` as one or more datagrams. Returns the item count.
    async fn send(&self, kind: MessageKind, items: Vec<ItemRecord>) -> usize {
        let count = items.len();
        let chunks = match Message::encode_chunked(
            kind,
            self.node_id,
            wall_clock(),
            items,
            MAX_DATAGRAM_BYTES,
        ) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(?kind, error = %e, "Failed to encode message");
                return 0;
            }
        };

        for chunk in &chunks {
            if let Err(e) = self.transport.broadcast(chunk).await {
                tracing::warn!(?kind, error = %e, "Failed to send message");
                continue;
            }
            self.record(Direction::Sent, chunk);
        }
        tracing::trace!(?kind, items = count, datagrams = chunks.len(), "Sent message");
        count
    }

    async fn flush_updates(&self) -> usize {
        let updates = self.store().take_updates();
        if updates.is_empty() {
            return 0;
        }
        self.send(MessageKind::Update, updates).await
    }

    async fn send_status(&self) {
        let status = self.store().status_record();
        self.send(MessageKind::Status, vec![status]).await;
    }

    async fn send_full_snapshot(&self) -> usize {
        let items = self.store().full_snapshot();
        self.send(MessageKind::Full, items).await
    }

    fn purge(&self) -> Vec<ItemId> {
        let purged = self.store().purge(wall_clock());
        for uuid in &purged {
            if self.peers.remove(uuid).is_some() {
                tracing::debug!(node_id = %uuid, "Forgot lost peer");
            }
            tracing::debug!(uuid = %uuid, "Purged deleted item");
        }
        purged
    }

    /// Retire the self-items of peers that stopped sending status.
    fn check_lost_peers(&self) {
        let lost_after = self.config.status_period.saturating_mul(MISSED_STATUS_LIMIT);
        for node_id in self.peers.check_lost(Instant::now(), lost_after) {
            if self.store().retire_peer(&node_id, wall_clock()) {
                tracing::debug!(node_id = %node_id, "Retired lost peer's node item");
            }
        }
    }

    async fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.store().export_snapshot(wall_clock());
        persist::save_snapshot(path, &snapshot).await
    }

    async fn save_backup(&self) -> Result<()> {
        self.save_to(&self.config.backup_filename).await
    }

    /// Load a snapshot file. `own_backup` marks a backup of this node,
    /// whose owned items stay owned across a change of node id.
    async fn load_file(&self, path: &Path, own_backup: bool) -> Result<usize> {
        let Some(snapshot) = persist::load_snapshot(path).await? else {
            return Ok(0);
        };
        let mut store = self.store();
        let loaded = if own_backup {
            store.restore_snapshot(snapshot)?
        } else {
            store.import_snapshot(snapshot)?
        };
        Ok(loaded)
    }

    fn item_list_bytes(&self) -> Result<Vec<u8>> {
        let items = self.store().item_list();
        let message = Message::new(MessageKind::ItemList, self.node_id, wall_clock(), items);
        Ok(message.to_json()?)
    }

    /// Merge records one at a time so local edits are never blocked for
    /// the length of a whole message.
    fn merge_records(&self, records: Vec<ItemRecord>, from: SocketAddr) -> MergeReport {
        let mut report = MergeReport::default();
        for record in records {
            let uuid = record.uuid;
            match self.store().apply_record(record, wall_clock()) {
                Ok(outcome) => {
                    if let MergeOutcome::Rejected(reason) = &outcome {
                        tracing::warn!(uuid = %uuid, peer = %from, ?reason, "Rejected item");
                    }
                    report.add(uuid, outcome);
                }
                Err(e) => {
                    tracing::warn!(uuid = %uuid, peer = %from, error = %e, "Dropped invalid item");
                    report.invalid += 1;
                }
            }
        }
        report
    }

    async fn pull_from(&self, addr: SocketAddr) -> Result<MergeReport> {
        let request = Message::new(
            MessageKind::ItemListRequest,
            self.node_id,
            wall_clock(),
            Vec::new(),
        );
        let record = |direction, body: &[u8]| self.record(direction, body);
        let response = sync::pull_items(addr, &request, self.config.pull_timeout, &record).await?;
        Ok(self.merge_records(response.items, addr))
    }

    fn spawn_pull(self: &Arc<Self>, addr: SocketAddr, cancel: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = inner.pull_from(addr) => match result {
                    Ok(report) => tracing::info!(
                        peer = %addr,
                        inserted = report.inserted,
                        replaced = report.replaced,
                        rejected = report.rejected.len(),
                        "Pulled item list"
                    ),
                    Err(e) => tracing::warn!(peer = %addr, error = %e, "Pull failed"),
                },
            }
        });
    }

    fn handle_datagram(self: &Arc<Self>, payload: &[u8], from: SocketAddr, cancel: &CancellationToken) {
        let message = match Message::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "Dropped undecodable message");
                return;
            }
        };
        if message.node == self.node_id {
            return;
        }
        self.record(Direction::Received, payload);

        match message.kind {
            MessageKind::ItemListRequest | MessageKind::ItemList => {
                tracing::debug!(peer = %from, kind = ?message.kind, "Ignoring pull message on datagram channel");
                return;
            }
            MessageKind::Status => {
                if let Some(status) = message.items.iter().find(|r| r.uuid == message.node) {
                    let event = self.peers.observe(from, status, Instant::now());
                    if event == PeerEvent::Returned {
                        self.store().revive_peer(&status.uuid);
                    }
                    if event != PeerEvent::Seen && self.config.auto_pull {
                        match peers::request_endpoint(status, from) {
                            Some(addr) => self.spawn_pull(addr, cancel.clone()),
                            None => {
                                tracing::debug!(node_id = %message.node, "Peer advertises no pull endpoint");
                            }
                        }
                    }
                }
            }
            MessageKind::Update | MessageKind::Full => {}
        }

        let kind = message.kind;
        let report = self.merge_records(message.items, from);
        if report.changed() {
            tracing::debug!(
                peer = %from,
                ?kind,
                inserted = report.inserted,
                replaced = report.replaced,
                "Merged message"
            );
        }
    }
}

async fn fast_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.fast_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.flush_updates().await;
                inner.check_lost_peers();
            }
        }
    }
}

async fn slow_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let config = &inner.config;
    let period = config.status_period;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_full = Instant::now();
    let mut last_backup = Instant::now();
    let backups = config.save_to_backup && config.backup_period > Duration::ZERO;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.send_status().await;

                if last_full.elapsed() >= config.full_update_period {
                    last_full = Instant::now();
                    inner.send_full_snapshot().await;
                }

                inner.purge();

                if backups && last_backup.elapsed() >= config.backup_period {
                    last_backup = Instant::now();
                    if let Err(e) = inner.save_backup().await {
                        tracing::warn!(error = %e, "Periodic backup failed");
                    }
                }
            }
        }
    }
}

async fn recv_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = inner.transport.recv() => match received {
                Ok((payload, from)) => inner.handle_datagram(&payload, from, &cancel),
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    tokio::time::sleep(inner.config.fast_tick).await;
                }
            },
        }
    }
}
