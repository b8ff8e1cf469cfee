//! The event router: a single task that owns every mutation.
//!
//! It waits for the radio, opens it through a [`RadioConnector`], then
//! multiplexes radio events and UI commands with `tokio::select!` until the
//! link drops or the user quits.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> ...
//!        \____________\______________\______> ShuttingDown
//! ```

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use meshchat_radio::{wait_for_radio, RadioConnector, RadioEvent, RadioLink, RadioTransport};
use meshchat_shared::constants::{BROADCAST_NODE_ID, DEFAULT_CHANNEL_ID};
use meshchat_shared::{
    classify, ClassifiedMessage, ConversationKey, LocalIdentity, NodePatch, RawNodeRecord, RawPacket,
    TextMessage,
};
use meshchat_store::{ConversationEntry, StoreError};

use crate::config::{ClientConfig, LocalFlagPolicy};
use crate::dedup::RecentPackets;
use crate::error::ClientError;
use crate::events::{emit_event, Notice, NoticeLevel, UiCommand, UiEvent};
use crate::format::format_entry;
use crate::state::{lock, ConnectionState, RouterExit, SharedState};

/// How a connected session ended.
enum LinkEnd {
    Lost,
    Quit,
}

pub struct EventRouter<C: RadioConnector> {
    config: ClientConfig,
    connector: C,
    state: SharedState,
    commands: mpsc::Receiver<UiCommand>,
    ui_tx: mpsc::Sender<UiEvent>,
    recent: RecentPackets,
    /// Node id of the attached radio, once it has identified itself.
    local_node_id: Option<String>,
}

impl<C: RadioConnector> EventRouter<C> {
    pub fn new(
        config: ClientConfig,
        connector: C,
        state: SharedState,
        commands: mpsc::Receiver<UiCommand>,
        ui_tx: mpsc::Sender<UiEvent>,
    ) -> Self {
        let recent = RecentPackets::new(config.dedup_window);
        Self {
            config,
            connector,
            state,
            commands,
            ui_tx,
            recent,
            local_node_id: None,
        }
    }

    /// Drive the state machine until quit or a fatal radio error.
    pub async fn run(mut self) -> RouterExit {
        info!(path = %self.config.radio_path.display(), "Event router started");

        loop {
            self.set_state(ConnectionState::Connecting).await;

            let path = match self.wait_for_device().await {
                Ok(path) => path,
                Err(exit) => return self.finish(exit, None).await,
            };

            let mut link = match self.connector.connect(&path) {
                Ok(link) => link,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to open radio");
                    self.notice(Notice::error(format!("Could not open radio: {e}")))
                        .await;
                    return self.finish(RouterExit::RadioNotFound, None).await;
                }
            };
            info!(path = %path.display(), "Radio opened, waiting for handshake");

            match self.pump(&mut link).await {
                LinkEnd::Quit => return self.finish(RouterExit::Quit, Some(link)).await,
                LinkEnd::Lost => {
                    self.on_connection_lost(link).await;
                    if !self.config.reconnect {
                        self.notice(Notice::error("Radio disconnected")).await;
                        return self.finish(RouterExit::RadioDisconnected, None).await;
                    }
                    self.notice(Notice::warning("Radio disconnected, waiting for it to return"))
                        .await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    /// Poll for the device path while still answering UI commands.
    async fn wait_for_device(&mut self) -> Result<PathBuf, RouterExit> {
        let path = self.config.radio_path.clone();
        let wait = wait_for_radio(&path, self.config.connect_timeout, self.config.poll_interval);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                found = &mut wait => {
                    return match found {
                        Ok(path) => Ok(path),
                        Err(e) => {
                            error!(error = %e, "Radio not found");
                            self.notice(Notice::error(e.to_string())).await;
                            Err(RouterExit::RadioNotFound)
                        }
                    };
                }
                cmd = self.commands.recv() => match cmd {
                    Some(UiCommand::SubmitText { .. }) => {
                        self.notice(Notice::warning(ClientError::NotConnected.to_string()))
                            .await;
                    }
                    Some(UiCommand::Quit) | None => {
                        info!("Quit while waiting for radio");
                        return Err(RouterExit::Quit);
                    }
                },
            }
        }
    }

    /// Route events for one open link until it drops or the user quits.
    async fn pump(&mut self, link: &mut RadioLink<C::Transport>) -> LinkEnd {
        loop {
            tokio::select! {
                event = link.events.recv() => match event {
                    Some(RadioEvent::ConnectionEstablished) => {
                        let identity = link.transport.local_identity();
                        let records = link.transport.known_nodes();
                        self.on_connection_established(identity, records).await;
                    }
                    Some(RadioEvent::PacketReceived(packet)) => self.on_packet(&packet).await,
                    Some(RadioEvent::NodeUpdated(record)) => self.on_node_updated(&record).await,
                    Some(RadioEvent::ConnectionLost) | None => return LinkEnd::Lost,
                },
                cmd = self.commands.recv() => match cmd {
                    Some(UiCommand::SubmitText { body, target }) => {
                        self.submit_text(&mut link.transport, &body, &target).await;
                    }
                    Some(UiCommand::Quit) | None => return LinkEnd::Quit,
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    async fn on_connection_established(
        &mut self,
        identity: meshchat_radio::Result<LocalIdentity>,
        records: meshchat_radio::Result<Vec<RawNodeRecord>>,
    ) {
        match identity {
            Ok(identity) => {
                let result = {
                    let mut state = lock(&self.state);
                    state
                        .directory
                        .upsert(
                            Some(identity.node_id.as_str()),
                            identity.mac_address.as_deref(),
                            &identity.to_patch(),
                        )
                        .and_then(|_| state.directory.mark_local(&identity.node_id))
                };
                match result {
                    Ok(()) => info!(node = %identity.node_id, "Local radio identified"),
                    Err(e) => self.store_failed("local radio", e).await,
                }
                self.local_node_id = Some(identity.node_id);
            }
            Err(e) => {
                warn!(error = %e, "Radio did not report its identity");
                self.notice(Notice::warning(format!("Local radio unidentified: {e}")))
                    .await;
            }
        }

        match records {
            Ok(records) => {
                let total = records.len();
                for record in &records {
                    self.upsert_record(record).await;
                }
                debug!(count = total, "Node directory synced from radio");
            }
            Err(e) => warn!(error = %e, "Failed to list known nodes"),
        }

        self.set_state(ConnectionState::Connected).await;
        self.emit_node_list().await;

        let name = self
            .local_node_id
            .as_deref()
            .and_then(|id| lock(&self.state).directory.get(id).map(|n| n.display_name().to_string()))
            .unwrap_or_else(|| "radio".to_string());
        self.notice(Notice::info(format!("Connected to {name}"))).await;
    }

    async fn on_connection_lost(&mut self, mut link: RadioLink<C::Transport>) {
        warn!("Radio connection lost");

        if self.config.local_flag_policy == LocalFlagPolicy::ClearOnDisconnect {
            let result = lock(&self.state).directory.clear_local();
            if let Err(e) = result {
                self.store_failed("local radio flag", e).await;
            }
        }
        if let Err(e) = link.transport.close() {
            debug!(error = %e, "Closing a lost link failed");
        }
        self.local_node_id = None;
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Leave the state machine. Quit additionally clears the local flag.
    async fn finish(
        &mut self,
        exit: RouterExit,
        link: Option<RadioLink<C::Transport>>,
    ) -> RouterExit {
        if exit == RouterExit::Quit {
            self.set_state(ConnectionState::ShuttingDown).await;
            let result = lock(&self.state).directory.clear_local();
            if let Err(e) = result {
                warn!(error = %e, "Failed to clear local radio flag on quit");
            }
        }

        self.persist_conversations();

        if let Some(mut link) = link {
            if let Err(e) = link.transport.close() {
                warn!(error = %e, "Failed to close radio");
            }
        }

        info!(exit = ?exit, code = exit.exit_code(), "Event router stopped");
        exit
    }

    fn persist_conversations(&self) {
        let mut state = lock(&self.state);
        if let Err(e) = state.conversations.flush() {
            error!(error = %e, "Failed to flush conversation store");
        }
        if let Some(path) = &self.config.snapshot_path {
            if let Err(e) = state.conversations.save_snapshot(path) {
                error!(path = %path.display(), error = %e, "Failed to write conversation snapshot");
            }
        }
    }

    // ------------------------------------------------------------------
    // Radio events
    // ------------------------------------------------------------------

    async fn on_packet(&mut self, packet: &RawPacket) {
        let message = classify(packet);
        match message {
            ClassifiedMessage::Text(text) => self.on_text(text).await,
            ClassifiedMessage::Telemetry(telemetry) => {
                let node_id = node_id_for(
                    telemetry.from_node_id.as_deref(),
                    telemetry.from_node_num,
                );
                self.update_node(node_id, NodePatch::from_telemetry(&telemetry))
                    .await;
            }
            ClassifiedMessage::Position(position) => {
                let node_id =
                    node_id_for(position.from_node_id.as_deref(), position.from_node_num);
                self.update_node(node_id, NodePatch::from_position(&position))
                    .await;
            }
            ClassifiedMessage::Routing(routing) => {
                if routing.is_ack() {
                    debug!("Routing ack");
                } else {
                    info!(reason = ?routing.error_reason, "Routing error reported");
                }
            }
            ClassifiedMessage::Admin { .. } => debug!("Admin packet ignored"),
            ClassifiedMessage::Unknown { raw } => {
                let port = raw.portnum();
                debug!(portnum = port.as_str(), "Unclassified packet dropped");
            }
        }
    }

    async fn on_text(&mut self, text: TextMessage) {
        let Some(body) = text.body.as_deref() else {
            debug!(id = ?text.id, "Text packet without a body");
            return;
        };
        let Some(sender) = node_id_for(text.from_node_id.as_deref(), text.from_node_num) else {
            warn!(id = ?text.id, "Text packet without a sender");
            return;
        };
        if let Some(id) = text.id {
            if !self.recent.observe(&sender, id) {
                debug!(from = %sender, id, "Repeated delivery dropped");
                return;
            }
        }

        let received_at = text.received_at().unwrap_or_else(Utc::now);
        let entry = if text.is_broadcast {
            let channel = text
                .channel
                .map(|c| c.to_string())
                .unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string());
            let receiver = text.to_node_id.as_deref().unwrap_or(BROADCAST_NODE_ID);
            ConversationEntry::channel(channel, &sender, receiver, body, received_at)
        } else {
            let receiver = node_id_for(text.to_node_id.as_deref(), text.to_node_num)
                .or_else(|| self.local_node_id.clone())
                .unwrap_or_default();
            ConversationEntry::direct(&sender, receiver, body, received_at)
        };

        self.record(entry.with_packet_id(text.id)).await;
    }

    async fn on_node_updated(&mut self, record: &RawNodeRecord) {
        if self.upsert_record(record).await {
            self.emit_node_list().await;
        }
    }

    /// Apply a radio node record; `true` when the directory changed.
    async fn upsert_record(&mut self, record: &RawNodeRecord) -> bool {
        let node_id = record.node_id();
        let mac = record.mac_address();
        if node_id.is_none() && mac.is_none() {
            debug!(num = ?record.node_num(), "Node record without id or MAC skipped");
            return false;
        }

        let result = lock(&self.state).directory.upsert(
            node_id.as_deref(),
            mac.as_deref(),
            &record.to_patch(),
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                self.store_failed("node update", e).await;
                false
            }
        }
    }

    async fn update_node(&mut self, node_id: Option<String>, patch: NodePatch) {
        let Some(node_id) = node_id else {
            debug!("Node metrics without a sender dropped");
            return;
        };
        if patch.is_empty() {
            return;
        }

        // Metrics refresh known nodes; new nodes come from the radio's node list.
        let result = {
            let mut state = lock(&self.state);
            match state.directory.get(&node_id) {
                Some(_) => Some(state.directory.upsert(Some(node_id.as_str()), None, &patch)),
                None => None,
            }
        };
        match result {
            Some(Ok(_)) => self.emit_node_list().await,
            Some(Err(e)) => self.store_failed("node metrics", e).await,
            None => debug!(node = %node_id, "Metrics from unknown node dropped"),
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    async fn submit_text(
        &mut self,
        transport: &mut C::Transport,
        body: &str,
        target: &ConversationKey,
    ) {
        match self.send_outbound(transport, body, target) {
            Ok(entry) => self.record(entry).await,
            Err(ClientError::Radio(e)) => {
                self.notice(Notice::warning(format!("Message not sent: {e}")))
                    .await;
            }
            Err(e) => self.notice(Notice::warning(e.to_string())).await,
        }
    }

    /// Validate and hand a text to the radio; the entry to record on success.
    fn send_outbound(
        &self,
        transport: &mut C::Transport,
        body: &str,
        target: &ConversationKey,
    ) -> crate::Result<ConversationEntry> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let connected = lock(&self.state).connection == ConnectionState::Connected;
        let local = match (&self.local_node_id, connected) {
            (Some(local), true) => local,
            _ => return Err(ClientError::NotConnected),
        };

        let destination = target.destination();
        if let Err(e) = transport.send_text(body, &destination) {
            warn!(to = %destination, error = %e, "Send failed");
            return Err(e.into());
        }
        info!(to = %destination, len = body.len(), "Text sent");

        let now = Utc::now();
        Ok(match target {
            ConversationKey::Direct(peer) => ConversationEntry::direct(local, peer, body, now),
            ConversationKey::Channel(channel) => {
                ConversationEntry::channel(channel, local, BROADCAST_NODE_ID, body, now)
            }
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Store an entry and tell the UI about it.
    async fn record(&mut self, entry: ConversationEntry) {
        let result = {
            let mut state = lock(&self.state);
            state.conversations.append(entry).map(|entry| {
                let key = entry.key();
                let is_for_selected = state.selected.as_ref() == Some(&key);
                let sender_name = state
                    .directory
                    .get(&entry.sender_node_id)
                    .map(|n| n.display_name().to_string())
                    .unwrap_or_else(|| entry.sender_node_id.clone());
                let rendered = format_entry(&entry, &sender_name);
                UiEvent::TextMessage {
                    entry,
                    key,
                    is_for_selected,
                    rendered,
                }
            })
        };

        match result {
            Ok(event) => self.emit(event).await,
            Err(e) => self.store_failed("message", e).await,
        }
    }

    async fn set_state(&mut self, next: ConnectionState) {
        let previous = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut state.connection, next)
        };
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
            self.emit(UiEvent::StateChanged(next)).await;
        }
    }

    async fn emit_node_list(&self) {
        let nodes = lock(&self.state).directory.list().to_vec();
        self.emit(UiEvent::NodeListChanged(nodes)).await;
    }

    async fn store_failed(&self, what: &str, err: StoreError) {
        let notice = if err.is_persistence() {
            error!(what, error = %err, "Storage failure");
            Notice {
                level: NoticeLevel::Error,
                message: format!("Could not save {what}: {err}"),
                dismissible: true,
            }
        } else {
            warn!(what, error = %err, "Update rejected");
            Notice::warning(err.to_string())
        };
        self.notice(notice).await;
    }

    async fn notice(&self, notice: Notice) {
        self.emit(UiEvent::Notice(notice)).await;
    }

    async fn emit(&self, event: UiEvent) {
        emit_event(&self.ui_tx, event).await;
    }
}

/// Stable node id from a packet, falling back to the firmware's `!%08x`
/// rendering of the node number.
fn node_id_for(node_id: Option<&str>, node_num: Option<u32>) -> Option<String> {
    node_id
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| node_num.map(|num| format!("!{num:08x}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use meshchat_radio::{loopback, LoopbackHandle};
    use meshchat_shared::Destination;
    use meshchat_store::{ConversationStore, Database, NodeDirectory};

    use super::*;
    use crate::handle::ReadHandle;
    use crate::state::AppState;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        radio: LoopbackHandle,
        commands: mpsc::Sender<UiCommand>,
        events: mpsc::Receiver<UiEvent>,
        read: ReadHandle,
        router: JoinHandle<RouterExit>,
        dir: TempDir,
    }

    fn local_identity() -> LocalIdentity {
        LocalIdentity {
            node_id: "!me".into(),
            node_num: Some(1),
            long_name: Some("Base".into()),
            short_name: Some("BS".into()),
            hw_model: None,
            mac_address: Some("11:22:33:44:55:66".into()),
        }
    }

    fn test_config(dir: &TempDir) -> ClientConfig {
        let radio_path = dir.path().join("ttyACM0");
        std::fs::write(&radio_path, b"").unwrap();
        ClientConfig {
            radio_path,
            connect_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        }
    }

    fn start_with(dir: TempDir, config: ClientConfig) -> Harness {
        let state = AppState::new(
            NodeDirectory::open(Database::open_in_memory().unwrap()).unwrap(),
            ConversationStore::open(Database::open_in_memory().unwrap()),
        )
        .into_shared();
        start_with_state(dir, config, state)
    }

    fn start_with_state(dir: TempDir, config: ClientConfig, state: SharedState) -> Harness {
        let (connector, radio) = loopback(Some(local_identity()));
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ui_tx, ui_rx) = mpsc::channel(256);

        let router = EventRouter::new(config, connector, state.clone(), cmd_rx, ui_tx);
        Harness {
            radio,
            commands: cmd_tx,
            events: ui_rx,
            read: ReadHandle::new(state),
            router: tokio::spawn(router.run()),
            dir,
        }
    }

    fn start(configure: impl FnOnce(&mut ClientConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        configure(&mut config);
        start_with(dir, config)
    }

    impl Harness {
        /// Skip events until one matches.
        async fn expect<T>(&mut self, mut pick: impl FnMut(UiEvent) -> Option<T>) -> T {
            timeout(WAIT, async {
                loop {
                    let event = self.events.recv().await.expect("router hung up");
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
            })
            .await
            .expect("timed out waiting for UI event")
        }

        async fn expect_state(&mut self, wanted: ConnectionState) {
            self.expect(|e| match e {
                UiEvent::StateChanged(s) if s == wanted => Some(()),
                _ => None,
            })
            .await
        }

        async fn expect_notice(&mut self, level: NoticeLevel) -> Notice {
            self.expect(|e| match e {
                UiEvent::Notice(n) if n.level == level => Some(n),
                _ => None,
            })
            .await
        }

        async fn expect_text(&mut self) -> (ConversationEntry, ConversationKey, bool, String) {
            self.expect(|e| match e {
                UiEvent::TextMessage {
                    entry,
                    key,
                    is_for_selected,
                    rendered,
                } => Some((entry, key, is_for_selected, rendered)),
                _ => None,
            })
            .await
        }

        async fn wait_open(&self) {
            timeout(WAIT, async {
                while !self.radio.is_open() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("radio never opened");
        }

        /// Complete the handshake and consume every event it produces.
        async fn connect(&mut self) {
            self.wait_open().await;
            self.radio.establish().await.unwrap();
            self.expect_state(ConnectionState::Connected).await;
            self.expect_notice(NoticeLevel::Info).await;
        }

        async fn quit(mut self) -> (RouterExit, LoopbackHandle, ReadHandle, TempDir) {
            self.commands.send(UiCommand::Quit).await.unwrap();
            let exit = timeout(WAIT, &mut self.router).await.unwrap().unwrap();
            (exit, self.radio, self.read, self.dir)
        }

        async fn exit(mut self) -> RouterExit {
            timeout(WAIT, &mut self.router).await.unwrap().unwrap()
        }
    }

    fn text_packet(from: &str, to: &str, id: u32, text: &str) -> serde_json::Value {
        json!({
            "fromId": from,
            "toId": to,
            "id": id,
            "rxTime": 1_700_000_000,
            "decoded": { "portnum": "TEXT_MESSAGE_APP", "text": text }
        })
    }

    #[tokio::test]
    async fn test_connect_marks_local_and_syncs_nodes() {
        let mut h = start(|_| {});
        h.radio.set_nodes(vec![
            json!({ "num": 2, "user": { "id": "!abc123", "longName": "Node A" } }).into(),
            json!({ "num": 3, "user": { "id": "!def456", "macaddr": "qrvM3e7/" } }).into(),
            json!({ "num": 4 }).into(),
        ]);
        h.connect().await;

        let nodes = h.read.nodes();
        let ids: Vec<_> = nodes.iter().filter_map(|n| n.node_id.clone()).collect();
        assert_eq!(ids, ["!me", "!abc123", "!def456"]);
        assert!(nodes[0].is_local_radio);
        assert_eq!(
            h.read.node("!def456").unwrap().mac_address.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(h.read.connection_state(), ConnectionState::Connected);

        let (exit, radio, read, _dir) = h.quit().await;
        assert_eq!(exit, RouterExit::Quit);
        assert_eq!(exit.exit_code(), 0);
        assert!(read.local_node().is_none());
        assert_eq!(radio.close_count(), 1);
        assert_eq!(read.connection_state(), ConnectionState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_direct_text_is_recorded_under_sender() {
        let mut h = start(|_| {});
        h.connect().await;
        h.read
            .select_conversation(&ConversationKey::direct("!abc123"))
            .unwrap();

        h.radio
            .packet(text_packet("!abc123", "!def456", 42, "hi"))
            .await
            .unwrap();

        let (entry, key, is_for_selected, rendered) = h.expect_text().await;
        assert_eq!(key, ConversationKey::direct("!abc123"));
        assert!(is_for_selected);
        assert_eq!(entry.sender_node_id, "!abc123");
        assert_eq!(entry.receiver_node_id, "!def456");
        assert_eq!(entry.text, "hi");
        assert_eq!(entry.packet_id, Some(42));
        assert_eq!(entry.received_at.timestamp(), 1_700_000_000);
        assert!(rendered.ends_with("| !abc123 > hi"));

        let log = h
            .read
            .select_conversation(&ConversationKey::direct("!abc123"))
            .unwrap();
        assert_eq!(log, vec![entry]);
        h.quit().await;
    }

    #[tokio::test]
    async fn test_broadcast_text_goes_to_channel() {
        let mut h = start(|_| {});
        h.connect().await;

        h.radio
            .packet(json!({
                "fromId": "!abc123",
                "to": 4_294_967_295u64,
                "channel": 2,
                "decoded": { "portnum": "TEXT_MESSAGE_APP", "text": "hello mesh" }
            }))
            .await
            .unwrap();
        let (entry, key, is_for_selected, _) = h.expect_text().await;
        assert_eq!(key, ConversationKey::channel("2"));
        assert!(!is_for_selected);
        assert_eq!(entry.channel_id.as_deref(), Some("2"));

        h.radio
            .packet(text_packet("!abc123", "^all", 7, "primary"))
            .await
            .unwrap();
        let (_, key, _, _) = h.expect_text().await;
        assert_eq!(key, ConversationKey::channel("0"));
        assert!(h
            .read
            .select_conversation(&ConversationKey::direct("!abc123"))
            .unwrap()
            .is_empty());
        h.quit().await;
    }

    #[tokio::test]
    async fn test_unknown_packet_changes_nothing() {
        let mut h = start(|_| {});
        h.connect().await;
        let before = h.read.nodes();

        h.radio
            .packet(json!({ "decoded": { "portnum": "FOO_APP" } }))
            .await
            .unwrap();
        h.radio
            .packet(json!({ "decoded": { "portnum": "ADMIN_APP" }, "fromId": "!x" }))
            .await
            .unwrap();
        h.radio
            .packet(text_packet("!abc123", "!me", 1, "after"))
            .await
            .unwrap();

        // The next event after the unknown packets is the text.
        let next = timeout(WAIT, h.events.recv()).await.unwrap().unwrap();
        assert!(matches!(next, UiEvent::TextMessage { .. }));
        assert_eq!(h.read.nodes(), before);
        assert_eq!(h.read.conversations().unwrap().len(), 1);
        h.quit().await;
    }

    #[tokio::test]
    async fn test_telemetry_and_position_update_node() {
        let mut h = start(|_| {});
        h.radio.set_nodes(vec![
            json!({ "num": 2, "user": { "id": "!abc123" } }).into(),
            json!({ "num": 2_882_400_001u64, "user": { "id": "!abcdef01" } }).into(),
        ]);
        h.connect().await;

        h.radio
            .packet(json!({
                "fromId": "!abc123",
                "from": 2,
                "decoded": {
                    "portnum": "TELEMETRY_APP",
                    "telemetry": { "deviceMetrics": { "batteryLevel": 77, "voltage": 3.9 } }
                }
            }))
            .await
            .unwrap();
        h.radio
            .packet(json!({
                "from": 2_882_400_001u64,
                "decoded": {
                    "portnum": "POSITION_APP",
                    "position": { "latitudeI": 471_234_567, "longitudeI": 82_345_678, "altitude": 410 }
                }
            }))
            .await
            .unwrap();
        h.expect(|e| match e {
            UiEvent::NodeListChanged(nodes) if nodes.iter().any(|n| n.latitude.is_some()) => Some(()),
            _ => None,
        })
        .await;

        let node = h.read.node("!abc123").unwrap();
        assert_eq!(node.battery_level, Some(77));
        assert_eq!(node.voltage, Some(3.9));

        let positioned = h.read.node("!abcdef01").unwrap();
        assert!((positioned.latitude.unwrap() - 47.1234567).abs() < 1e-9);
        assert!((positioned.longitude.unwrap() - 8.2345678).abs() < 1e-9);
        assert_eq!(positioned.altitude, Some(410));
        h.quit().await;
    }

    #[tokio::test]
    async fn test_metrics_from_unknown_node_are_dropped() {
        let mut h = start(|_| {});
        h.connect().await;
        let before = h.read.nodes();

        h.radio
            .packet(json!({
                "fromId": "!stranger",
                "decoded": {
                    "portnum": "TELEMETRY_APP",
                    "telemetry": { "deviceMetrics": { "batteryLevel": 12 } }
                }
            }))
            .await
            .unwrap();
        h.radio
            .packet(text_packet("!abc123", "!me", 1, "after"))
            .await
            .unwrap();

        let next = timeout(WAIT, h.events.recv()).await.unwrap().unwrap();
        assert!(matches!(next, UiEvent::TextMessage { .. }));
        assert!(h.read.node("!stranger").is_none());
        assert_eq!(h.read.nodes(), before);
        h.quit().await;
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_router_running() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let db_path = dir.path().join("meshchat.db");
        let state = AppState::new(
            NodeDirectory::open(Database::open_at(&db_path).unwrap()).unwrap(),
            ConversationStore::open(Database::open_at(&db_path).unwrap()),
        )
        .into_shared();
        let mut h = start_with_state(dir, config, state);
        h.connect().await;

        Database::open_at(&db_path)
            .unwrap()
            .conn()
            .execute_batch("DROP TABLE conversation_entries;")
            .unwrap();

        h.radio
            .packet(text_packet("!abc123", "!me", 5, "lost"))
            .await
            .unwrap();
        let notice = h.expect_notice(NoticeLevel::Error).await;
        assert!(notice.dismissible);
        assert!(notice.message.starts_with("Could not save message"));
        assert_eq!(h.read.connection_state(), ConnectionState::Connected);

        h.radio
            .node_updated(json!({ "user": { "id": "!later", "longName": "Later" } }))
            .await
            .unwrap();
        h.expect(|e| match e {
            UiEvent::NodeListChanged(nodes)
                if nodes.iter().any(|n| n.node_id.as_deref() == Some("!later")) =>
            {
                Some(())
            }
            _ => None,
        })
        .await;
        assert_eq!(h.read.node("!later").unwrap().long_name.as_deref(), Some("Later"));
        assert_eq!(h.read.connection_state(), ConnectionState::Connected);

        let (exit, ..) = h.quit().await;
        assert_eq!(exit, RouterExit::Quit);
    }

    #[tokio::test]
    async fn test_conflicting_node_update_becomes_notice() {
        let mut h = start(|_| {});
        h.connect().await;

        h.radio
            .node_updated(json!({ "user": { "id": "!node1", "macaddr": "MAC1" } }))
            .await
            .unwrap();
        h.radio
            .node_updated(json!({ "user": { "id": "!node2", "macaddr": "MAC1", "longName": "Thief" } }))
            .await
            .unwrap();

        let notice = h.expect_notice(NoticeLevel::Warning).await;
        assert!(notice.dismissible);
        assert!(notice.message.contains("MAC1"));
        assert!(h.read.node("!node1").is_some());
        assert!(h.read.node("!node2").is_none());
        assert_eq!(h.read.connection_state(), ConnectionState::Connected);
        h.quit().await;
    }

    #[tokio::test]
    async fn test_outbound_direct_and_channel() {
        let mut h = start(|_| {});
        h.connect().await;

        h.commands
            .send(UiCommand::SubmitText {
                body: "  hello there \n".into(),
                target: ConversationKey::direct("!abc123"),
            })
            .await
            .unwrap();
        let (entry, key, _, rendered) = h.expect_text().await;
        assert_eq!(key, ConversationKey::direct("!me"));
        assert_eq!(entry.sender_node_id, "!me");
        assert_eq!(entry.receiver_node_id, "!abc123");
        assert_eq!(entry.text, "hello there");
        assert!(rendered.ends_with("| Base > hello there"));

        h.commands
            .send(UiCommand::SubmitText {
                body: "to everyone".into(),
                target: ConversationKey::channel("0"),
            })
            .await
            .unwrap();
        let (entry, key, _, _) = h.expect_text().await;
        assert_eq!(key, ConversationKey::channel("0"));
        assert_eq!(entry.receiver_node_id, BROADCAST_NODE_ID);

        let sent = h.radio.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, "hello there");
        assert_eq!(sent[0].destination, Destination::Node("!abc123".into()));
        assert_eq!(sent[1].destination, Destination::Channel("0".into()));
        h.quit().await;
    }

    #[tokio::test]
    async fn test_outbound_rejections() {
        let mut h = start(|_| {});
        h.wait_open().await;

        // Radio open but no handshake yet.
        h.commands
            .send(UiCommand::SubmitText {
                body: "early".into(),
                target: ConversationKey::direct("!abc123"),
            })
            .await
            .unwrap();
        let notice = h.expect_notice(NoticeLevel::Warning).await;
        assert!(notice.message.contains("Not connected"));

        h.radio.establish().await.unwrap();
        h.expect_state(ConnectionState::Connected).await;

        h.commands
            .send(UiCommand::SubmitText {
                body: "   ".into(),
                target: ConversationKey::direct("!abc123"),
            })
            .await
            .unwrap();
        let notice = h.expect_notice(NoticeLevel::Warning).await;
        assert_eq!(notice.message, "Message is empty");

        h.radio.fail_sends(true);
        h.commands
            .send(UiCommand::SubmitText {
                body: "lost".into(),
                target: ConversationKey::direct("!abc123"),
            })
            .await
            .unwrap();
        let notice = h.expect_notice(NoticeLevel::Warning).await;
        assert!(notice.message.starts_with("Message not sent"));

        assert!(h.radio.sent().is_empty());
        assert!(h.read.conversations().unwrap().is_empty());
        h.quit().await;
    }

    #[tokio::test]
    async fn test_disconnect_halts_by_default() {
        let mut h = start(|_| {});
        h.connect().await;
        assert!(h.read.local_node().is_some());

        h.radio.disconnect().await.unwrap();
        h.expect_state(ConnectionState::Disconnected).await;
        let notice = h.expect_notice(NoticeLevel::Error).await;
        assert_eq!(notice.message, "Radio disconnected");

        let read = h.read.clone();
        let exit = h.exit().await;
        assert_eq!(exit, RouterExit::RadioDisconnected);
        assert_eq!(exit.exit_code(), 3);
        assert!(read.local_node().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_restarts_cycle() {
        let mut h = start(|c| c.reconnect = true);
        h.connect().await;

        h.radio.disconnect().await.unwrap();
        h.expect_state(ConnectionState::Disconnected).await;
        assert!(h.read.local_node().is_none());
        h.expect_state(ConnectionState::Connecting).await;

        h.connect().await;
        assert_eq!(h.radio.connections().len(), 2);
        assert_eq!(h.read.local_node().unwrap().node_id.as_deref(), Some("!me"));

        let (exit, radio, _, _) = h.quit().await;
        assert_eq!(exit, RouterExit::Quit);
        // Once for the lost link, once on quit.
        assert_eq!(radio.close_count(), 2);
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_local_flag() {
        let mut h = start(|c| {
            c.reconnect = true;
            c.local_flag_policy = LocalFlagPolicy::RetainAcrossReconnect;
        });
        h.connect().await;

        h.radio.disconnect().await.unwrap();
        h.expect_state(ConnectionState::Disconnected).await;
        assert_eq!(h.read.local_node().unwrap().node_id.as_deref(), Some("!me"));

        let (_, _, read, _) = h.quit().await;
        assert!(read.local_node().is_none());
    }

    #[tokio::test]
    async fn test_radio_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            radio_path: dir.path().join("ttyACM9"),
            connect_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        };
        let mut h = start_with(dir, config);

        let notice = h.expect_notice(NoticeLevel::Error).await;
        assert!(!notice.dismissible);
        assert!(notice.message.contains("ttyACM9"));
        let exit = h.exit().await;
        assert_eq!(exit, RouterExit::RadioNotFound);
        assert_eq!(exit.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_quit_cancels_radio_wait() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            radio_path: dir.path().join("ttyACM9"),
            connect_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        };
        let mut h = start_with(dir, config);
        h.expect_state(ConnectionState::Connecting).await;

        let (exit, radio, _, _) = h.quit().await;
        assert_eq!(exit, RouterExit::Quit);
        assert!(radio.connections().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_window_drops_repeats() {
        let mut h = start(|c| c.dedup_window = 16);
        h.connect().await;

        for _ in 0..2 {
            h.radio
                .packet(text_packet("!abc123", "!me", 99, "once"))
                .await
                .unwrap();
        }
        h.radio
            .packet(text_packet("!abc123", "!me", 100, "twice"))
            .await
            .unwrap();

        let (first, _, _, _) = h.expect_text().await;
        let (second, _, _, _) = h.expect_text().await;
        assert_eq!(first.text, "once");
        assert_eq!(second.text, "twice");
        h.quit().await;
    }

    #[tokio::test]
    async fn test_quit_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        let snapshot = dir.path().join("log.json");
        config.snapshot_path = Some(snapshot.clone());
        let mut h = start_with(dir, config);
        h.connect().await;

        h.radio
            .packet(text_packet("!abc123", "!me", 5, "keep me"))
            .await
            .unwrap();
        h.expect_text().await;

        let (_, _, _, _dir) = h.quit().await;
        let log = meshchat_store::ConversationLog::load(&snapshot).unwrap();
        assert_eq!(log.dms["!abc123"][0].text, "keep me");
    }

    #[test]
    fn test_node_id_fallback() {
        assert_eq!(node_id_for(Some("!abc"), Some(1)).as_deref(), Some("!abc"));
        assert_eq!(node_id_for(Some(""), Some(0xabcdef01)).as_deref(), Some("!abcdef01"));
        assert_eq!(node_id_for(None, None), None);
    }
}
