//! UseCase: ルームのライフサイクルとブロードキャスト
//!
//! ## 責務
//!
//! - ルームの作成・削除・オンデマンド作成（`ensure_room`）
//! - ルーム内へのファンアウト送信と stale コネクションの除去
//! - ロビー購読者へのルーム一覧配信
//! - 空になったルームの遅延削除
//!
//! ## ロックの順序
//!
//! マネージャーの状態ロック → ルームのロック、の順でのみ取得します。
//! 送信中とタイマー待機中はどちらのロックも保持しません。

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures_util::future::join_all;
use heya_shared::time::{Clock, SystemClock};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    config::{DeletionPolicy, RoomConfig},
    domain::{Connection, ConnectionId, ErrorCode, Room},
    infrastructure::dto::websocket::{RoomsMessage, StatusMessage, UsersMessage, encode},
};

/// ルームマネージャー
///
/// `Arc` で共有された状態へのハンドルなので、`clone` して各ハンドラに渡せます。
#[derive(Clone)]
pub struct RoomManager {
    inner: Arc<Inner>,
}

struct Inner {
    lobby_id: String,
    deletion_delay: Duration,
    deletion_policy: DeletionPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

struct State {
    rooms: HashMap<String, Arc<Room>>,
    /// ルーム一覧を購読しているコネクション
    lobby_clients: HashMap<ConnectionId, Arc<dyn Connection>>,
    /// ルームごとの保留中の遅延削除（ロビーは含まない）
    deletion_timers: HashMap<String, JoinHandle<()>>,
}

impl RoomManager {
    /// 新しい RoomManager を作成（ロビーのみが存在する状態）
    pub fn new(config: RoomConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// 時計を差し替えて RoomManager を作成
    pub fn with_clock(config: RoomConfig, clock: Arc<dyn Clock>) -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(config.lobby_id.clone(), Arc::new(Room::new()));

        Self {
            inner: Arc::new(Inner {
                lobby_id: config.lobby_id,
                deletion_delay: config.deletion_delay,
                deletion_policy: config.deletion_policy,
                clock,
                state: Mutex::new(State {
                    rooms,
                    lobby_clients: HashMap::new(),
                    deletion_timers: HashMap::new(),
                }),
            }),
        }
    }

    pub fn lobby_id(&self) -> &str {
        &self.inner.lobby_id
    }

    pub fn is_lobby(&self, room_id: &str) -> bool {
        room_id == self.inner.lobby_id
    }

    // ========================================
    // ルームのライフサイクル
    // ========================================

    /// ルームが存在するか
    pub async fn exists(&self, room_id: &str) -> bool {
        self.inner.state.lock().await.rooms.contains_key(room_id)
    }

    /// ルーム作成リクエストを検証
    ///
    /// 優先順位: 空 → `BadRoom`、ロビー → `Reserved`、既存 → `RoomExists`。
    pub async fn create_error(&self, room_id: &str) -> Option<ErrorCode> {
        if room_id.is_empty() {
            return Some(ErrorCode::BadRoom);
        }
        if self.is_lobby(room_id) {
            return Some(ErrorCode::Reserved);
        }
        if self.exists(room_id).await {
            return Some(ErrorCode::RoomExists);
        }
        None
    }

    /// 空のルームを作成
    ///
    /// ロビー ID または既存のルームの場合は何もせず `false` を返します。
    /// ID の形式は検証しません（`create_error` を先に呼ぶこと）。
    pub async fn create(&self, room_id: &str) -> bool {
        if self.is_lobby(room_id) {
            return false;
        }
        let mut state = self.inner.state.lock().await;
        if state.rooms.contains_key(room_id) {
            return false;
        }
        state
            .rooms
            .insert(room_id.to_string(), Arc::new(Room::new()));
        tracing::info!("Room '{}' created", room_id);
        true
    }

    /// ルームを削除（ロビーは削除しない）
    ///
    /// 参加者の有無は確認しません。保留中の遅延削除があれば中止します。
    pub async fn delete(&self, room_id: &str) {
        let mut state = self.inner.state.lock().await;
        self.delete_locked(&mut state, room_id);
    }

    fn delete_locked(&self, state: &mut State, room_id: &str) {
        if self.is_lobby(room_id) {
            return;
        }
        if let Some(timer) = state.deletion_timers.remove(room_id) {
            timer.abort();
        }
        if state.rooms.remove(room_id).is_some() {
            tracing::info!("Room '{}' deleted", room_id);
        }
    }

    /// ルームを取得（なければ作成）
    ///
    /// 新しく作成した場合はロビー購読者にルーム一覧を配信します。
    pub async fn ensure_room(&self, room_id: &str) -> Arc<Room> {
        let room = {
            let mut state = self.inner.state.lock().await;
            if let Some(room) = state.rooms.get(room_id) {
                return room.clone();
            }

            let room = Arc::new(Room::new());
            state.rooms.insert(room_id.to_string(), room.clone());
            if self.is_lobby(room_id) {
                tracing::warn!("Lobby '{}' was missing and has been re-created", room_id);
                return room;
            }
            tracing::info!("Room '{}' created on demand", room_id);
            room
        };

        self.broadcast_rooms().await;
        room
    }

    /// ルームを取得（作成はしない）
    pub async fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.inner.state.lock().await.rooms.get(room_id).cloned()
    }

    /// ロビー以外のルーム ID 一覧（ソート済み）
    pub async fn list_rooms(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        self.sorted_room_ids(&state)
    }

    fn sorted_room_ids(&self, state: &State) -> Vec<String> {
        let mut ids: Vec<String> = state
            .rooms
            .keys()
            .filter(|id| !self.is_lobby(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// 遅延削除が保留中か
    pub async fn has_pending_deletion(&self, room_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .await
            .deletion_timers
            .contains_key(room_id)
    }

    // ========================================
    // 参加・退出
    // ========================================

    /// ルーム一覧の配信対象に追加
    pub async fn subscribe_lobby(&self, connection: Arc<dyn Connection>) {
        let id = connection.id();
        self.inner
            .state
            .lock()
            .await
            .lobby_clients
            .insert(id, connection);
        tracing::debug!("Connection '{}' subscribed to the room directory", id);
    }

    /// ルーム一覧の配信対象から削除
    pub async fn unsubscribe_lobby(&self, connection_id: &ConnectionId) {
        if self
            .inner
            .state
            .lock()
            .await
            .lobby_clients
            .remove(connection_id)
            .is_some()
        {
            tracing::debug!(
                "Connection '{}' unsubscribed from the room directory",
                connection_id
            );
        }
    }

    /// ルーム一覧の購読者数
    pub async fn lobby_subscriber_count(&self) -> usize {
        self.inner.state.lock().await.lobby_clients.len()
    }

    /// 参加者の退出
    ///
    /// ルームから削除して残りの参加者に退出を通知します。参加者が残っていれば
    /// 参加者一覧とルーム一覧も再配信します。誰も残っていない場合、通知の
    /// ブロードキャストが空ルームとして遅延削除を予約します。
    pub async fn user_left(&self, room_id: &str, connection_id: &ConnectionId, username: &str) {
        let Some(room) = self.room(room_id).await else {
            return;
        };
        room.remove(connection_id).await;

        self.announce_status(room_id, &format!("{username} left"), None)
            .await;
        if !room.is_empty().await {
            self.announce_users(room_id).await;
            self.broadcast_rooms().await;
        }
    }

    // ========================================
    // ペイロード
    // ========================================

    /// 参加者一覧のペイロード（ルームがなければ空の一覧）
    pub async fn users_payload(&self, room_id: &str) -> Result<String, serde_json::Error> {
        let names = match self.room(room_id).await {
            Some(room) => room.usernames().await,
            None => Vec::new(),
        };
        encode(&UsersMessage::new(names))
    }

    /// タイムスタンプ付きステータス行のペイロード
    pub fn status(&self, text: &str) -> Result<String, serde_json::Error> {
        encode(&StatusMessage::new(
            text.to_string(),
            self.inner.clock.now_utc_millis(),
        ))
    }

    /// ルーム一覧のペイロード
    pub async fn rooms_payload(&self) -> Result<String, serde_json::Error> {
        encode(&RoomsMessage::new(self.list_rooms().await))
    }

    /// 参加者一覧をルームに配信
    pub async fn announce_users(&self, room_id: &str) {
        match self.users_payload(room_id).await {
            Ok(payload) => self.broadcast_room(room_id, &payload, None).await,
            Err(e) => tracing::warn!("Failed to encode users payload for '{}': {}", room_id, e),
        }
    }

    /// ステータス行をルームに配信（`exclude` には送らない）
    pub async fn announce_status(&self, room_id: &str, text: &str, exclude: Option<ConnectionId>) {
        match self.status(text) {
            Ok(payload) => self.broadcast_room(room_id, &payload, exclude).await,
            Err(e) => tracing::warn!("Failed to encode status payload for '{}': {}", room_id, e),
        }
    }

    // ========================================
    // ブロードキャスト
    // ========================================

    /// ロビー購読者にルーム一覧を配信し、送信に失敗した購読者を除去
    pub async fn broadcast_rooms(&self) {
        let (targets, payload) = {
            let state = self.inner.state.lock().await;
            let payload = encode(&RoomsMessage::new(self.sorted_room_ids(&state)));
            let targets: Vec<Arc<dyn Connection>> =
                state.lobby_clients.values().cloned().collect();
            (targets, payload)
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode rooms payload: {}", e);
                return;
            }
        };

        let stale = Self::send_multi(targets, &payload).await;
        if stale.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock().await;
        for connection in &stale {
            state.lobby_clients.remove(&connection.id());
        }
        tracing::debug!(
            "Dropped {} stale lobby subscriber(s), {} remaining",
            stale.len(),
            state.lobby_clients.len()
        );
    }

    /// ルームの参加者（`exclude` 以外）にメッセージを配信
    ///
    /// 送信に失敗したコネクションはルームから除去されます。その結果ルームが空に
    /// なり、ロビーではなく、遅延削除が未予約であれば遅延削除を予約します。
    pub async fn broadcast_room(
        &self,
        room_id: &str,
        message: &str,
        exclude: Option<ConnectionId>,
    ) {
        let Some(room) = self.room(room_id).await else {
            return;
        };

        let targets = room.connections_except(exclude).await;
        let stale = Self::send_multi(targets, message).await;
        let stale_ids: Vec<ConnectionId> = stale.iter().map(|c| c.id()).collect();
        let remaining = room.remove_all(&stale_ids).await;
        if !stale_ids.is_empty() {
            tracing::debug!(
                "Pruned {} stale connection(s) from '{}', {} remaining",
                stale_ids.len(),
                room_id,
                remaining
            );
        }

        if remaining > 0 || self.is_lobby(room_id) {
            return;
        }

        let mut state = self.inner.state.lock().await;
        let still_registered = state
            .rooms
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current, &room));
        if still_registered
            && !state.deletion_timers.contains_key(room_id)
            && room.is_empty().await
        {
            self.schedule_deletion(&mut state, room_id);
        }
    }

    /// 1 つのコネクションに送信
    ///
    /// 失敗した場合はコネクションを閉じ（閉じる際の失敗は無視）、`false` を返します。
    pub async fn safe_send_text(connection: &dyn Connection, message: &str) -> bool {
        match connection.send_text(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Send to connection '{}' failed: {}", connection.id(), e);
                if let Err(e) = connection.close().await {
                    tracing::debug!("Close of connection '{}' failed: {}", connection.id(), e);
                }
                false
            }
        }
    }

    /// 複数のコネクションに並行して送信し、失敗したコネクションを返す
    pub async fn send_multi(
        targets: Vec<Arc<dyn Connection>>,
        message: &str,
    ) -> Vec<Arc<dyn Connection>> {
        if targets.is_empty() {
            return Vec::new();
        }

        let results = join_all(
            targets
                .iter()
                .map(|connection| Self::safe_send_text(connection.as_ref(), message)),
        )
        .await;

        targets
            .into_iter()
            .zip(results)
            .filter_map(|(connection, delivered)| (!delivered).then_some(connection))
            .collect()
    }

    // ========================================
    // 遅延削除
    // ========================================

    fn schedule_deletion(&self, state: &mut State, room_id: &str) {
        let manager = self.clone();
        let id = room_id.to_string();
        let delay = self.inner.deletion_delay;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.expire_room(&id).await;
        });
        state.deletion_timers.insert(room_id.to_string(), timer);
        tracing::info!(
            "Room '{}' is empty, scheduled deletion in {:?}",
            room_id,
            delay
        );
    }

    async fn expire_room(&self, room_id: &str) {
        {
            let mut state = self.inner.state.lock().await;
            state.deletion_timers.remove(room_id);

            if self.inner.deletion_policy == DeletionPolicy::RecheckOccupancy
                && let Some(room) = state.rooms.get(room_id).cloned()
                && !room.is_empty().await
            {
                tracing::info!(
                    "Room '{}' was repopulated, keeping it (deletion skipped)",
                    room_id
                );
                return;
            }

            self.delete_locked(&mut state, room_id);
        }

        self.broadcast_rooms().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ConnectionError, MockConnection},
        infrastructure::connection::{Outbound, WebSocketConnection},
    };
    use async_trait::async_trait;
    use heya_shared::time::FixedClock;
    use tokio::sync::{Barrier, mpsc};

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - ルームの作成・削除・一覧（create_error の優先順位を含む）
    // - broadcast_room / broadcast_rooms による stale コネクションの除去
    // - 空ルームの遅延削除（保留中タイマーは 1 つだけ）
    //
    // 【なぜこのテストが必要か】
    // - 1 つの壊れたコネクションが他の参加者への配信を妨げないことを保証する
    // - ロビーのルーム一覧が実際のルームと一致し続けることを保証する
    //
    // 【どのようなシナリオをテストするか】
    // 1. 2 人のうち 1 人が切断済みのルームへのブロードキャスト
    // 2. 最後の参加者が退出した後の遅延削除
    // 3. 遅延削除の保留中に再入室した場合（削除ポリシーごと）
    // ========================================

    const DELAY: Duration = Duration::from_secs(5);

    fn create_test_manager(policy: DeletionPolicy) -> RoomManager {
        RoomManager::with_clock(
            RoomConfig {
                lobby_id: "lobby".to_string(),
                deletion_delay: DELAY,
                deletion_policy: policy,
            },
            Arc::new(FixedClock::new(1_700_000_000_000)),
        )
    }

    fn create_test_connection() -> (Arc<dyn Connection>, mpsc::Receiver<Outbound>) {
        let (connection, rx) = WebSocketConnection::channel();
        (Arc::new(connection), rx)
    }

    fn failing_connection() -> (Arc<dyn Connection>, ConnectionId) {
        let id = ConnectionId::generate();
        let mut mock = MockConnection::new();
        mock.expect_id().return_const(id);
        mock.expect_send_text()
            .returning(|_| Err(ConnectionError::SendFailed("broken pipe".to_string())));
        mock.expect_close()
            .returning(|| Err(ConnectionError::CloseFailed("already closed".to_string())));
        (Arc::new(mock), id)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Text(text) = outbound {
                messages.push(serde_json::from_str(&text).unwrap());
            }
        }
        messages
    }

    fn of_type<'a>(messages: &'a [serde_json::Value], kind: &str) -> Vec<&'a serde_json::Value> {
        messages.iter().filter(|m| m["type"] == kind).collect()
    }

    #[tokio::test]
    async fn test_create_error_precedence() {
        // テスト項目: create_error が 空 → reserved → room_exists の順で判定する
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        assert!(manager.create("abc").await);

        // when (操作) / then (期待する結果):
        assert_eq!(manager.create_error("").await, Some(ErrorCode::BadRoom));
        assert_eq!(manager.create_error("lobby").await, Some(ErrorCode::Reserved));
        assert_eq!(manager.create_error("abc").await, Some(ErrorCode::RoomExists));
        assert_eq!(manager.create_error("xyz").await, None);
    }

    #[tokio::test]
    async fn test_create_lobby_fails_and_novel_room_succeeds() {
        // テスト項目: ロビーは作成できず、新しいルームは作成直後から存在する
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);

        // when (操作):
        let lobby = manager.create("lobby").await;
        let novel = manager.create("abc").await;
        let duplicate = manager.create("abc").await;

        // then (期待する結果):
        assert!(!lobby);
        assert!(novel);
        assert!(!duplicate);
        assert!(manager.exists("abc").await);
        assert!(manager.exists("lobby").await);
    }

    #[tokio::test]
    async fn test_delete_never_removes_lobby() {
        // テスト項目: ロビーは削除できず、通常のルームは参加者がいても削除される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (alice, _rx) = create_test_connection();
        room.insert(alice, "alice".to_string()).await;

        // when (操作):
        manager.delete("lobby").await;
        manager.delete("abc").await;

        // then (期待する結果):
        assert!(manager.exists("lobby").await);
        assert!(!manager.exists("abc").await);
    }

    #[tokio::test]
    async fn test_list_rooms_sorted_without_lobby() {
        // テスト項目: ルーム一覧はロビーを除きソートされる
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        manager.create("b").await;
        manager.create("a").await;

        // when (操作):
        let rooms = manager.list_rooms().await;

        // then (期待する結果):
        assert_eq!(rooms, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_ensure_room_is_idempotent() {
        // テスト項目: ensure_room を 2 回呼んでも同じルームが返り、一覧配信は 1 回だけ
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let (watcher, mut watcher_rx) = create_test_connection();
        manager.subscribe_lobby(watcher).await;

        // when (操作):
        let first = manager.ensure_room("abc").await;
        let second = manager.ensure_room("abc").await;

        // then (期待する結果):
        assert!(Arc::ptr_eq(&first, &second));
        let messages = drain(&mut watcher_rx);
        let rooms = of_type(&messages, "rooms");
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["list"], serde_json::json!(["abc"]));
    }

    #[tokio::test]
    async fn test_ensure_room_recreates_missing_lobby_without_broadcast() {
        // テスト項目: ロビーが欠けていても ensure_room で再作成され、一覧は配信されない
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let (watcher, mut watcher_rx) = create_test_connection();
        manager.subscribe_lobby(watcher).await;
        manager.inner.state.lock().await.rooms.remove("lobby");

        // when (操作):
        manager.ensure_room("lobby").await;

        // then (期待する結果):
        assert!(manager.exists("lobby").await);
        assert!(drain(&mut watcher_rx).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_room_prunes_closed_connection() {
        // テスト項目: 切断済みのコネクションは除去され、生きているコネクションには届く
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (alice, mut alice_rx) = create_test_connection();
        let (bob, bob_rx) = create_test_connection();
        let alice_id = alice.id();
        room.insert(alice, "alice".to_string()).await;
        room.insert(bob, "bob".to_string()).await;
        drop(bob_rx);

        // when (操作):
        let status = manager.status("hello").unwrap();
        manager.broadcast_room("abc", &status, None).await;

        // then (期待する結果):
        let messages = drain(&mut alice_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "hello");
        assert_eq!(room.len().await, 1);
        assert!(room.contains(&alice_id).await);
        assert!(!manager.has_pending_deletion("abc").await);
    }

    #[tokio::test]
    async fn test_broadcast_room_failure_does_not_block_siblings() {
        // テスト項目: 送信も切断も失敗するコネクションがあっても他の参加者に届く
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (broken, broken_id) = failing_connection();
        let (alice, mut alice_rx) = create_test_connection();
        let (bob, mut bob_rx) = create_test_connection();
        room.insert(broken, "ghost".to_string()).await;
        room.insert(alice, "alice".to_string()).await;
        room.insert(bob, "bob".to_string()).await;

        // when (操作):
        manager.announce_users("abc").await;

        // then (期待する結果):
        assert_eq!(drain(&mut alice_rx).len(), 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert!(!room.contains(&broken_id).await);
        assert_eq!(room.usernames().await, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_broadcast_room_excludes_sender() {
        // テスト項目: exclude に指定したコネクションには送信されない
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (alice, mut alice_rx) = create_test_connection();
        let (bob, mut bob_rx) = create_test_connection();
        let alice_id = alice.id();
        room.insert(alice, "alice".to_string()).await;
        room.insert(bob, "bob".to_string()).await;

        // when (操作):
        manager
            .announce_status("abc", "alice joined", Some(alice_id))
            .await;

        // then (期待する結果):
        assert!(drain(&mut alice_rx).is_empty());
        let messages = drain(&mut bob_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "alice joined");
        assert_eq!(messages[0]["ts"], 1_700_000_000_000_i64);
    }

    #[tokio::test]
    async fn test_broadcast_rooms_drops_stale_subscribers() {
        // テスト項目: ルーム一覧の配信に失敗した購読者は購読者集合から除去される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let (alive, mut alive_rx) = create_test_connection();
        let (dead, dead_rx) = create_test_connection();
        manager.subscribe_lobby(alive).await;
        manager.subscribe_lobby(dead).await;
        drop(dead_rx);
        manager.create("abc").await;

        // when (操作):
        manager.broadcast_rooms().await;

        // then (期待する結果):
        assert_eq!(manager.lobby_subscriber_count().await, 1);
        let messages = drain(&mut alive_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["list"], serde_json::json!(["abc"]));
    }

    #[tokio::test]
    async fn test_safe_send_text_swallows_close_failure() {
        // テスト項目: 送信失敗時に close を試み、close の失敗は無視して false を返す
        // given (前提条件):
        let id = ConnectionId::generate();
        let mut mock = MockConnection::new();
        mock.expect_id().return_const(id);
        mock.expect_send_text()
            .times(1)
            .returning(|_| Err(ConnectionError::SendFailed("reset".to_string())));
        mock.expect_close()
            .times(1)
            .returning(|| Err(ConnectionError::CloseFailed("reset".to_string())));

        // when (操作):
        let delivered = RoomManager::safe_send_text(&mock, "hello").await;

        // then (期待する結果):
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_safe_send_text_success_does_not_close() {
        // テスト項目: 送信に成功した場合は close を呼ばずに true を返す
        // given (前提条件):
        let mut mock = MockConnection::new();
        mock.expect_send_text()
            .withf(|text: &str| text == "hello")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_close().times(0);

        // when (操作):
        let delivered = RoomManager::safe_send_text(&mock, "hello").await;

        // then (期待する結果):
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_send_multi_returns_exactly_failed_connections() {
        // テスト項目: send_multi は失敗したコネクションだけを返す
        // given (前提条件):
        let (alice, mut alice_rx) = create_test_connection();
        let (broken, broken_id) = failing_connection();
        let (bob, bob_rx) = create_test_connection();
        let bob_id = bob.id();
        drop(bob_rx);

        // when (操作):
        let stale = RoomManager::send_multi(vec![alice, broken, bob], "ping").await;

        // then (期待する結果):
        let mut stale_ids: Vec<ConnectionId> = stale.iter().map(|c| c.id()).collect();
        stale_ids.sort();
        let mut expected = vec![broken_id, bob_id];
        expected.sort();
        assert_eq!(stale_ids, expected);
        assert_eq!(
            alice_rx.try_recv().ok(),
            Some(Outbound::Text("ping".to_string()))
        );
    }

    #[tokio::test]
    async fn test_send_multi_empty_targets() {
        // テスト項目: 空のターゲットでもエラーにならない
        // given (前提条件):

        // when (操作):
        let stale = RoomManager::send_multi(Vec::new(), "ping").await;

        // then (期待する結果):
        assert!(stale.is_empty());
    }

    /// バリアで待ち合わせてから送信を完了するコネクション
    struct RendezvousConnection {
        id: ConnectionId,
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl Connection for RendezvousConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send_text(&self, _text: &str) -> Result<(), ConnectionError> {
            self.barrier.wait().await;
            Ok(())
        }

        async fn close(&self) -> Result<(), ConnectionError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_multi_issues_all_sends_before_any_completes() {
        // テスト項目: 全員が send_text に入るまで完了しない送信でも send_multi が終わる（並行送信）
        // given (前提条件):
        let barrier = Arc::new(Barrier::new(3));
        let targets: Vec<Arc<dyn Connection>> = (0..3)
            .map(|_| {
                Arc::new(RendezvousConnection {
                    id: ConnectionId::generate(),
                    barrier: barrier.clone(),
                }) as Arc<dyn Connection>
            })
            .collect();

        // when (操作):
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            RoomManager::send_multi(targets, "ping"),
        )
        .await;

        // then (期待する結果):
        let stale = result.expect("sends were not issued concurrently");
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_room_prunes_backpressured_connection() {
        // テスト項目: 送信キューが読み出されず満杯になったコネクションはルームから除去される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (alice, mut alice_rx) = create_test_connection();
        let (slow, _slow_rx) = WebSocketConnection::with_capacity(2);
        let slow: Arc<dyn Connection> = Arc::new(slow);
        let slow_id = slow.id();
        room.insert(alice, "alice".to_string()).await;
        room.insert(slow, "slow".to_string()).await;

        // when (操作):
        for _ in 0..3 {
            manager.broadcast_room("abc", "x", None).await;
        }

        // then (期待する結果):
        assert!(!room.contains(&slow_id).await);
        assert_eq!(room.usernames().await, vec!["alice"]);
        let mut delivered = 0;
        while alice_rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_create_error_uses_configured_lobby_id() {
        // テスト項目: reserved になるのは設定したロビー ID だけ
        // given (前提条件):
        let manager = RoomManager::new(RoomConfig {
            lobby_id: "hall".to_string(),
            ..RoomConfig::default()
        });

        // when (操作) / then (期待する結果):
        assert_eq!(manager.create_error("hall").await, Some(ErrorCode::Reserved));
        assert_eq!(manager.create_error("lobby").await, None);
        assert!(manager.exists("hall").await);
        assert!(!manager.create("hall").await);
        assert!(manager.create("lobby").await);
        assert_eq!(manager.list_rooms().await, vec!["lobby"]);
    }

    #[tokio::test]
    async fn test_user_left_announces_to_remaining_occupants() {
        // テスト項目: 退出すると残りの参加者に退出通知と参加者一覧が届き、ロビーに一覧が配信される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let (watcher, mut watcher_rx) = create_test_connection();
        manager.subscribe_lobby(watcher).await;
        let room = manager.ensure_room("abc").await;
        let (alice, _alice_rx) = create_test_connection();
        let (bob, mut bob_rx) = create_test_connection();
        let alice_id = alice.id();
        room.insert(alice, "alice".to_string()).await;
        room.insert(bob, "bob".to_string()).await;
        drain(&mut watcher_rx);

        // when (操作):
        manager.user_left("abc", &alice_id, "alice").await;

        // then (期待する結果):
        let messages = drain(&mut bob_rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "status");
        assert_eq!(messages[0]["text"], "alice left");
        assert_eq!(messages[1]["type"], "users");
        assert_eq!(messages[1]["list"], serde_json::json!(["bob"]));
        assert_eq!(of_type(&drain(&mut watcher_rx), "rooms").len(), 1);
    }

    #[tokio::test]
    async fn test_user_left_unknown_connection_is_harmless() {
        // テスト項目: ルームにいないコネクションの退出でも例外にならず、参加者は残る
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        let (alice, mut alice_rx) = create_test_connection();
        room.insert(alice, "alice".to_string()).await;

        // when (操作):
        manager
            .user_left("abc", &ConnectionId::generate(), "ghost")
            .await;
        manager
            .user_left("missing", &ConnectionId::generate(), "ghost")
            .await;

        // then (期待する結果):
        assert_eq!(room.len().await, 1);
        assert!(!manager.exists("missing").await);
        let messages = drain(&mut alice_rx);
        assert_eq!(of_type(&messages, "users").len(), 1);
    }

    #[tokio::test]
    async fn test_users_payload_for_missing_room_is_empty() {
        // テスト項目: 存在しないルームの参加者一覧は空
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);

        // when (操作):
        let payload = manager.users_payload("missing").await.unwrap();

        // then (期待する結果):
        assert_eq!(payload, r#"{"type":"users","list":[]}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_deleted_after_delay() {
        // テスト項目: 最後の参加者が退出すると、遅延時間後にルームが削除され一覧から消える
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let (watcher, mut watcher_rx) = create_test_connection();
        manager.subscribe_lobby(watcher).await;
        let room = manager.ensure_room("abc").await;
        let (alice, _alice_rx) = create_test_connection();
        let alice_id = alice.id();
        room.insert(alice, "alice".to_string()).await;

        // when (操作):
        manager.user_left("abc", &alice_id, "alice").await;

        // then (期待する結果):
        assert!(manager.has_pending_deletion("abc").await);
        assert!(manager.exists("abc").await);

        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;

        assert!(!manager.exists("abc").await);
        assert!(!manager.has_pending_deletion("abc").await);
        let messages = drain(&mut watcher_rx);
        let rooms = of_type(&messages, "rooms");
        assert_eq!(rooms.last().unwrap()["list"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_deletion_timer_per_room() {
        // テスト項目: 空のルームに繰り返しブロードキャストしてもタイマーは 1 つだけ
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        manager.create("abc").await;

        // when (操作):
        manager.broadcast_room("abc", "x", None).await;
        tokio::time::sleep(DELAY / 2).await;
        manager.broadcast_room("abc", "x", None).await;

        // then (期待する結果): 最初のタイマーの時刻で削除される
        assert_eq!(manager.inner.state.lock().await.deletion_timers.len(), 1);
        tokio::time::sleep(DELAY / 2 + Duration::from_millis(1)).await;
        assert!(!manager.exists("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_never_scheduled_for_deletion() {
        // テスト項目: 空のロビーにブロードキャストしても遅延削除は予約されない
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);

        // when (操作):
        manager.broadcast_room("lobby", "x", None).await;
        tokio::time::sleep(DELAY * 2).await;

        // then (期待する結果):
        assert!(!manager.has_pending_deletion("lobby").await);
        assert!(manager.exists("lobby").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_delete_cancels_pending_timer() {
        // テスト項目: 明示的な削除で保留中の遅延削除が中止される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        manager.create("abc").await;
        manager.broadcast_room("abc", "x", None).await;
        assert!(manager.has_pending_deletion("abc").await);

        // when (操作):
        manager.delete("abc").await;

        // then (期待する結果):
        assert!(!manager.has_pending_deletion("abc").await);
        assert!(!manager.exists("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconditional_policy_deletes_repopulated_room() {
        // テスト項目: 無条件削除ポリシーでは、再入室があってもタイマーでルームが削除される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::Unconditional);
        let room = manager.ensure_room("abc").await;
        manager.broadcast_room("abc", "x", None).await;
        let (bob, _bob_rx) = create_test_connection();
        room.insert(bob, "bob".to_string()).await;

        // when (操作):
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;

        // then (期待する結果):
        assert!(!manager.exists("abc").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_policy_keeps_repopulated_room() {
        // テスト項目: 再確認ポリシーでは再入室したルームは残り、再び空になると新しいタイマーが予約される
        // given (前提条件):
        let manager = create_test_manager(DeletionPolicy::RecheckOccupancy);
        let room = manager.ensure_room("abc").await;
        manager.broadcast_room("abc", "x", None).await;
        let (bob, _bob_rx) = create_test_connection();
        let bob_id = bob.id();
        room.insert(bob, "bob".to_string()).await;

        // when (操作):
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;

        // then (期待する結果):
        assert!(manager.exists("abc").await);
        assert!(!manager.has_pending_deletion("abc").await);

        manager.user_left("abc", &bob_id, "bob").await;
        assert!(manager.has_pending_deletion("abc").await);
        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        assert!(!manager.exists("abc").await);
    }
}
