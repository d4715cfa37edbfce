//! Room エンティティ
//!
//! 1 つのルームに参加しているコネクションと表示名の対応を保持します。
//! ポリシー（削除・ブロードキャスト）は持たず、`RoomManager` が扱います。

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use super::{Connection, ConnectionId};

/// ルームの参加者
#[derive(Clone)]
pub struct Member {
    pub connection: Arc<dyn Connection>,
    pub username: String,
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("connection", &self.connection.id())
            .field("username", &self.username)
            .finish()
    }
}

/// チャットルーム
///
/// `RoomManager::ensure_room` が返す `Arc<Room>` に対して、ゲートウェイが
/// 直接 `insert` することで参加を表現します。
#[derive(Debug, Default)]
pub struct Room {
    connections: Mutex<HashMap<ConnectionId, Member>>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// コネクションを表示名付きで登録
    ///
    /// 同じコネクションが既に登録されていれば表示名を上書きします。
    pub async fn insert(&self, connection: Arc<dyn Connection>, username: String) {
        let id = connection.id();
        self.connections.lock().await.insert(
            id,
            Member {
                connection,
                username,
            },
        );
    }

    /// コネクションを削除（存在しなければ何もしない）
    pub async fn remove(&self, id: &ConnectionId) -> Option<Member> {
        self.connections.lock().await.remove(id)
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// 参加者の表示名一覧（ソート済み）
    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .lock()
            .await
            .values()
            .map(|m| m.username.clone())
            .collect();

        // Sort for consistent ordering
        names.sort();
        names
    }

    /// `exclude` 以外の全コネクション
    pub async fn connections_except(
        &self,
        exclude: Option<ConnectionId>,
    ) -> Vec<Arc<dyn Connection>> {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(_, m)| m.connection.clone())
            .collect()
    }

    /// 指定したコネクションをまとめて削除し、残りの参加者数を返す
    pub async fn remove_all(&self, ids: &[ConnectionId]) -> usize {
        let mut connections = self.connections.lock().await;
        for id in ids {
            connections.remove(id);
        }
        connections.len()
    }
}
