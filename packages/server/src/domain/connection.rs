//! Connection trait 定義
//!
//! ルームに参加している双方向コネクションの抽象化です。
//! 具体的な実装（WebSocket）は Infrastructure 層が提供します（依存性の逆転）。

use async_trait::async_trait;
use uuid::Uuid;

use super::ConnectionError;

/// コネクションの識別子
///
/// マップのキーとして使い、同一性（identity）を表します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// 新しいランダムな ConnectionId を生成
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// 確立済みの双方向コネクション
///
/// `RoomManager` はこの trait 経由でのみ送信・切断を行います。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// コネクションの識別子
    fn id(&self) -> ConnectionId;

    /// テキストメッセージを送信
    async fn send_text(&self, text: &str) -> Result<(), ConnectionError>;

    /// コネクションを閉じる
    async fn close(&self) -> Result<(), ConnectionError>;
}
