//! WebSocket を使った Connection 実装
//!
//! ## 責務
//!
//! - WebSocket への容量付き送信キュー（`mpsc::Sender`）を保持
//! - `Connection` trait の `send_text` / `close` をキューへの書き込みとして実装
//!
//! ## 設計ノート
//!
//! WebSocket の生成と実際のソケット書き込みは UI 層（`ui/handler/websocket.rs`）の
//! pusher ループが行います。ループが終了して受信側が破棄されると、以降の送信は
//! `ConnectionError::Closed` になり、`RoomManager` はそのコネクションを stale として扱います。
//!
//! キューは待たずに書き込みます（`try_send`）。ソケットが書き込めずキューが
//! 満杯になったコネクションは `ConnectionError::Backpressure` を返し、同じく
//! stale として除去されます。

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    config::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
    domain::{Connection, ConnectionError, ConnectionId},
};

/// pusher ループに渡す送信指示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// テキストフレームを送信
    Text(String),
    /// クローズフレームを送信してループを終了
    Close(Option<CloseReason>),
}

/// クローズフレームのコードと理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// WebSocket を使った Connection 実装
pub struct WebSocketConnection {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
}

impl WebSocketConnection {
    /// 新しい WebSocketConnection と、pusher ループ用の受信側を作成
    pub fn channel() -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(DEFAULT_OUTBOUND_QUEUE_CAPACITY)
    }

    /// 送信キューの容量を指定して作成（0 は 1 として扱う）
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::generate(),
                sender,
            },
            receiver,
        )
    }

    /// クローズコード付きでコネクションを閉じる
    pub fn close_with(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Close(Some(CloseReason {
            code,
            reason: reason.to_string(),
        })))
    }

    fn enqueue(&self, outbound: Outbound) -> Result<(), ConnectionError> {
        self.sender.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backpressure(self.id.to_string()),
            TrySendError::Closed(_) => ConnectionError::Closed(self.id.to_string()),
        })
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Text(text.to_string()))?;
        tracing::trace!("Queued message for connection '{}'", self.id);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Close(None))
    }
}
