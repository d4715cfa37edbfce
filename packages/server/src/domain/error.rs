//! Domain 層のエラー型

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// クライアントに返すエラーコード
///
/// `BadRoom` / `RoomExists` / `Reserved` は `RoomManager::create_error` が、
/// `MsgTooLarge` / `BadUsername` はゲートウェイの入力検証が返します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRoom,
    RoomExists,
    Reserved,
    MsgTooLarge,
    BadUsername,
}

impl ErrorCode {
    /// ワイヤ上の文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRoom => "bad_room",
            Self::RoomExists => "room_exists",
            Self::Reserved => "reserved",
            Self::MsgTooLarge => "msg_too_large",
            Self::BadUsername => "bad_username",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// コネクションへの送信・切断時のエラー
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// コネクションが既に閉じている
    #[error("Connection '{0}' is closed")]
    Closed(String),

    /// 送信キューが満杯（クライアントが読み出していない）
    #[error("Outbound queue of connection '{0}' is full")]
    Backpressure(String),

    /// 送信に失敗
    #[error("Failed to send to connection: {0}")]
    SendFailed(String),

    /// 切断に失敗
    #[error("Failed to close connection: {0}")]
    CloseFailed(String),
}

/// 値オブジェクトの生成エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("Username must be 1 to {max} characters, got {actual}")]
    UsernameLength { max: usize, actual: usize },

    #[error("Username contains an unsupported character: {0:?}")]
    UsernameInvalidChar(char),
}

impl ValueObjectError {
    /// 対応するクライアント向けエラーコード
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UsernameLength { .. } | Self::UsernameInvalidChar(_) => ErrorCode::BadUsername,
        }
    }
}
