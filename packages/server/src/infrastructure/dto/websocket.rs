//! WebSocket メッセージの DTO
//!
//! ```text
//! {"type":"users","list":[name,...]}
//! {"type":"status","text":string,"ts":integer}
//! {"type":"rooms","list":[room_id,...]}
//! {"type":"message","user":string,"text":string,"ts":integer}
//! {"type":"error","code":string}
//! ```
//!
//! `ts` は UTC の Unix エポック（ミリ秒）です。

use serde::{Deserialize, Serialize};

use crate::domain::ErrorCode;

/// メッセージ種別
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Users,
    Status,
    Rooms,
    Message,
    Error,
}

/// ルームの参加者一覧
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsersMessage {
    pub r#type: MessageType,
    pub list: Vec<String>,
}

/// タイムスタンプ付きのステータス行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusMessage {
    pub r#type: MessageType,
    pub text: String,
    pub ts: i64,
}

/// ロビー向けのルーム一覧
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomsMessage {
    pub r#type: MessageType,
    pub list: Vec<String>,
}

/// ルーム内のチャットメッセージ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub r#type: MessageType,
    pub user: String,
    pub text: String,
    pub ts: i64,
}

/// エラー通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    pub r#type: MessageType,
    pub code: ErrorCode,
}

impl UsersMessage {
    pub fn new(list: Vec<String>) -> Self {
        Self {
            r#type: MessageType::Users,
            list,
        }
    }
}

impl StatusMessage {
    pub fn new(text: String, ts: i64) -> Self {
        Self {
            r#type: MessageType::Status,
            text,
            ts,
        }
    }
}

impl RoomsMessage {
    pub fn new(list: Vec<String>) -> Self {
        Self {
            r#type: MessageType::Rooms,
            list,
        }
    }
}

impl ChatMessage {
    pub fn new(user: String, text: String, ts: i64) -> Self {
        Self {
            r#type: MessageType::Message,
            user,
            text,
            ts,
        }
    }
}

impl ErrorMessage {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            r#type: MessageType::Error,
            code,
        }
    }
}

/// DTO を JSON 文字列にエンコード
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
