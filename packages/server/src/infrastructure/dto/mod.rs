//! Data Transfer Objects（ワイヤフォーマット）
//!
//! - `websocket`: WebSocket で送受信するメッセージ
//! - `http`: HTTP API のレスポンス

pub mod http;
pub mod websocket;
