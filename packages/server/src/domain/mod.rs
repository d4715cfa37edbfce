//! Domain 層
//!
//! ルームとコネクションのモデル、およびエラー型を定義します。
//! 外部（WebSocket など）への依存は `Connection` trait の背後に隠します。

pub mod connection;
pub mod error;
pub mod room;
pub mod value_object;

pub use connection::{Connection, ConnectionId};
pub use error::{ConnectionError, ErrorCode, ValueObjectError};
pub use room::{Member, Room};
pub use value_object::Username;

#[cfg(test)]
pub use connection::MockConnection;
