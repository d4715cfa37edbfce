//! UseCase 層
//!
//! ルームのライフサイクル、ブロードキャスト、遅延削除のポリシーを実装します。

pub mod room_manager;

pub use room_manager::RoomManager;
