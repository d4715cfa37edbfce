//! Infrastructure 層
//!
//! Domain 層の trait（`Connection`）の具体的な実装と、ワイヤフォーマット（DTO）を提供します。

pub mod connection;
pub mod dto;
