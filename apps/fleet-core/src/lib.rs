//! 消息核心运行时：按配置装配存储、传输与各能力模块。

pub mod wiring;

pub use wiring::{FleetCore, Stores, transport_settings};
