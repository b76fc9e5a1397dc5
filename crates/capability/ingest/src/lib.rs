//! 上行消息路由：topic 解析 → 类型化事件 → 分发给各能力模块。

pub mod payload;
pub mod router;
pub mod topic;

pub use router::{IngestDeps, RouteOutcome, Router};
pub use topic::{RoutedTopic, TopicDomain, TopicEvent, parse_topic};

/// 路由错误。两类错误都只记录日志并丢弃消息，不重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("parse error on {topic}: {message}")]
    Parse { topic: String, message: String },
    #[error("unroutable topic: {0}")]
    Unroutable(String),
}
