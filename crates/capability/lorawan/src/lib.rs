//! LoRaWAN 能力：网关信号统计、下行关联跟踪与下行发送。

pub mod downlink;
pub mod gateway;

pub use downlink::{
    DownlinkCorrelationTracker, DownlinkError, DownlinkRequest, DownlinkService, downlink_topic,
};
pub use gateway::GatewayMetricsAggregator;
