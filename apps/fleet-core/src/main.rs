use fleet_config::AppConfig;
use fleet_core::{FleetCore, Stores, transport_settings};
use fleet_scheduler::TokioScheduler;
use fleet_telemetry::init_tracing;
use fleet_transport::{TransportAdapter, connect_transport, qos_from_u8};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let stores = Stores::from_config(&config).await?;
    let transport = connect_transport(transport_settings(&config))?;
    let subscribe_qos = qos_from_u8(config.subscribe_qos);
    for topic in config.subscribe_topics.iter() {
        transport.adapter.subscribe(topic, subscribe_qos).await?;
    }
    info!(
        target: "fleet.transport",
        backend = transport.adapter.backend(),
        topics = config.subscribe_topics.len(),
        "transport_ready"
    );

    let scheduler = Arc::new(TokioScheduler::new());
    let core = FleetCore::new(&config, stores, transport.adapter.clone(), scheduler);
    core.start_background(&config);

    // embedded 后端的 broker 由 transport 持有，进程存活期间不能释放
    let _embedded = transport.embedded;
    let mut inbound = transport.inbound;
    info!(target: "fleet.ingest", "fleet_core_started");
    while let Some(message) = inbound.recv().await {
        core.spawn_inbound(message);
    }
    warn!(target: "fleet.ingest", "inbound_channel_closed");
    Ok(())
}
