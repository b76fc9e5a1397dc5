//! 上行报文 DTO。字段名兼容 camelCase / snake_case 以及常见网络服务器的写法。

use domain::{GatewayReception, TargetStatus, UplinkRecord};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 单个阀门的状态上报。
#[derive(Debug, Clone, Deserialize)]
pub struct ValveStatusPayload {
    #[serde(alias = "index", alias = "valveIndex", alias = "valve_index")]
    pub valve: u32,
    pub status: String,
    /// 其余字段中的数值作为阈值规则的输入。
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ValveStatusPayload {
    /// 无法识别的状态字符串按 UNKNOWN 处理。
    pub fn target_status(&self) -> TargetStatus {
        TargetStatus::parse(&self.status).unwrap_or(TargetStatus::Unknown)
    }

    pub fn metrics(&self) -> BTreeMap<String, f64> {
        numeric_fields(&self.extra)
    }
}

/// `manifolds/{id}/status`
#[derive(Debug, Clone, Deserialize)]
pub struct ManifoldStatusPayload {
    #[serde(default)]
    pub valves: Vec<ValveStatusPayload>,
}

/// `{manifolds|devices}/{id}/ack`
#[derive(Debug, Clone, Deserialize)]
pub struct AckPayload {
    #[serde(rename = "commandId", alias = "command_id", alias = "id")]
    pub command_id: String,
}

/// `{manifolds|devices}/{id}/online`
#[derive(Debug, Clone, Deserialize)]
pub struct OnlinePayload {
    #[serde(alias = "isOnline", alias = "is_online")]
    pub online: bool,
}

/// `lorawan/{devEui}/down/*` 以及 TTN 的 `down/*` 事件。
#[derive(Debug, Clone, Deserialize)]
pub struct DownlinkEventPayload {
    #[serde(rename = "correlationIds", alias = "correlation_ids", default)]
    pub correlation_ids: Vec<String>,
    #[serde(
        rename = "failureReason",
        alias = "failure_reason",
        alias = "reason",
        default
    )]
    pub failure_reason: Option<String>,
    /// TTN：`{"downlink_failed": {"error": {"message_format": "..."}}}`
    #[serde(default)]
    pub downlink_failed: Option<Value>,
}

impl DownlinkEventPayload {
    pub fn reason(&self) -> Option<String> {
        if let Some(reason) = self.failure_reason.as_ref() {
            return Some(reason.clone());
        }
        let failed = self.downlink_failed.as_ref()?;
        failed
            .pointer("/error/message_format")
            .or_else(|| failed.pointer("/error/name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RxInfoPayload {
    #[serde(rename = "gatewayId", alias = "gatewayID", alias = "gateway_id", alias = "mac")]
    pub gateway_id: String,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(rename = "loRaSNR", alias = "snr", default)]
    pub lora_snr: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoraModulationPayload {
    #[serde(alias = "spreading_factor", default)]
    pub spreading_factor: Option<u32>,
    #[serde(default)]
    pub bandwidth: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfoPayload {
    #[serde(default)]
    pub frequency: Option<u64>,
    /// ChirpStack v3。
    #[serde(rename = "loRaModulationInfo", default)]
    pub lora_modulation_info: Option<LoraModulationPayload>,
    #[serde(default)]
    pub data_rate: Option<LoraModulationPayload>,
    /// v3 为字符串 `"LORA"`，v4 为 `{"lora": {...}}`。
    #[serde(default)]
    pub modulation: Option<Value>,
}

impl TxInfoPayload {
    fn lora(&self) -> Option<LoraModulationPayload> {
        if let Some(info) = self.lora_modulation_info.as_ref().or(self.data_rate.as_ref()) {
            return Some(info.clone());
        }
        let lora = self.modulation.as_ref()?.get("lora")?;
        serde_json::from_value(lora.clone()).ok()
    }
}

/// ChirpStack v4 的 `deviceInfo`。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoPayload {
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
}

/// `lorawan/{devEui}/up`（ChirpStack v3 / v4 风格）。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkPayload {
    #[serde(rename = "applicationID", alias = "applicationId", alias = "application_id", default)]
    pub application_id: Option<String>,
    /// v3 与 applicationID 同时出现，只在缺少 ID 时使用。
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub device_info: Option<DeviceInfoPayload>,
    #[serde(alias = "f_port", default)]
    pub f_port: Option<u32>,
    #[serde(alias = "f_cnt", default)]
    pub f_cnt: Option<u32>,
    #[serde(alias = "payload", default)]
    pub data: Option<String>,
    #[serde(alias = "decoded", alias = "decodedPayload", default)]
    pub object: Option<Value>,
    /// 部分 v3 集成把解码结果编码成字符串。
    #[serde(rename = "objectJSON", default)]
    pub object_json: Option<String>,
    #[serde(alias = "rx_info", default)]
    pub rx_info: Vec<RxInfoPayload>,
    #[serde(alias = "tx_info", default)]
    pub tx_info: Option<TxInfoPayload>,
}

impl UplinkPayload {
    fn resolved_application_id(&self) -> Option<String> {
        let device_info = self.device_info.as_ref();
        self.application_id
            .clone()
            .or_else(|| device_info.and_then(|info| info.application_id.clone()))
            .or_else(|| self.application_name.clone())
            .or_else(|| device_info.and_then(|info| info.application_name.clone()))
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtnGatewayIds {
    pub gateway_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtnRxMetadata {
    pub gateway_ids: TtnGatewayIds,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtnLora {
    #[serde(default)]
    pub spreading_factor: Option<u32>,
    #[serde(default)]
    pub bandwidth: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtnDataRate {
    #[serde(default)]
    pub lora: Option<TtnLora>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtnSettings {
    #[serde(default)]
    pub data_rate: Option<TtnDataRate>,
    /// TTN 以字符串形式给出频率。
    #[serde(default)]
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtnUplinkMessage {
    #[serde(default)]
    pub f_port: Option<u32>,
    #[serde(default)]
    pub f_cnt: Option<u32>,
    #[serde(default)]
    pub frm_payload: Option<String>,
    #[serde(default)]
    pub decoded_payload: Option<Value>,
    #[serde(default)]
    pub rx_metadata: Vec<TtnRxMetadata>,
    #[serde(default)]
    pub settings: Option<TtnSettings>,
}

/// `v3/{app}@{tenant}/devices/{id}/up`
#[derive(Debug, Clone, Deserialize)]
pub struct TtnUplinkPayload {
    pub uplink_message: TtnUplinkMessage,
}

fn record_from_parts(
    device_key: &str,
    application_id: &str,
    gateways: Vec<GatewayReception>,
    received_at_ms: i64,
) -> UplinkRecord {
    let mut record = UplinkRecord {
        device_key: device_key.to_string(),
        application_id: application_id.to_string(),
        f_port: None,
        f_cnt: None,
        raw_payload: String::new(),
        decoded_payload: None,
        rssi: None,
        snr: None,
        spreading_factor: None,
        bandwidth: None,
        frequency: None,
        gateways,
        received_at_ms,
    };
    if let Some(strongest) = record.strongest_gateway() {
        let (rssi, snr) = (strongest.rssi, strongest.snr);
        record.rssi = Some(rssi);
        record.snr = Some(snr);
    }
    record
}

impl UplinkPayload {
    pub fn into_record(
        self,
        device_key: &str,
        fallback_application_id: &str,
        received_at_ms: i64,
    ) -> UplinkRecord {
        let gateways = self
            .rx_info
            .iter()
            .filter_map(|rx| {
                Some(GatewayReception {
                    gateway_id: rx.gateway_id.clone(),
                    rssi: rx.rssi?,
                    snr: rx.lora_snr.unwrap_or(0.0),
                })
            })
            .collect();
        let application_id = self
            .resolved_application_id()
            .unwrap_or_else(|| fallback_application_id.to_string());
        let mut record = record_from_parts(device_key, &application_id, gateways, received_at_ms);
        record.f_port = self.f_port;
        record.f_cnt = self.f_cnt;
        record.decoded_payload = match self.object.as_ref() {
            Some(object) => Some(object.to_string()),
            None => self.object_json.filter(|text| !text.is_empty()),
        };
        record.raw_payload = self.data.unwrap_or_default();
        if let Some(tx) = self.tx_info {
            record.frequency = tx.frequency;
            if let Some(lora) = tx.lora() {
                record.spreading_factor = lora.spreading_factor;
                record.bandwidth = lora.bandwidth;
            }
        }
        record
    }
}

impl TtnUplinkPayload {
    pub fn into_record(
        self,
        device_key: &str,
        application_id: &str,
        received_at_ms: i64,
    ) -> UplinkRecord {
        let message = self.uplink_message;
        let gateways = message
            .rx_metadata
            .iter()
            .filter_map(|rx| {
                Some(GatewayReception {
                    gateway_id: rx.gateway_ids.gateway_id.clone(),
                    rssi: rx.rssi?,
                    snr: rx.snr.unwrap_or(0.0),
                })
            })
            .collect();
        let mut record = record_from_parts(device_key, application_id, gateways, received_at_ms);
        record.f_port = message.f_port;
        record.f_cnt = message.f_cnt;
        record.raw_payload = message.frm_payload.unwrap_or_default();
        record.decoded_payload = message.decoded_payload.as_ref().map(Value::to_string);
        if let Some(settings) = message.settings {
            record.frequency = settings
                .frequency
                .as_deref()
                .and_then(|value| value.parse::<u64>().ok());
            if let Some(lora) = settings.data_rate.and_then(|rate| rate.lora) {
                record.spreading_factor = lora.spreading_factor;
                record.bandwidth = lora.bandwidth;
            }
        }
        record
    }
}

/// 对象中的数值字段（布尔与字符串忽略）。
pub fn numeric_fields(object: &Map<String, Value>) -> BTreeMap<String, f64> {
    object
        .iter()
        .filter_map(|(key, value)| value.as_f64().map(|number| (key.clone(), number)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valve_status_collects_numeric_extras() {
        let valve: ValveStatusPayload = serde_json::from_str(
            r#"{"index": 2, "status": "on", "pressure": 5.5, "label": "north"}"#,
        )
        .expect("valve");
        assert_eq!(valve.valve, 2);
        assert_eq!(valve.target_status(), TargetStatus::On);
        let metrics = valve.metrics();
        assert_eq!(metrics.get("pressure"), Some(&5.5));
        assert!(!metrics.contains_key("label"));
    }

    #[test]
    fn chirpstack_uplink_picks_strongest_gateway() {
        let payload: UplinkPayload = serde_json::from_str(
            r#"{
                "applicationID": "orchard",
                "fPort": 2,
                "fCnt": 41,
                "data": "AQI=",
                "object": {"moisture": 31},
                "rxInfo": [
                    {"gatewayID": "gw-1", "rssi": -97, "loRaSNR": 4.5},
                    {"gatewayID": "gw-2", "rssi": -80, "loRaSNR": 9.0}
                ],
                "txInfo": {"frequency": 868100000, "loRaModulationInfo": {"spreadingFactor": 7, "bandwidth": 125}}
            }"#,
        )
        .expect("uplink");
        let record = payload.into_record("70b3", "default", 1_000);
        assert_eq!(record.application_id, "orchard");
        assert_eq!(record.gateways.len(), 2);
        assert_eq!(record.rssi, Some(-80.0));
        assert_eq!(record.snr, Some(9.0));
        assert_eq!(record.spreading_factor, Some(7));
        assert_eq!(record.frequency, Some(868_100_000));
    }

    #[test]
    fn chirpstack_v4_uplink_reads_device_info_and_modulation_object() {
        let payload: UplinkPayload = serde_json::from_str(
            r#"{
                "deviceInfo": {"applicationId": "b1c2", "applicationName": "orchard", "devEui": "70b3"},
                "fCnt": 3,
                "rxInfo": [{"gatewayId": "gw-9", "rssi": -70, "snr": 6.0}],
                "txInfo": {"frequency": 868300000, "modulation": {"lora": {"bandwidth": 125000, "spreadingFactor": 9}}}
            }"#,
        )
        .expect("uplink");
        let record = payload.into_record("70b3", "default", 1_000);
        assert_eq!(record.application_id, "b1c2");
        assert_eq!(record.spreading_factor, Some(9));
        assert_eq!(record.bandwidth, Some(125_000));
        assert_eq!(record.snr, Some(6.0));
    }

    #[test]
    fn application_name_is_used_only_without_an_id() {
        let payload: UplinkPayload =
            serde_json::from_str(r#"{"applicationName": "orchard"}"#).expect("uplink");
        assert_eq!(payload.into_record("70b3", "default", 0).application_id, "orchard");
    }

    #[test]
    fn ttn_failure_reason_is_extracted() {
        let payload: DownlinkEventPayload = serde_json::from_str(
            r#"{"correlation_ids": ["c-1"], "downlink_failed": {"error": {"message_format": "no gateway"}}}"#,
        )
        .expect("event");
        assert_eq!(payload.reason().as_deref(), Some("no gateway"));
    }
}
