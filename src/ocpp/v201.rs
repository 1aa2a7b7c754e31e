//! OCPP 2.0.1 core messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::types::ProtocolVersion;
use crate::protocol::{typed, CallContext, Dispatcher, HandlerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStation {
    pub model: String,
    pub vendor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStation,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: u32,
    pub status: RegistrationStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: ConnectorStatus,
    pub evse_id: u32,
    pub connector_id: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    Faulted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

pub fn register(dispatcher: &mut Dispatcher, heartbeat_interval: u32) {
    let version = ProtocolVersion::V201;
    dispatcher
        .register(
            version,
            "BootNotification",
            typed(move |ctx: &CallContext, req: BootNotificationRequest| {
                info!(
                    device = %ctx.identity,
                    vendor = %req.charging_station.vendor_name,
                    model = %req.charging_station.model,
                    reason = %req.reason,
                    "boot notification"
                );
                Ok::<_, HandlerError>(BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: heartbeat_interval,
                    status: RegistrationStatus::Accepted,
                })
            }),
        )
        .register(
            version,
            "Heartbeat",
            typed(|_ctx: &CallContext, _req: HeartbeatRequest| {
                Ok::<_, HandlerError>(HeartbeatResponse {
                    current_time: Utc::now(),
                })
            }),
        )
        .register(
            version,
            "StatusNotification",
            typed(|ctx: &CallContext, req: StatusNotificationRequest| {
                info!(
                    device = %ctx.identity,
                    evse = req.evse_id,
                    connector = req.connector_id,
                    status = ?req.connector_status,
                    "status notification"
                );
                Ok::<_, HandlerError>(StatusNotificationResponse {})
            }),
        );
}
