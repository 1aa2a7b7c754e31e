//! OCPP 1.6 core messages (also served to 1.5 through the envelope bridge)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::types::ProtocolVersion;
use crate::protocol::{typed, CallContext, Dispatcher, HandlerError};

/// CiString20
const VENDOR_MAX_LEN: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: DateTime<Utc>,
    pub interval: u32,
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
    pub connector_id: u32,
    pub error_code: String,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Empty confirmation body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

pub fn register(dispatcher: &mut Dispatcher, version: ProtocolVersion, heartbeat_interval: u32) {
    dispatcher
        .register(
            version,
            "BootNotification",
            typed(move |ctx: &CallContext, req: BootNotificationRequest| boot_notification(ctx, req, heartbeat_interval)),
        )
        .register(version, "Heartbeat", typed(heartbeat))
        .register(version, "StatusNotification", typed(status_notification))
        .register(version, "MeterValues", typed(meter_values));
}

fn boot_notification(
    ctx: &CallContext,
    req: BootNotificationRequest,
    interval: u32,
) -> Result<BootNotificationResponse, HandlerError> {
    if req.charge_point_vendor.is_empty() || req.charge_point_vendor.len() > VENDOR_MAX_LEN {
        return Err(HandlerError::FormationViolation(format!(
            "chargePointVendor must be 1 to {} characters",
            VENDOR_MAX_LEN
        )));
    }
    info!(
        device = %ctx.identity,
        vendor = %req.charge_point_vendor,
        model = %req.charge_point_model,
        firmware = ?req.firmware_version,
        "boot notification"
    );
    Ok(BootNotificationResponse {
        status: RegistrationStatus::Accepted,
        current_time: Utc::now(),
        interval,
    })
}

fn heartbeat(_ctx: &CallContext, _req: HeartbeatRequest) -> Result<HeartbeatResponse, HandlerError> {
    Ok(HeartbeatResponse {
        current_time: Utc::now(),
    })
}

fn status_notification(ctx: &CallContext, req: StatusNotificationRequest) -> Result<Empty, HandlerError> {
    info!(
        device = %ctx.identity,
        connector = req.connector_id,
        status = ?req.status,
        error_code = %req.error_code,
        "status notification"
    );
    Ok(Empty {})
}

fn meter_values(ctx: &CallContext, req: MeterValuesRequest) -> Result<Empty, HandlerError> {
    let samples: usize = req.meter_value.iter().map(|value| value.sampled_value.len()).sum();
    debug!(
        device = %ctx.identity,
        connector = req.connector_id,
        transaction = ?req.transaction_id,
        samples,
        "meter values"
    );
    Ok(Empty {})
}
