//! Device inspection: heartbeat and identity queries outside a print job.

use std::fmt;

use crate::config::SessionConfig;
use crate::protocol::Command;
use crate::protocol::status::{Heartbeat, InfoKey, InfoValue};
use crate::transport::{ReadPolicy, Transport, request};
use crate::{NiimbotError, Result};

const QUERIED_KEYS: [InfoKey; 5] = [
    InfoKey::DeviceType,
    InfoKey::SoftVersion,
    InfoKey::HardVersion,
    InfoKey::DeviceSerial,
    InfoKey::Battery,
];

/// What a printer reports about itself. Fields the firmware does not answer stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub heartbeat: Option<Heartbeat>,
    pub device_type: Option<InfoValue>,
    pub soft_version: Option<InfoValue>,
    pub hard_version: Option<InfoValue>,
    pub serial: Option<InfoValue>,
    pub battery: Option<InfoValue>,
}

impl DeviceInfo {
    fn set(&mut self, key: InfoKey, value: InfoValue) {
        let slot = match key {
            InfoKey::DeviceType => &mut self.device_type,
            InfoKey::SoftVersion => &mut self.soft_version,
            InfoKey::HardVersion => &mut self.hard_version,
            InfoKey::DeviceSerial => &mut self.serial,
            InfoKey::Battery => &mut self.battery,
            _ => return,
        };
        *slot = Some(value);
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn line(f: &mut fmt::Formatter<'_>, label: &str, value: &Option<InfoValue>) -> fmt::Result {
            match value {
                Some(v) => writeln!(f, "{label:<14}{v}"),
                None => writeln!(f, "{label:<14}-"),
            }
        }
        line(f, "device type", &self.device_type)?;
        line(f, "firmware", &self.soft_version)?;
        line(f, "hardware", &self.hard_version)?;
        line(f, "serial", &self.serial)?;
        line(f, "battery", &self.battery)?;
        if let Some(hb) = &self.heartbeat {
            writeln!(
                f,
                "{:<14}closed={} power={} paper={} rfid={}",
                "heartbeat", hb.closing_state, hb.power_level, hb.paper_state, hb.rfid_read_state
            )?;
        }
        Ok(())
    }
}

/// Connect to `address`, read heartbeat and identity values, then disconnect.
///
/// Holds the device lock for the duration, so it fails with `DeviceBusy`
/// while a print session owns the printer.
pub async fn inspect<T: Transport + ?Sized>(
    transport: &mut T,
    address: &str,
    config: &SessionConfig,
) -> Result<DeviceInfo> {
    let _guard = config.locks.try_acquire(address)?;

    transport.connect(address, config.connect_timeout).await?;
    let result = query(transport, config).await;
    transport.disconnect().await;
    result
}

async fn query<T: Transport + ?Sized>(transport: &mut T, config: &SessionConfig) -> Result<DeviceInfo> {
    let policy = ReadPolicy {
        timeout: config.read_timeout,
        max_corrupt: config.max_checksum_failures,
    };
    let mut info = DeviceInfo::default();

    let heartbeat = Command::Heartbeat.packet([0x01])?;
    info.heartbeat = optional(request(transport, &heartbeat, policy).await)?
        .as_ref()
        .and_then(Heartbeat::parse);

    for key in QUERIED_KEYS {
        let packet = Command::GetInfo.packet([key.code()])?;
        if let Some(reply) = optional(request(transport, &packet, policy).await)? {
            let value = key.decode(&reply);
            tracing::debug!(key = ?key, value = %value, "Device info");
            info.set(key, value);
        }
    }

    Ok(info)
}

/// Unanswered or refused queries leave the field empty; link failures propagate.
fn optional<V>(result: Result<V>) -> Result<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ (NiimbotError::Timeout(_) | NiimbotError::Protocol(_))) => {
            tracing::debug!(error = %err, "Query not answered");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
