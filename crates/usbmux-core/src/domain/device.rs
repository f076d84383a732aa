//! Device identity types.

use serde::{Deserialize, Serialize};

/// Stable serial identifier of a device.  Survives reconnects.
pub type Udid = String;

/// Ephemeral session handle the daemon assigns per attachment.
///
/// Only valid while the device stays attached; a reattached device gets a new
/// one.  Use the [`Udid`] for durable identity.
pub type DeviceId = u32;

/// The `Properties` dictionary of an `Attached` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// `"USB"` or `"Network"`.
    #[serde(rename = "ConnectionType")]
    pub connection_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: DeviceId,
    /// Absent for network-attached devices.
    #[serde(rename = "LocationID", default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<u64>,
    #[serde(rename = "ProductID", default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u64>,
    #[serde(rename = "SerialNumber")]
    pub serial_number: Udid,
}

impl DeviceDescriptor {
    pub fn udid(&self) -> &str {
        &self.serial_number
    }
}
