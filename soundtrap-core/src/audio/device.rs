//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// List all available audio input devices, default device first.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo { name, is_default }
                })
                .collect();
            sort_default_first(list)
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

fn sort_default_first(mut devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    devices.sort_by_key(|d| !d.is_default);
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_sorts_first_and_keeps_order_otherwise() {
        let devices = vec![
            DeviceInfo {
                name: "USB Mic".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "Built-in".into(),
                is_default: true,
            },
            DeviceInfo {
                name: "Line In".into(),
                is_default: false,
            },
        ];
        let sorted: Vec<String> = sort_default_first(devices)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(sorted, vec!["Built-in", "USB Mic", "Line In"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(DeviceInfo {
            name: "Built-in".into(),
            is_default: true,
        })
        .unwrap();
        assert_eq!(json["isDefault"], true);
    }
}
