//! CPAL device lookup
//!
//! Resolves a [`DeviceId`] to a `cpal::Device` in either direction. When the
//! identifier names a host, only that host is searched; otherwise every
//! available host is tried in turn (JACK, ALSA, PulseAudio, CoreAudio, ...).
//!
//! Enumeration for presentation is out of scope here; the router only needs to
//! find the one device it was told about.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::backend::DeviceInfo;
use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Capture or playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Get a human-readable name for a host ID
pub(crate) fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Get a host by its name string
fn get_host_by_name(name: &str) -> Option<(Host, String)> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok().map(|h| (h, host_name(id))))
}

fn find_on_host(host: &Host, direction: Direction, name: &str) -> Option<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_deref() == Some(name);
    match direction {
        Direction::Input => host.input_devices().ok()?.find(matches),
        Direction::Output => host.output_devices().ok()?.find(matches),
    }
}

/// Find a device by its ID
///
/// Returns the device and the name of the host it was found on.
pub(crate) fn find_device(
    id: &DeviceId,
    direction: Direction,
) -> AudioResult<(cpal::Device, String)> {
    if let Some(ref wanted) = id.host {
        let (host, host_label) = get_host_by_name(wanted)
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))?;
        return find_on_host(&host, direction, &id.name)
            .map(|device| (device, host_label))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("[AUDIO] Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        if let Some(device) = find_on_host(&host, direction, &id.name) {
            return Ok((device, host_name(host_id)));
        }
    }

    Err(AudioError::DeviceNotFound(id.display_label()))
}

/// Resolve an optional ID, falling back to the default host's default device
pub(crate) fn find_device_or_default(
    id: Option<&DeviceId>,
    direction: Direction,
) -> AudioResult<(cpal::Device, String)> {
    if let Some(id) = id {
        return find_device(id, direction);
    }

    let host = cpal::default_host();
    let device = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    device
        .map(|d| (d, host_name(host.id())))
        .ok_or(AudioError::NoDefaultDevice(direction.label()))
}

/// Describe a device for the router (nominal rate, channel count)
pub(crate) fn describe_device(
    device: &cpal::Device,
    host: &str,
    direction: Direction,
) -> AudioResult<DeviceInfo> {
    let name = device
        .name()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    let config = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .map_err(|e| AudioError::ConfigError(format!("{}: {}", name, e)))?;

    Ok(DeviceInfo {
        id: DeviceId::with_host(&name, host),
        nominal_sample_rate: config.sample_rate().0,
        max_channels: config.channels(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_not_found() {
        // Holds with or without audio hardware (CI has none)
        let id = DeviceId::new("vroute-test-device-that-does-not-exist");
        assert!(matches!(
            find_device(&id, Direction::Output),
            Err(AudioError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_host_is_not_found() {
        let id = DeviceId::with_host("anything", "NoSuchHost");
        assert!(matches!(
            find_device(&id, Direction::Input),
            Err(AudioError::DeviceNotFound(_))
        ));
    }
}
