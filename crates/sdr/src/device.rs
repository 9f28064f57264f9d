// Copyright 2025-2026 CEMAXECUTER LLC

use crate::addr::{DeviceAddr, SubdevSpec};
use crate::error::Result;
use crate::types::{
    ClockConfig, IoType, MetaRange, RxMetadata, StreamCmd, TimeSpec, TuneRequest, TuneResult,
};
use crate::Samples;

/// Receive-side control and streaming primitives of one radio unit.
///
/// Implementations talk to a single motherboard. Every call is a blocking
/// round trip to the device; none of them are safe to issue concurrently,
/// so the trait only requires `Send` and mutating calls take `&mut self`.
pub trait UsrpDevice: Send {
    /// Number of receive channels the current subdev spec maps.
    fn num_channels(&self) -> Result<usize>;
    fn mboard_name(&self) -> Result<String>;

    fn set_subdev_spec(&mut self, spec: &SubdevSpec) -> Result<()>;
    fn subdev_spec(&self) -> Result<SubdevSpec>;

    fn set_rx_rate(&mut self, rate: f64) -> Result<()>;
    fn rx_rate(&self) -> Result<f64>;

    fn set_rx_freq(&mut self, request: &TuneRequest, chan: usize) -> Result<TuneResult>;
    fn rx_freq(&self, chan: usize) -> Result<f64>;
    fn rx_freq_range(&self, chan: usize) -> Result<MetaRange>;

    fn set_rx_gain(&mut self, gain: f64, chan: usize) -> Result<()>;
    fn rx_gain(&self, chan: usize) -> Result<f64>;
    fn rx_gain_range(&self, chan: usize) -> Result<MetaRange>;

    fn set_rx_antenna(&mut self, ant: &str, chan: usize) -> Result<()>;
    fn rx_antenna(&self, chan: usize) -> Result<String>;
    fn rx_antennas(&self, chan: usize) -> Result<Vec<String>>;

    fn set_rx_bandwidth(&mut self, bandwidth: f64, chan: usize) -> Result<()>;
    fn rx_bandwidth(&self, chan: usize) -> Result<f64>;
    fn rx_bandwidth_range(&self, chan: usize) -> Result<MetaRange>;

    fn set_clock_config(&mut self, config: &ClockConfig) -> Result<()>;

    fn time_now(&self) -> Result<TimeSpec>;
    fn time_last_pps(&self) -> Result<TimeSpec>;
    fn set_time_now(&mut self, time: TimeSpec) -> Result<()>;
    fn set_time_next_pps(&mut self, time: TimeSpec) -> Result<()>;

    /// Create the receive streamer for `channels`. Returns the largest
    /// number of samples per channel one `recv` call can deliver.
    fn setup_rx_stream(&mut self, io_type: IoType, channels: &[usize]) -> Result<usize>;
    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<()>;
    /// Receive into `bufs` (one per streamed channel). Conditions such as
    /// overflow or timeout are reported in the metadata, not as errors.
    fn recv(&mut self, bufs: &mut [Samples], timeout: f64) -> Result<RxMetadata>;
}

/// Information about a reachable device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub serial: String,
    pub product: String,
    pub device_type: String,
    /// Full address as reported by discovery
    pub addr: DeviceAddr,
}

impl DeviceInfo {
    /// Interface name in the `usrp-PRODUCT-SERIAL` form accepted by `DeviceAddr`.
    pub fn iface(&self) -> String {
        format!("usrp-{}-{}", self.product, self.serial)
    }
}

/// List devices matching `hint`. `type=sim` lists the simulated device.
pub fn find_devices(hint: &DeviceAddr) -> Result<Vec<DeviceInfo>> {
    if hint.is_sim() {
        return Ok(vec![crate::sim::SimDevice::info()]);
    }
    find_hardware(hint)
}

#[cfg(feature = "usrp")]
fn find_hardware(hint: &DeviceAddr) -> Result<Vec<DeviceInfo>> {
    crate::usrp::list_devices(hint)
}

#[cfg(not(feature = "usrp"))]
fn find_hardware(hint: &DeviceAddr) -> Result<Vec<DeviceInfo>> {
    Err(crate::error::SdrError::unsupported(format!(
        "cannot search for '{}': built without UHD support (enable the usrp feature or use type=sim)",
        hint
    )))
}
