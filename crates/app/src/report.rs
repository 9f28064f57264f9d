// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;

use serde::Serialize;

use usrp_sdr::{DeviceInfo, MetaRange, Result, TimeSpec, UsrpSource};

/// Snapshot of one channel's settings
#[derive(Debug, Serialize)]
pub struct ChannelReport {
    pub chan: usize,
    pub freq: f64,
    pub freq_range: MetaRange,
    pub gain: f64,
    pub gain_range: MetaRange,
    pub antenna: String,
    pub antennas: Vec<String>,
    pub bandwidth: f64,
    pub bandwidth_range: MetaRange,
}

/// Snapshot of a configured source
#[derive(Debug, Serialize)]
pub struct SourceReport {
    pub mboard: String,
    pub subdev_spec: String,
    pub samp_rate: f64,
    pub time_now: TimeSpec,
    pub channels: Vec<ChannelReport>,
}

impl SourceReport {
    pub fn collect(src: &dyn UsrpSource) -> Result<Self> {
        let channels = (0..src.get_num_channels())
            .map(|chan| {
                Ok(ChannelReport {
                    chan,
                    freq: src.get_center_freq(chan)?,
                    freq_range: src.get_freq_range(chan)?,
                    gain: src.get_gain(chan)?,
                    gain_range: src.get_gain_range(chan)?,
                    antenna: src.get_antenna(chan)?,
                    antennas: src.get_antennas(chan)?,
                    bandwidth: src.get_bandwidth(chan)?,
                    bandwidth_range: src.get_bandwidth_range(chan)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mboard: src.get_mboard_name()?,
            subdev_spec: src.get_subdev_spec()?,
            samp_rate: src.get_samp_rate()?,
            time_now: src.get_time_now()?,
            channels,
        })
    }
}

impl fmt::Display for SourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mboard:      {}", self.mboard)?;
        writeln!(f, "subdev spec: {}", self.subdev_spec)?;
        writeln!(f, "sample rate: {:.6} Msps", self.samp_rate / 1e6)?;
        writeln!(f, "time now:    {}", self.time_now)?;
        for ch in &self.channels {
            writeln!(f, "chan {}:", ch.chan)?;
            writeln!(f, "  freq:      {:.6} MHz (range {})", ch.freq / 1e6, ch.freq_range)?;
            writeln!(f, "  gain:      {:.1} dB (range {})", ch.gain, ch.gain_range)?;
            writeln!(f, "  antenna:   {} (of {})", ch.antenna, ch.antennas.join(", "))?;
            writeln!(
                f,
                "  bandwidth: {:.3} MHz (range {})",
                ch.bandwidth / 1e6,
                ch.bandwidth_range
            )?;
        }
        Ok(())
    }
}

/// Discovery result entry
#[derive(Debug, Serialize)]
pub struct FoundDevice {
    pub iface: String,
    pub product: String,
    pub serial: String,
    pub device_type: String,
    pub addr: String,
}

impl From<&DeviceInfo> for FoundDevice {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            iface: info.iface(),
            product: info.product.clone(),
            serial: info.serial.clone(),
            device_type: info.device_type.clone(),
            addr: info.addr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usrp_sdr::{make_single_usrp_source, IoType};

    #[test]
    fn test_report_covers_every_channel() {
        let source = make_single_usrp_source("type=sim", IoType::Fc32, 2).unwrap();
        let src = source.lock().unwrap();
        let report = SourceReport::collect(&*src).unwrap();
        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.channels[1].chan, 1);
        assert!(report.channels[0].antennas.contains(&report.channels[0].antenna));

        let text = report.to_string();
        assert!(text.contains("chan 1:"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["channels"].as_array().unwrap().len(), 2);
    }
}
