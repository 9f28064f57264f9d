// Copyright 2025-2026 CEMAXECUTER LLC

use serde::{Deserialize, Serialize};

use crate::types::{ClockConfig, TuneRequest};

/// Settings for one receive channel. Unset fields leave the device as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Center frequency in Hz
    pub freq: Option<f64>,
    /// LO offset in Hz, only used together with `freq`
    pub lo_offset: Option<f64>,
    /// Gain in dB
    pub gain: Option<f64>,
    pub antenna: Option<String>,
    /// Analog filter bandwidth in Hz
    pub bandwidth: Option<f64>,
}

impl ChannelConfig {
    pub fn tune_request(&self) -> Option<TuneRequest> {
        let freq = self.freq?;
        Some(match self.lo_offset {
            Some(off) => TuneRequest::with_lo_offset(freq, off),
            None => TuneRequest::new(freq),
        })
    }
}

/// Full source setup, applied in one pass at initialization.
///
/// Order of application: clock, subdev spec, sample rate, then per channel
/// antenna, bandwidth, gain, frequency. Entry `i` of `channels` configures
/// channel `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub clock: Option<ClockConfig>,
    pub subdev_spec: Option<String>,
    /// Sample rate in samples per second
    pub samp_rate: Option<f64>,
    pub channels: Vec<ChannelConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PpsSource, RefSource, TunePolicy};

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "clock": { "ref_source": "external", "pps_source": "external" },
            "subdev_spec": "A:A A:B",
            "samp_rate": 2e6,
            "channels": [
                { "freq": 915e6, "gain": 30, "antenna": "RX2" },
                { "freq": 868e6, "lo_offset": 1e6 }
            ]
        }"#;
        let cfg: SourceConfig = serde_json::from_str(json).unwrap();
        let clock = cfg.clock.unwrap();
        assert_eq!(clock.ref_source, RefSource::External);
        assert_eq!(clock.pps_source, PpsSource::External);
        assert_eq!(cfg.samp_rate, Some(2e6));
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.channels[0].antenna.as_deref(), Some("RX2"));

        let req = cfg.channels[1].tune_request().unwrap();
        assert_eq!(req.rf_policy, TunePolicy::Manual);
        assert_eq!(req.rf_freq, 869e6);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{ "sample_rate": 1e6 }"#;
        assert!(serde_json::from_str::<SourceConfig>(json).is_err());
    }

    #[test]
    fn test_channel_without_freq_has_no_tune() {
        let ch = ChannelConfig {
            lo_offset: Some(1e6),
            ..ChannelConfig::default()
        };
        assert!(ch.tune_request().is_none());
    }
}
