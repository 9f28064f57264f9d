// Copyright 2025-2026 CEMAXECUTER LLC

//! Value types exchanged with the device: tuning, ranges, time and clocking.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SdrError;

/// How one stage of the tuning chain (RF LO or DSP mixer) is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunePolicy {
    /// Leave the stage where it is
    None,
    /// Let the driver pick
    Auto,
    /// Use the frequency given in the request
    Manual,
}

/// Tuning instruction for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuneRequest {
    /// Desired overall center frequency in Hz
    pub target_freq: f64,
    pub rf_policy: TunePolicy,
    pub rf_freq: f64,
    pub dsp_policy: TunePolicy,
    pub dsp_freq: f64,
}

impl TuneRequest {
    /// Tune to `freq`, letting the driver split it between LO and DSP.
    pub fn new(freq: f64) -> Self {
        Self {
            target_freq: freq,
            rf_policy: TunePolicy::Auto,
            rf_freq: 0.0,
            dsp_policy: TunePolicy::Auto,
            dsp_freq: 0.0,
        }
    }

    /// Park the LO `lo_offset` Hz away from `freq` and make up the rest in DSP.
    /// Keeps the LO leakage spur out of the passband center.
    pub fn with_lo_offset(freq: f64, lo_offset: f64) -> Self {
        Self {
            target_freq: freq,
            rf_policy: TunePolicy::Manual,
            rf_freq: freq + lo_offset,
            dsp_policy: TunePolicy::Auto,
            dsp_freq: 0.0,
        }
    }
}

/// What the hardware actually achieved for a tune request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TuneResult {
    /// RF target after clipping to the front-end range
    pub clipped_rf_freq: f64,
    pub target_rf_freq: f64,
    pub actual_rf_freq: f64,
    pub target_dsp_freq: f64,
    pub actual_dsp_freq: f64,
}

impl TuneResult {
    /// Overall achieved center frequency (RF plus DSP shift).
    pub fn actual_freq(&self) -> f64 {
        self.actual_rf_freq + self.actual_dsp_freq
    }
}

impl fmt::Display for TuneResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target RF {:.6} MHz, actual RF {:.6} MHz, target DSP {:.6} MHz, actual DSP {:.6} MHz",
            self.target_rf_freq / 1e6,
            self.actual_rf_freq / 1e6,
            self.target_dsp_freq / 1e6,
            self.actual_dsp_freq / 1e6,
        )
    }
}

/// One continuous stretch of permitted values. `step == 0` means any value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Range {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.start && value <= self.stop
    }
}

/// A sorted list of ranges: the capability of one setting on one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaRange {
    ranges: Vec<Range>,
}

impl MetaRange {
    pub fn new(mut ranges: Vec<Range>) -> Self {
        ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { ranges }
    }

    pub fn single(start: f64, stop: f64, step: f64) -> Self {
        Self { ranges: vec![Range::new(start, stop, step)] }
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn start(&self) -> f64 {
        self.ranges.first().map_or(0.0, |r| r.start)
    }

    pub fn stop(&self) -> f64 {
        self.ranges.last().map_or(0.0, |r| r.stop)
    }

    /// Smallest non-zero step over all ranges, 0 if the whole range is continuous.
    pub fn step(&self) -> f64 {
        self.ranges
            .iter()
            .map(|r| r.step)
            .filter(|s| *s > 0.0)
            .fold(0.0, |acc, s| if acc == 0.0 { s } else { acc.min(s) })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.ranges.iter().any(|r| r.contains(value))
    }

    /// Move `value` to the nearest permitted value. With `clip_step` the
    /// result is also snapped onto the step grid of its range.
    pub fn clip(&self, value: f64, clip_step: bool) -> f64 {
        let Some(first) = self.ranges.first() else {
            return value;
        };
        if value <= first.start {
            return first.start;
        }

        let mut last: Option<&Range> = None;
        for r in &self.ranges {
            if let Some(prev) = last {
                if value > prev.stop && value < r.start {
                    return if value - prev.stop <= r.start - value {
                        prev.stop
                    } else {
                        r.start
                    };
                }
            }
            if r.contains(value) {
                if !clip_step || r.step <= 0.0 {
                    return value;
                }
                let snapped = r.start + ((value - r.start) / r.step).round() * r.step;
                return snapped.min(r.stop);
            }
            last = Some(r);
        }

        self.stop()
    }
}

impl fmt::Display for MetaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.step > 0.0 {
                    format!("({}, {}, {})", r.start, r.stop, r.step)
                } else {
                    format!("({}, {})", r.start, r.stop)
                }
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Device clock timestamp: whole seconds plus a fraction in `[0, 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeSpec {
    pub full_secs: i64,
    pub frac_secs: f64,
}

impl TimeSpec {
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    pub fn from_secs(secs: f64) -> Self {
        Self::new(0, secs)
    }

    /// Timestamp of sample number `ticks` at `rate` samples per second.
    pub fn from_ticks(ticks: u64, rate: f64) -> Self {
        let whole = (ticks as f64 / rate).floor();
        let rem = ticks as f64 - whole * rate;
        Self::new(whole as i64, rem / rate)
    }

    pub fn real_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.full_secs + rhs.full_secs, self.frac_secs + rhs.frac_secs)
    }
}

impl Sub for TimeSpec {
    type Output = TimeSpec;

    fn sub(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.full_secs - rhs.full_secs, self.frac_secs - rhs.frac_secs)
    }
}

impl Add<Duration> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: Duration) -> TimeSpec {
        TimeSpec::new(
            self.full_secs + rhs.as_secs() as i64,
            self.frac_secs + rhs.subsec_nanos() as f64 * 1e-9,
        )
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9} s", self.real_secs())
    }
}

/// Frequency reference source for the device oscillator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefSource {
    #[default]
    Internal,
    External,
    Mimo,
    Gpsdo,
}

/// Source of the pulse-per-second edge that latches the time registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PpsSource {
    #[default]
    Internal,
    External,
    Mimo,
    Gpsdo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PpsPolarity {
    #[default]
    Positive,
    Negative,
}

macro_rules! source_strings {
    ($ty:ident) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $ty::Internal => "internal",
                    $ty::External => "external",
                    $ty::Mimo => "mimo",
                    $ty::Gpsdo => "gpsdo",
                }
            }
        }

        impl FromStr for $ty {
            type Err = SdrError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    "internal" | "int" => Ok($ty::Internal),
                    "external" | "ext" | "sma" => Ok($ty::External),
                    "mimo" => Ok($ty::Mimo),
                    "gpsdo" => Ok($ty::Gpsdo),
                    other => Err(SdrError::config(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

source_strings!(RefSource);
source_strings!(PpsSource);

/// Device-wide clock and time synchronization setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub ref_source: RefSource,
    pub pps_source: PpsSource,
    pub pps_polarity: PpsPolarity,
}

impl ClockConfig {
    /// Lock both the reference and PPS to the external SMA inputs.
    pub fn external() -> Self {
        Self {
            ref_source: RefSource::External,
            pps_source: PpsSource::External,
            pps_polarity: PpsPolarity::Positive,
        }
    }
}

/// Host-side sample format delivered by the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    /// Complex float32, full scale +/-1.0
    #[default]
    Fc32,
    /// Complex int16, interleaved I/Q
    Sc16,
}

impl IoType {
    /// UHD cpu format name
    pub fn cpu_format(&self) -> &'static str {
        match self {
            IoType::Fc32 => "fc32",
            IoType::Sc16 => "sc16",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            IoType::Fc32 => 8,
            IoType::Sc16 => 4,
        }
    }
}

impl FromStr for IoType {
    type Err = SdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fc32" | "complex_float32" => Ok(IoType::Fc32),
            "sc16" | "complex_int16" => Ok(IoType::Sc16),
            other => Err(SdrError::config(format!(
                "unknown io type '{}' (use fc32 or sc16)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
    NumSampsAndDone(usize),
}

/// Streaming command sent to the device DSP chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamCmd {
    pub mode: StreamMode,
    pub stream_now: bool,
    /// Start time when `stream_now` is false
    pub time_spec: TimeSpec,
}

impl StreamCmd {
    pub fn start_now() -> Self {
        Self {
            mode: StreamMode::StartContinuous,
            stream_now: true,
            time_spec: TimeSpec::default(),
        }
    }

    pub fn stop_now() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            stream_now: true,
            time_spec: TimeSpec::default(),
        }
    }
}

/// Receive-side condition reported alongside each packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RxErrorCode {
    #[default]
    None,
    Timeout,
    LateCommand,
    BrokenChain,
    Overflow,
    Alignment,
    BadPacket,
}

impl RxErrorCode {
    /// Map a UHD `uhd_rx_metadata_error_code_t` value.
    pub fn from_uhd(code: i32) -> Self {
        match code {
            0x0 => RxErrorCode::None,
            0x1 => RxErrorCode::Timeout,
            0x2 => RxErrorCode::LateCommand,
            0x4 => RxErrorCode::BrokenChain,
            0x8 => RxErrorCode::Overflow,
            0xC => RxErrorCode::Alignment,
            _ => RxErrorCode::BadPacket,
        }
    }
}

/// Metadata for one receive call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxMetadata {
    /// Samples written per channel
    pub num_samps: usize,
    /// Device time of the first sample, when the packet carried one
    pub time_spec: Option<TimeSpec>,
    pub error_code: RxErrorCode,
}
