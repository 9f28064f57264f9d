// Copyright 2025-2026 CEMAXECUTER LLC

//! In-process model of a two-channel USRP receiver (default spec `A:A A:B`).
//!
//! Behaves like a B210-class device for everything the source touches:
//! sample rates quantized to integer decimations of the master clock, an
//! LO on a fixed grid with the DSP mixer covering the remainder, stepped
//! gain, two antenna ports, and a device clock with PPS-latched time
//! registers. Samples are a synthetic tone delivered as fast as they are
//! requested. Used by the tests and by `type=sim` device addresses.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use num_complex::Complex32;

use crate::addr::{DeviceAddr, SubdevPair, SubdevSpec};
use crate::device::{DeviceInfo, UsrpDevice};
use crate::error::{Result, SdrError};
use crate::types::{
    ClockConfig, IoType, MetaRange, PpsSource, RefSource, RxErrorCode, RxMetadata, StreamCmd,
    StreamMode, TimeSpec, TunePolicy, TuneRequest, TuneResult,
};
use crate::Samples;

const DEFAULT_MASTER_CLOCK: f64 = 32e6;
const MAX_DECIMATION: f64 = 1024.0;
const FREQ_MIN: f64 = 70e6;
const FREQ_MAX: f64 = 6e9;
/// LO synthesizer grid
const LO_STEP: f64 = 100e3;
const GAIN_MAX: f64 = 76.0;
const GAIN_STEP: f64 = 1.0;
const BW_MIN: f64 = 200e3;
const BW_MAX: f64 = 56e6;
const PACKET_SAMPS: usize = 2040;
const FRONTENDS: [&str; 2] = ["A", "B"];
const ANTENNAS: [&str; 2] = ["TX/RX", "RX2"];

#[derive(Debug, Clone)]
struct ChanState {
    frontend: String,
    rf_freq: f64,
    dsp_freq: f64,
    gain: f64,
    antenna: String,
    bandwidth: f64,
}

impl ChanState {
    fn new(frontend: &str) -> Self {
        Self {
            frontend: frontend.to_string(),
            rf_freq: 1e9,
            dsp_freq: 0.0,
            gain: 0.0,
            antenna: "RX2".to_string(),
            bandwidth: BW_MAX,
        }
    }
}

/// Device clock: a base time anchored to a host instant, plus an optional
/// time waiting to be latched on the next PPS edge.
#[derive(Debug, Clone)]
struct SimClock {
    base: TimeSpec,
    base_at: Instant,
    pps_epoch: Instant,
    pps_period: Duration,
    pending: Option<(TimeSpec, Instant)>,
}

impl SimClock {
    fn new(pps_period: Duration) -> Self {
        let now = Instant::now();
        Self {
            base: TimeSpec::default(),
            base_at: now,
            pps_epoch: now,
            pps_period,
            pending: None,
        }
    }

    fn signed_secs(from: Instant, to: Instant) -> f64 {
        if to >= from {
            (to - from).as_secs_f64()
        } else {
            -(from - to).as_secs_f64()
        }
    }

    fn time_at(&self, at: Instant) -> TimeSpec {
        match self.pending {
            Some((time, edge)) if at >= edge => time + (at - edge),
            _ => self.base + TimeSpec::from_secs(Self::signed_secs(self.base_at, at)),
        }
    }

    fn last_edge(&self, at: Instant) -> Instant {
        let period = self.pps_period.as_nanos().max(1);
        let elapsed = at.saturating_duration_since(self.pps_epoch).as_nanos();
        let edge = (elapsed / period) * period;
        self.pps_epoch + Duration::from_nanos(edge as u64)
    }

    fn next_edge(&self, at: Instant) -> Instant {
        self.last_edge(at) + self.pps_period
    }

    /// Fold a latched PPS time into the base so later calls see it directly.
    fn settle(&mut self, at: Instant) {
        if let Some((time, edge)) = self.pending {
            if at >= edge {
                self.base = time;
                self.base_at = edge;
                self.pending = None;
            }
        }
    }

    fn set_now(&mut self, time: TimeSpec) {
        self.base = time;
        self.base_at = Instant::now();
        self.pending = None;
    }

    fn set_next_pps(&mut self, time: TimeSpec) {
        let now = Instant::now();
        self.settle(now);
        self.pending = Some((time, self.next_edge(now)));
    }
}

#[derive(Debug, Clone)]
struct StreamState {
    io_type: IoType,
    channels: Vec<usize>,
    active: bool,
    start_time: TimeSpec,
    /// Samples produced since the stream command
    sample_count: u64,
    remaining: Option<usize>,
}

/// Simulated device; see the module docs.
#[derive(Debug)]
pub struct SimDevice {
    master_clock: f64,
    decimation: f64,
    chans: Vec<ChanState>,
    clock_config: ClockConfig,
    has_gpsdo: bool,
    clock: SimClock,
    stream: Option<StreamState>,
    tone_offset: f64,
    injected: VecDeque<RxErrorCode>,
    connected: bool,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            master_clock: DEFAULT_MASTER_CLOCK,
            decimation: 32.0,
            chans: FRONTENDS.iter().map(|fe| ChanState::new(fe)).collect(),
            clock_config: ClockConfig::default(),
            has_gpsdo: false,
            clock: SimClock::new(Duration::from_secs(1)),
            stream: None,
            tone_offset: 100e3,
            injected: VecDeque::new(),
            connected: true,
        }
    }

    /// Build from a device address. Recognized keys: `master_clock_rate`,
    /// `pps_period` (seconds), `gpsdo`, `tone` (Hz offset of the synthetic tone).
    pub fn open(addr: &DeviceAddr) -> Result<Self> {
        let mut dev = Self::new();
        if let Some(mcr) = addr.get_parsed::<f64>("master_clock_rate")? {
            if !(mcr.is_finite() && mcr > 0.0) {
                return Err(SdrError::config(format!("invalid master_clock_rate {}", mcr)));
            }
            dev.master_clock = mcr;
        }
        if let Some(period) = addr.get_parsed::<f64>("pps_period")? {
            if !(period.is_finite() && period > 0.0) {
                return Err(SdrError::config(format!("invalid pps_period {}", period)));
            }
            dev.clock = SimClock::new(Duration::from_secs_f64(period));
        }
        if let Some(tone) = addr.get_parsed::<f64>("tone")? {
            dev.tone_offset = tone;
        }
        dev.has_gpsdo = addr.has_key("gpsdo");
        log::debug!("sim device opened ({})", addr);
        Ok(dev)
    }

    pub fn info() -> DeviceInfo {
        let mut addr = DeviceAddr::new();
        addr.set("type", "sim");
        addr.set("serial", "SIM0001");
        addr.set("product", "SIM210");
        DeviceInfo {
            serial: "SIM0001".to_string(),
            product: "SIM210".to_string(),
            device_type: "sim".to_string(),
            addr,
        }
    }

    /// Shorten the PPS period so tests need not wait whole seconds.
    pub fn with_pps_period(mut self, period: Duration) -> Self {
        self.clock = SimClock::new(period);
        self
    }

    /// Make subsequent `recv` calls report these conditions, in order.
    pub fn inject_rx_errors(&mut self, codes: &[RxErrorCode]) {
        self.injected.extend(codes.iter().copied());
    }

    /// Drop the control link: every later call fails.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn clock_config(&self) -> ClockConfig {
        self.clock_config
    }

    fn link(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(SdrError::comm("sim device disconnected"))
        }
    }

    fn chan(&self, chan: usize) -> Result<&ChanState> {
        self.link()?;
        self.chans.get(chan).ok_or_else(|| {
            SdrError::config(format!("channel {} not mapped by subdev spec", chan))
        })
    }

    fn chan_mut(&mut self, chan: usize) -> Result<&mut ChanState> {
        self.link()?;
        self.chans.get_mut(chan).ok_or_else(|| {
            SdrError::config(format!("channel {} not mapped by subdev spec", chan))
        })
    }

    fn rate(&self) -> f64 {
        self.master_clock / self.decimation
    }

    fn dsp_range(&self) -> MetaRange {
        let half = self.master_clock / 2.0;
        MetaRange::single(-half, half, 0.0)
    }

    fn dsp_resolution(&self) -> f64 {
        self.master_clock / 4_294_967_296.0
    }

    fn freq_range() -> MetaRange {
        MetaRange::single(FREQ_MIN, FREQ_MAX, 0.0)
    }

    fn frontend_name(pair: &SubdevPair) -> Result<String> {
        if pair.db_name != "A" {
            return Err(SdrError::config(format!(
                "no daughterboard in slot '{}' (available: A)",
                pair.db_name
            )));
        }
        let sd = match pair.sd_name.as_str() {
            "" | "0" => "A",
            other => other,
        };
        if !FRONTENDS.contains(&sd) {
            return Err(SdrError::config(format!(
                "no front-end '{}' on daughterboard A (available: {})",
                sd,
                FRONTENDS.join(", ")
            )));
        }
        Ok(sd.to_string())
    }

    fn fill(&self, bufs: &mut [Samples], start: u64, n: usize) {
        let rate = self.rate();
        let step = 2.0 * PI * self.tone_offset / rate;
        for (ch, buf) in bufs.iter_mut().enumerate() {
            // channels differ by a fixed phase so they can be told apart
            let phase0 = ch as f64 * PI / 4.0;
            match buf {
                Samples::Fc32(v) => {
                    for (k, out) in v.iter_mut().take(n).enumerate() {
                        let ph = phase0 + step * (start + k as u64) as f64;
                        *out = Complex32::new((0.5 * ph.cos()) as f32, (0.5 * ph.sin()) as f32);
                    }
                }
                Samples::Sc16(v) => {
                    for k in 0..n {
                        let ph = phase0 + step * (start + k as u64) as f64;
                        v[2 * k] = (16383.0 * ph.cos()) as i16;
                        v[2 * k + 1] = (16383.0 * ph.sin()) as i16;
                    }
                }
            }
        }
    }
}

impl UsrpDevice for SimDevice {
    fn num_channels(&self) -> Result<usize> {
        self.link()?;
        Ok(self.chans.len())
    }

    fn mboard_name(&self) -> Result<String> {
        self.link()?;
        Ok("SIM210".to_string())
    }

    fn set_subdev_spec(&mut self, spec: &SubdevSpec) -> Result<()> {
        self.link()?;
        if spec.len() > FRONTENDS.len() {
            return Err(SdrError::config(format!(
                "subdev spec '{}' maps {} channels, device has {} front-ends",
                spec,
                spec.len(),
                FRONTENDS.len()
            )));
        }

        let mut names = Vec::with_capacity(spec.len());
        for pair in spec.pairs() {
            let name = Self::frontend_name(pair)?;
            if names.contains(&name) {
                return Err(SdrError::config(format!(
                    "front-end A:{} appears twice in '{}'",
                    name, spec
                )));
            }
            names.push(name);
        }

        // keep settings of front-ends that stay mapped
        let old = std::mem::take(&mut self.chans);
        self.chans = names
            .iter()
            .map(|name| {
                old.iter()
                    .find(|c| &c.frontend == name)
                    .cloned()
                    .unwrap_or_else(|| ChanState::new(name))
            })
            .collect();
        self.stream = None;
        Ok(())
    }

    fn subdev_spec(&self) -> Result<SubdevSpec> {
        self.link()?;
        let markup: Vec<String> = self.chans.iter().map(|c| format!("A:{}", c.frontend)).collect();
        markup.join(" ").parse()
    }

    fn set_rx_rate(&mut self, rate: f64) -> Result<()> {
        self.link()?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SdrError::config(format!("invalid sample rate {}", rate)));
        }
        self.decimation = (self.master_clock / rate).round().clamp(1.0, MAX_DECIMATION);
        Ok(())
    }

    fn rx_rate(&self) -> Result<f64> {
        self.link()?;
        Ok(self.rate())
    }

    fn set_rx_freq(&mut self, request: &TuneRequest, chan: usize) -> Result<TuneResult> {
        let state = self.chan(chan)?.clone();
        let freq_range = Self::freq_range();

        let target_rf_freq = match request.rf_policy {
            TunePolicy::Auto => request.target_freq,
            TunePolicy::Manual => request.rf_freq,
            TunePolicy::None => state.rf_freq,
        };
        let clipped_rf_freq = freq_range.clip(target_rf_freq, false);
        let actual_rf_freq = freq_range.clip((clipped_rf_freq / LO_STEP).round() * LO_STEP, false);

        let target_dsp_freq = match request.dsp_policy {
            TunePolicy::Auto => request.target_freq - actual_rf_freq,
            TunePolicy::Manual => request.dsp_freq,
            TunePolicy::None => state.dsp_freq,
        };
        let res = self.dsp_resolution();
        let actual_dsp_freq = (self.dsp_range().clip(target_dsp_freq, false) / res).round() * res;

        let st = self.chan_mut(chan)?;
        st.rf_freq = actual_rf_freq;
        st.dsp_freq = actual_dsp_freq;

        Ok(TuneResult {
            clipped_rf_freq,
            target_rf_freq,
            actual_rf_freq,
            target_dsp_freq,
            actual_dsp_freq,
        })
    }

    fn rx_freq(&self, chan: usize) -> Result<f64> {
        let st = self.chan(chan)?;
        Ok(st.rf_freq + st.dsp_freq)
    }

    fn rx_freq_range(&self, chan: usize) -> Result<MetaRange> {
        self.chan(chan)?;
        Ok(Self::freq_range())
    }

    fn set_rx_gain(&mut self, gain: f64, chan: usize) -> Result<()> {
        let range = self.rx_gain_range(chan)?;
        self.chan_mut(chan)?.gain = range.clip(gain, true);
        Ok(())
    }

    fn rx_gain(&self, chan: usize) -> Result<f64> {
        Ok(self.chan(chan)?.gain)
    }

    fn rx_gain_range(&self, chan: usize) -> Result<MetaRange> {
        self.chan(chan)?;
        Ok(MetaRange::single(0.0, GAIN_MAX, GAIN_STEP))
    }

    fn set_rx_antenna(&mut self, ant: &str, chan: usize) -> Result<()> {
        let st = self.chan_mut(chan)?;
        if !ANTENNAS.contains(&ant) {
            return Err(SdrError::config(format!("invalid antenna '{}'", ant)));
        }
        st.antenna = ant.to_string();
        Ok(())
    }

    fn rx_antenna(&self, chan: usize) -> Result<String> {
        Ok(self.chan(chan)?.antenna.clone())
    }

    fn rx_antennas(&self, chan: usize) -> Result<Vec<String>> {
        self.chan(chan)?;
        Ok(ANTENNAS.iter().map(|a| a.to_string()).collect())
    }

    fn set_rx_bandwidth(&mut self, bandwidth: f64, chan: usize) -> Result<()> {
        let range = self.rx_bandwidth_range(chan)?;
        self.chan_mut(chan)?.bandwidth = range.clip(bandwidth, true);
        Ok(())
    }

    fn rx_bandwidth(&self, chan: usize) -> Result<f64> {
        Ok(self.chan(chan)?.bandwidth)
    }

    fn rx_bandwidth_range(&self, chan: usize) -> Result<MetaRange> {
        self.chan(chan)?;
        Ok(MetaRange::single(BW_MIN, BW_MAX, 0.0))
    }

    fn set_clock_config(&mut self, config: &ClockConfig) -> Result<()> {
        self.link()?;
        if config.ref_source == RefSource::Mimo || config.pps_source == PpsSource::Mimo {
            return Err(SdrError::config("MIMO clocking needs a MIMO cable; none detected"));
        }
        let wants_gpsdo =
            config.ref_source == RefSource::Gpsdo || config.pps_source == PpsSource::Gpsdo;
        if wants_gpsdo && !self.has_gpsdo {
            return Err(SdrError::config("no GPSDO installed"));
        }
        self.clock_config = *config;
        Ok(())
    }

    fn time_now(&self) -> Result<TimeSpec> {
        self.link()?;
        Ok(self.clock.time_at(Instant::now()))
    }

    fn time_last_pps(&self) -> Result<TimeSpec> {
        self.link()?;
        let edge = self.clock.last_edge(Instant::now());
        Ok(self.clock.time_at(edge))
    }

    fn set_time_now(&mut self, time: TimeSpec) -> Result<()> {
        self.link()?;
        self.clock.set_now(time);
        Ok(())
    }

    fn set_time_next_pps(&mut self, time: TimeSpec) -> Result<()> {
        self.link()?;
        self.clock.set_next_pps(time);
        Ok(())
    }

    fn setup_rx_stream(&mut self, io_type: IoType, channels: &[usize]) -> Result<usize> {
        self.link()?;
        if channels.is_empty() {
            return Err(SdrError::config("stream needs at least one channel"));
        }
        if let Some(bad) = channels.iter().find(|c| **c >= self.chans.len()) {
            return Err(SdrError::config(format!(
                "cannot stream channel {}: only {} mapped",
                bad,
                self.chans.len()
            )));
        }
        self.stream = Some(StreamState {
            io_type,
            channels: channels.to_vec(),
            active: false,
            start_time: TimeSpec::default(),
            sample_count: 0,
            remaining: None,
        });
        Ok(PACKET_SAMPS)
    }

    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<()> {
        self.link()?;
        let now = self.clock.time_at(Instant::now());
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SdrError::config("no rx streamer set up"))?;
        match cmd.mode {
            StreamMode::StopContinuous => stream.active = false,
            StreamMode::StartContinuous | StreamMode::NumSampsAndDone(_) => {
                stream.active = true;
                stream.start_time = if cmd.stream_now { now } else { cmd.time_spec };
                stream.sample_count = 0;
                stream.remaining = match cmd.mode {
                    StreamMode::NumSampsAndDone(n) => Some(n),
                    _ => None,
                };
            }
        }
        Ok(())
    }

    fn recv(&mut self, bufs: &mut [Samples], _timeout: f64) -> Result<RxMetadata> {
        self.link()?;
        let rate = self.rate();
        let Some(stream) = self.stream.as_mut() else {
            return Err(SdrError::config("no rx streamer set up"));
        };
        if bufs.len() != stream.channels.len() {
            return Err(SdrError::config(format!(
                "recv got {} buffers for {} streamed channels",
                bufs.len(),
                stream.channels.len()
            )));
        }
        if bufs.iter().any(|b| b.io_type() != stream.io_type) {
            return Err(SdrError::config("recv buffer format does not match the streamer"));
        }

        if let Some(code) = self.injected.pop_front() {
            if code == RxErrorCode::Overflow {
                // the samples that did not fit are lost
                stream.sample_count += PACKET_SAMPS as u64;
            }
            return Ok(RxMetadata {
                num_samps: 0,
                time_spec: None,
                error_code: code,
            });
        }

        if !stream.active || stream.remaining == Some(0) {
            return Ok(RxMetadata {
                num_samps: 0,
                time_spec: None,
                error_code: RxErrorCode::Timeout,
            });
        }

        let mut n = bufs.iter().map(|b| b.len()).min().unwrap_or(0).min(PACKET_SAMPS);
        if let Some(rem) = stream.remaining.as_mut() {
            n = n.min(*rem);
            *rem -= n;
        }
        let start = stream.sample_count;
        let time_spec = stream.start_time + TimeSpec::from_ticks(start, rate);
        stream.sample_count += n as u64;

        self.fill(bufs, start, n);

        Ok(RxMetadata {
            num_samps: n,
            time_spec: Some(time_spec),
            error_code: RxErrorCode::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_quantized_to_decimation() {
        let mut dev = SimDevice::new();
        dev.set_rx_rate(3e6).unwrap();
        // 32e6 / 3e6 = 10.67 -> decimation 11
        let actual = dev.rx_rate().unwrap();
        assert!((actual - 32e6 / 11.0).abs() < 1e-6, "rate = {}", actual);

        dev.set_rx_rate(1.0).unwrap();
        assert_eq!(dev.rx_rate().unwrap(), 32e6 / MAX_DECIMATION);
        assert!(dev.set_rx_rate(-1.0).is_err());
    }

    #[test]
    fn test_tune_splits_lo_and_dsp() {
        let mut dev = SimDevice::new();
        let res = dev.set_rx_freq(&TuneRequest::new(915.03e6), 0).unwrap();
        assert_eq!(res.actual_rf_freq, 915.0e6);
        assert!((res.actual_dsp_freq - 30e3).abs() < 1.0);
        assert!((dev.rx_freq(0).unwrap() - 915.03e6).abs() < 1.0);
    }

    #[test]
    fn test_tune_clips_to_range() {
        let mut dev = SimDevice::new();
        let res = dev.set_rx_freq(&TuneRequest::new(10e6), 0).unwrap();
        assert_eq!(res.clipped_rf_freq, FREQ_MIN);
        assert_eq!(res.actual_rf_freq, FREQ_MIN);
    }

    #[test]
    fn test_tune_policy_none_keeps_lo() {
        let mut dev = SimDevice::new();
        dev.set_rx_freq(&TuneRequest::new(2.4e9), 0).unwrap();
        let req = TuneRequest {
            target_freq: 2.401e9,
            rf_policy: TunePolicy::None,
            rf_freq: 0.0,
            dsp_policy: TunePolicy::Auto,
            dsp_freq: 0.0,
        };
        let res = dev.set_rx_freq(&req, 0).unwrap();
        assert_eq!(res.actual_rf_freq, 2.4e9);
        assert!((res.actual_dsp_freq - 1e6).abs() < 1.0);
    }

    #[test]
    fn test_subdev_spec_maps_channels() {
        let mut dev = SimDevice::new();
        assert_eq!(dev.subdev_spec().unwrap().to_string(), "A:A A:B");
        dev.set_rx_gain(20.0, 0).unwrap();
        dev.set_subdev_spec(&"A:B A:A".parse().unwrap()).unwrap();
        assert_eq!(dev.num_channels().unwrap(), 2);
        // front-end A keeps its gain on its new channel
        assert_eq!(dev.rx_gain(1).unwrap(), 20.0);
        assert_eq!(dev.rx_gain(0).unwrap(), 0.0);

        dev.set_subdev_spec(&"A:0".parse().unwrap()).unwrap();
        assert_eq!(dev.num_channels().unwrap(), 1);
        assert!(dev.rx_gain(1).is_err());

        assert!(dev.set_subdev_spec(&"B:0".parse().unwrap()).is_err());
        assert!(dev.set_subdev_spec(&"A:C".parse().unwrap()).is_err());
        assert!(dev.set_subdev_spec(&"A:A A:A".parse().unwrap()).is_err());
    }

    #[test]
    fn test_clock_config_requires_hardware() {
        let mut dev = SimDevice::new();
        assert!(dev.set_clock_config(&ClockConfig::external()).is_ok());
        assert_eq!(dev.clock_config().ref_source, RefSource::External);
        let gps = ClockConfig {
            ref_source: RefSource::Gpsdo,
            ..ClockConfig::default()
        };
        assert!(dev.set_clock_config(&gps).is_err());

        let mut with_gps = SimDevice::open(&"type=sim,gpsdo".parse().unwrap()).unwrap();
        assert!(with_gps.set_clock_config(&gps).is_ok());
    }

    #[test]
    fn test_pps_latches_time() {
        let mut dev = SimDevice::new().with_pps_period(Duration::from_millis(20));
        dev.set_time_now(TimeSpec::new(500, 0.0)).unwrap();
        dev.set_time_next_pps(TimeSpec::new(0, 0.0)).unwrap();
        // before the edge the old timeline continues
        std::thread::sleep(Duration::from_millis(50));
        let now = dev.time_now().unwrap();
        assert!(now.real_secs() < 1.0, "time after pps = {}", now);
        let last = dev.time_last_pps().unwrap();
        assert_eq!(last.full_secs, 0);
        assert!(last.frac_secs < 0.05);
    }

    #[test]
    fn test_recv_timestamps_follow_sample_count() {
        let mut dev = SimDevice::new();
        dev.set_rx_rate(1e6).unwrap();
        dev.set_time_now(TimeSpec::new(10, 0.0)).unwrap();
        let max = dev.setup_rx_stream(IoType::Fc32, &[0]).unwrap();
        let mut bufs = vec![Samples::zeroed(IoType::Fc32, max)];

        // not started yet
        let md = dev.recv(&mut bufs, 0.1).unwrap();
        assert_eq!(md.error_code, RxErrorCode::Timeout);

        let cmd = StreamCmd {
            mode: StreamMode::StartContinuous,
            stream_now: false,
            time_spec: TimeSpec::new(20, 0.0),
        };
        dev.issue_stream_cmd(&cmd).unwrap();
        let first = dev.recv(&mut bufs, 0.1).unwrap();
        assert_eq!(first.num_samps, max);
        assert_eq!(first.time_spec, Some(TimeSpec::new(20, 0.0)));

        let second = dev.recv(&mut bufs, 0.1).unwrap();
        let t = second.time_spec.unwrap();
        assert!((t.real_secs() - (20.0 + max as f64 / 1e6)).abs() < 1e-9);
    }

    #[test]
    fn test_num_samps_and_done() {
        let mut dev = SimDevice::new();
        dev.setup_rx_stream(IoType::Sc16, &[0]).unwrap();
        let cmd = StreamCmd {
            mode: StreamMode::NumSampsAndDone(100),
            stream_now: true,
            time_spec: TimeSpec::default(),
        };
        dev.issue_stream_cmd(&cmd).unwrap();
        let mut bufs = vec![Samples::zeroed(IoType::Sc16, 64)];
        assert_eq!(dev.recv(&mut bufs, 0.1).unwrap().num_samps, 64);
        assert_eq!(dev.recv(&mut bufs, 0.1).unwrap().num_samps, 36);
        assert_eq!(dev.recv(&mut bufs, 0.1).unwrap().error_code, RxErrorCode::Timeout);
    }

    #[test]
    fn test_disconnect_fails_every_call() {
        let mut dev = SimDevice::new();
        dev.disconnect();
        assert!(matches!(dev.rx_rate(), Err(SdrError::HardwareCommunication(_))));
        assert!(matches!(
            dev.set_rx_gain(1.0, 0),
            Err(SdrError::HardwareCommunication(_))
        ));
    }
}
