// Copyright 2025-2026 CEMAXECUTER LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::Sender;

use crate::addr::{DeviceAddr, SubdevSpec};
use crate::config::SourceConfig;
use crate::device::UsrpDevice;
use crate::error::{Result, SdrError};
use crate::sim::SimDevice;
use crate::types::{
    ClockConfig, IoType, MetaRange, RxErrorCode, StreamCmd, TimeSpec, TuneRequest, TuneResult,
};
use crate::{SampleBuf, Samples, SdrSource};

/// Seconds one receive call may block before reporting a timeout
const RECV_TIMEOUT: f64 = 3.0;

/// Configuration surface of a USRP receive source.
///
/// Every call is a synchronous round trip to the device and errors are
/// returned as-is, never retried. Per-channel calls reject
/// `chan >= get_num_channels()` with [`SdrError::ChannelOutOfRange`]
/// before the device is touched.
///
/// Calls take `&mut self`: the device control link is not safe to share,
/// so concurrent callers must go through one lock (see [`SharedSource`]).
pub trait UsrpSource: SdrSource {
    /// Apply a subdevice routing string such as `"A:A A:B"`.
    fn set_subdev_spec(&mut self, spec: &str) -> Result<()>;
    fn get_subdev_spec(&self) -> Result<String>;

    /// Request a sample rate. The device may pick a nearby rate; read it
    /// back with `get_samp_rate`.
    fn set_samp_rate(&mut self, rate: f64) -> Result<()>;
    /// Actual sample rate in Sps
    fn get_samp_rate(&self) -> Result<f64>;

    fn set_center_freq(&mut self, request: TuneRequest, chan: usize) -> Result<TuneResult>;

    /// Tune to a bare frequency in Hz.
    fn set_center_freq_hz(&mut self, freq: f64, chan: usize) -> Result<TuneResult> {
        self.set_center_freq(TuneRequest::new(freq), chan)
    }

    fn get_center_freq(&self, chan: usize) -> Result<f64>;
    fn get_freq_range(&self, chan: usize) -> Result<MetaRange>;

    /// Set the gain in dB. Values outside `get_gain_range` are clipped to it.
    fn set_gain(&mut self, gain: f64, chan: usize) -> Result<()>;
    fn get_gain(&self, chan: usize) -> Result<f64>;
    fn get_gain_range(&self, chan: usize) -> Result<MetaRange>;

    /// Select an antenna port; it must be one of `get_antennas(chan)`.
    fn set_antenna(&mut self, ant: &str, chan: usize) -> Result<()>;
    fn get_antenna(&self, chan: usize) -> Result<String>;
    fn get_antennas(&self, chan: usize) -> Result<Vec<String>>;

    fn set_bandwidth(&mut self, bandwidth: f64, chan: usize) -> Result<()>;
    fn get_bandwidth(&self, chan: usize) -> Result<f64>;
    fn get_bandwidth_range(&self, chan: usize) -> Result<MetaRange>;

    /// Device-wide reference and PPS selection.
    fn set_clock_config(&mut self, config: &ClockConfig) -> Result<()>;

    fn get_time_now(&self) -> Result<TimeSpec>;
    fn get_time_last_pps(&self) -> Result<TimeSpec>;
    /// Set the time registers as soon as possible.
    fn set_time_now(&mut self, time: TimeSpec) -> Result<()>;
    /// Set the time registers at the next PPS edge. Use this to align
    /// several devices sharing a PPS.
    fn set_time_next_pps(&mut self, time: TimeSpec) -> Result<()>;

    fn get_num_channels(&self) -> usize;
    fn get_mboard_name(&self) -> Result<String>;

    /// Raw device handle for operations this trait does not cover.
    fn device(&mut self) -> &mut dyn UsrpDevice;

    /// Stop handle for the `start` loop. Clearing it ends the stream
    /// without taking the source's lock, which `start` holds while it runs.
    fn running_flag(&self) -> Arc<AtomicBool>;

    /// Apply a full configuration. Stops at the first failing setting.
    fn apply_config(&mut self, config: &SourceConfig) -> Result<()> {
        let num_channels = self.get_num_channels();
        if config.channels.len() > num_channels {
            return Err(SdrError::ChannelOutOfRange {
                chan: config.channels.len() - 1,
                num_channels,
            });
        }

        if let Some(clock) = &config.clock {
            self.set_clock_config(clock)?;
        }
        if let Some(spec) = &config.subdev_spec {
            self.set_subdev_spec(spec)?;
        }
        if let Some(rate) = config.samp_rate {
            self.set_samp_rate(rate)?;
        }
        for (chan, ch) in config.channels.iter().enumerate() {
            if let Some(ant) = &ch.antenna {
                self.set_antenna(ant, chan)?;
            }
            if let Some(bw) = ch.bandwidth {
                self.set_bandwidth(bw, chan)?;
            }
            if let Some(gain) = ch.gain {
                self.set_gain(gain, chan)?;
            }
            if let Some(req) = ch.tune_request() {
                self.set_center_freq(req, chan)?;
            }
        }
        Ok(())
    }
}

/// A source behind one lock, as handed out by [`make_single_usrp_source`].
pub type SharedSource = Arc<Mutex<dyn UsrpSource>>;

/// Open the device at `device_addr` and wrap it in a source delivering
/// `num_channels` channels of `io_type` samples.
///
/// `type=sim` in the address selects the simulated device; anything else
/// needs the `usrp` feature.
pub fn make_single_usrp_source(
    device_addr: &str,
    io_type: IoType,
    num_channels: usize,
) -> Result<SharedSource> {
    let addr: DeviceAddr = device_addr.parse()?;

    if addr.is_sim() {
        let dev = SimDevice::open(&addr)?;
        let source: SharedSource = Arc::new(Mutex::new(SingleUsrpSource::new(
            dev,
            io_type,
            num_channels,
        )?));
        return Ok(source);
    }

    open_hardware(&addr, io_type, num_channels)
}

#[cfg(feature = "usrp")]
fn open_hardware(addr: &DeviceAddr, io_type: IoType, num_channels: usize) -> Result<SharedSource> {
    let dev = crate::usrp::UhdDevice::open(addr)?;
    let source: SharedSource = Arc::new(Mutex::new(SingleUsrpSource::new(
        dev,
        io_type,
        num_channels,
    )?));
    Ok(source)
}

#[cfg(not(feature = "usrp"))]
fn open_hardware(addr: &DeviceAddr, _io_type: IoType, _num_channels: usize) -> Result<SharedSource> {
    Err(SdrError::unsupported(format!(
        "cannot open '{}': built without UHD support (enable the usrp feature or use type=sim)",
        addr
    )))
}

/// The USRP source: configuration facade plus the receive loop.
pub struct SingleUsrpSource<D: UsrpDevice> {
    dev: D,
    io_type: IoType,
    num_channels: usize,
    /// Last achieved rate and channel 0 frequency, for `SdrSource`
    samp_rate: f64,
    center_freq: f64,
    /// Samples per channel per receive call, fixed when the stream starts
    num_packet_samps: usize,
    bufs: Vec<Samples>,
    streaming: bool,
    /// Attach the device time to the next block
    tag_next: bool,
    overflow_count: u64,
    running: Arc<AtomicBool>,
}

impl<D: UsrpDevice> SingleUsrpSource<D> {
    pub fn new(dev: D, io_type: IoType, num_channels: usize) -> Result<Self> {
        if num_channels == 0 {
            return Err(SdrError::config("source needs at least one channel"));
        }
        let available = dev.num_channels()?;
        if num_channels > available {
            return Err(SdrError::config(format!(
                "requested {} channels, device maps {}",
                num_channels, available
            )));
        }

        let samp_rate = dev.rx_rate()?;
        let center_freq = dev.rx_freq(0)?;
        log::info!(
            "USRP source on {} ({} channels, {}, {:.3} MS/s)",
            dev.mboard_name()?,
            num_channels,
            io_type.cpu_format(),
            samp_rate / 1e6,
        );

        Ok(Self {
            dev,
            io_type,
            num_channels,
            samp_rate,
            center_freq,
            num_packet_samps: 0,
            bufs: Vec::new(),
            streaming: false,
            tag_next: false,
            overflow_count: 0,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Typed access to the device, for backend-specific calls.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn io_type(&self) -> IoType {
        self.io_type
    }

    /// Samples per channel per receive call (0 before the stream starts)
    pub fn num_packet_samps(&self) -> usize {
        self.num_packet_samps
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn check_chan(&self, chan: usize) -> Result<()> {
        if chan < self.num_channels {
            Ok(())
        } else {
            Err(SdrError::ChannelOutOfRange {
                chan,
                num_channels: self.num_channels,
            })
        }
    }

    /// Set up the streamer and start continuous streaming now.
    pub fn start_stream(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        let channels: Vec<usize> = (0..self.num_channels).collect();
        let max_samps = self.dev.setup_rx_stream(self.io_type, &channels)?;
        if max_samps == 0 {
            return Err(SdrError::comm("device reported a zero-sample packet size"));
        }
        self.num_packet_samps = max_samps;
        self.bufs = channels
            .iter()
            .map(|_| Samples::zeroed(self.io_type, max_samps))
            .collect();

        self.dev.issue_stream_cmd(&StreamCmd::start_now())?;
        self.streaming = true;
        self.tag_next = true;
        log::info!(
            "USRP streaming started ({:.3} MHz, {:.3} MS/s, {} samps/packet)",
            self.center_freq / 1e6,
            self.samp_rate / 1e6,
            max_samps,
        );
        Ok(())
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.dev.issue_stream_cmd(&StreamCmd::stop_now())
    }

    /// One receive step. Returns `None` on timeout or overflow; the block
    /// after an overflow carries a fresh timestamp.
    pub fn recv_block(&mut self) -> Result<Option<SampleBuf>> {
        if !self.streaming {
            return Err(SdrError::config("stream not started"));
        }

        let md = self.dev.recv(&mut self.bufs, RECV_TIMEOUT)?;
        match md.error_code {
            RxErrorCode::None => {}
            RxErrorCode::Timeout => return Ok(None),
            RxErrorCode::Overflow => {
                self.overflow_count += 1;
                self.tag_next = true;
                log::debug!("USRP overflow ({} total)", self.overflow_count);
                return Ok(None);
            }
            other => {
                return Err(SdrError::comm(format!("USRP receive error: {:?}", other)));
            }
        }

        let num_samples = md.num_samps;
        if num_samples == 0 {
            return Ok(None);
        }

        let time = if self.tag_next { md.time_spec } else { None };
        if time.is_some() {
            self.tag_next = false;
        }

        Ok(Some(SampleBuf {
            chans: self.bufs.iter().map(|b| b.head(num_samples)).collect(),
            num_samples,
            time,
        }))
    }
}

impl<D: UsrpDevice> SdrSource for SingleUsrpSource<D> {
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.start_stream()?;

        let mut result = Ok(());
        while self.running.load(Ordering::SeqCst) {
            match self.recv_block() {
                Ok(Some(buf)) => {
                    if tx.send(buf).is_err() {
                        break; // receiver dropped
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    log::error!("USRP streaming error: {}", e);
                    result = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = self.stop_stream() {
            log::warn!("USRP stop stream failed: {}", e);
        }
        if self.overflow_count > 0 {
            log::warn!("USRP: {} overflows during capture", self.overflow_count);
        }
        log::info!("USRP streaming stopped");
        result
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> f64 {
        self.samp_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

impl<D: UsrpDevice> UsrpSource for SingleUsrpSource<D> {
    fn set_subdev_spec(&mut self, spec: &str) -> Result<()> {
        let parsed: SubdevSpec = spec.parse()?;
        if parsed.len() < self.num_channels {
            return Err(SdrError::config(format!(
                "subdev spec '{}' maps {} channels, source needs {}",
                parsed,
                parsed.len(),
                self.num_channels
            )));
        }
        self.dev.set_subdev_spec(&parsed)?;
        // the device drops its streamer once a new mapping is accepted
        if self.streaming {
            self.streaming = false;
            log::warn!("USRP stream stopped by subdev spec change");
        }
        self.samp_rate = self.dev.rx_rate()?;
        self.center_freq = self.dev.rx_freq(0)?;
        log::info!("USRP subdev spec set to '{}'", parsed);
        Ok(())
    }

    fn get_subdev_spec(&self) -> Result<String> {
        Ok(self.dev.subdev_spec()?.to_string())
    }

    fn set_samp_rate(&mut self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SdrError::config(format!("invalid sample rate {}", rate)));
        }
        self.dev.set_rx_rate(rate)?;
        self.samp_rate = self.dev.rx_rate()?;
        if (self.samp_rate - rate).abs() > 1e-6 {
            log::info!(
                "USRP sample rate: requested {:.6} MS/s, actual {:.6} MS/s",
                rate / 1e6,
                self.samp_rate / 1e6
            );
        }
        Ok(())
    }

    fn get_samp_rate(&self) -> Result<f64> {
        self.dev.rx_rate()
    }

    fn set_center_freq(&mut self, request: TuneRequest, chan: usize) -> Result<TuneResult> {
        self.check_chan(chan)?;
        if !request.target_freq.is_finite() {
            return Err(SdrError::config(format!(
                "invalid target frequency {}",
                request.target_freq
            )));
        }

        let result = self.dev.set_rx_freq(&request, chan)?;
        if result.clipped_rf_freq != result.target_rf_freq {
            log::warn!(
                "USRP chan {}: RF target {:.6} MHz clipped to {:.6} MHz",
                chan,
                result.target_rf_freq / 1e6,
                result.clipped_rf_freq / 1e6
            );
        }
        log::info!("USRP chan {} tuned: {}", chan, result);

        if chan == 0 {
            self.center_freq = result.actual_freq();
        }
        Ok(result)
    }

    fn get_center_freq(&self, chan: usize) -> Result<f64> {
        self.check_chan(chan)?;
        self.dev.rx_freq(chan)
    }

    fn get_freq_range(&self, chan: usize) -> Result<MetaRange> {
        self.check_chan(chan)?;
        self.dev.rx_freq_range(chan)
    }

    fn set_gain(&mut self, gain: f64, chan: usize) -> Result<()> {
        self.check_chan(chan)?;
        if !gain.is_finite() {
            return Err(SdrError::config(format!("invalid gain {}", gain)));
        }
        let range = self.dev.rx_gain_range(chan)?;
        let clipped = range.clip(gain, true);
        if !range.contains(gain) {
            log::warn!(
                "USRP chan {}: gain {} dB outside {}, using {} dB",
                chan,
                gain,
                range,
                clipped
            );
        }
        self.dev.set_rx_gain(clipped, chan)
    }

    fn get_gain(&self, chan: usize) -> Result<f64> {
        self.check_chan(chan)?;
        self.dev.rx_gain(chan)
    }

    fn get_gain_range(&self, chan: usize) -> Result<MetaRange> {
        self.check_chan(chan)?;
        self.dev.rx_gain_range(chan)
    }

    fn set_antenna(&mut self, ant: &str, chan: usize) -> Result<()> {
        self.check_chan(chan)?;
        let antennas = self.dev.rx_antennas(chan)?;
        if !antennas.iter().any(|a| a == ant) {
            return Err(SdrError::config(format!(
                "antenna '{}' not available on channel {} (choose from: {})",
                ant,
                chan,
                antennas.join(", ")
            )));
        }
        self.dev.set_rx_antenna(ant, chan)?;
        log::info!("USRP chan {} antenna set to '{}'", chan, ant);
        Ok(())
    }

    fn get_antenna(&self, chan: usize) -> Result<String> {
        self.check_chan(chan)?;
        self.dev.rx_antenna(chan)
    }

    fn get_antennas(&self, chan: usize) -> Result<Vec<String>> {
        self.check_chan(chan)?;
        self.dev.rx_antennas(chan)
    }

    fn set_bandwidth(&mut self, bandwidth: f64, chan: usize) -> Result<()> {
        self.check_chan(chan)?;
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(SdrError::config(format!("invalid bandwidth {}", bandwidth)));
        }
        let range = self.dev.rx_bandwidth_range(chan)?;
        let clipped = range.clip(bandwidth, true);
        if !range.contains(bandwidth) {
            log::warn!(
                "USRP chan {}: bandwidth {:.3} MHz outside range, using {:.3} MHz",
                chan,
                bandwidth / 1e6,
                clipped / 1e6
            );
        }
        self.dev.set_rx_bandwidth(clipped, chan)
    }

    fn get_bandwidth(&self, chan: usize) -> Result<f64> {
        self.check_chan(chan)?;
        self.dev.rx_bandwidth(chan)
    }

    fn get_bandwidth_range(&self, chan: usize) -> Result<MetaRange> {
        self.check_chan(chan)?;
        self.dev.rx_bandwidth_range(chan)
    }

    fn set_clock_config(&mut self, config: &ClockConfig) -> Result<()> {
        self.dev.set_clock_config(config)?;
        log::info!(
            "USRP clock: ref={}, pps={} ({:?})",
            config.ref_source.as_str(),
            config.pps_source.as_str(),
            config.pps_polarity
        );
        Ok(())
    }

    fn get_time_now(&self) -> Result<TimeSpec> {
        self.dev.time_now()
    }

    fn get_time_last_pps(&self) -> Result<TimeSpec> {
        self.dev.time_last_pps()
    }

    fn set_time_now(&mut self, time: TimeSpec) -> Result<()> {
        self.dev.set_time_now(time)
    }

    fn set_time_next_pps(&mut self, time: TimeSpec) -> Result<()> {
        self.dev.set_time_next_pps(time)?;
        log::info!("USRP time will be set to {} at next PPS", time);
        Ok(())
    }

    fn get_num_channels(&self) -> usize {
        self.num_channels
    }

    fn get_mboard_name(&self) -> Result<String> {
        self.dev.mboard_name()
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn device(&mut self) -> &mut dyn UsrpDevice {
        &mut self.dev
    }
}

impl<D: UsrpDevice> Drop for SingleUsrpSource<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_stream() {
            log::warn!("USRP stop stream on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::types::{PpsSource, RefSource};
    use crossbeam::channel;
    use std::thread;

    fn sim_source(num_channels: usize) -> SingleUsrpSource<SimDevice> {
        SingleUsrpSource::new(SimDevice::new(), IoType::Fc32, num_channels).unwrap()
    }

    #[test]
    fn test_tune_is_idempotent_per_channel() {
        let mut src = sim_source(2);
        for chan in 0..2 {
            let first = src.set_center_freq_hz(2.41237e9, chan).unwrap();
            let again = src.set_center_freq_hz(2.41237e9, chan).unwrap();
            assert_eq!(first, again, "chan {} tune not idempotent", chan);
            let actual = src.get_center_freq(chan).unwrap();
            assert!((actual - 2.41237e9).abs() < 1.0, "chan {} at {}", chan, actual);
        }
        assert!((src.center_frequency() - 2.41237e9).abs() < 1.0);
    }

    #[test]
    fn test_tune_channels_are_independent() {
        let mut src = sim_source(2);
        src.set_center_freq_hz(915e6, 0).unwrap();
        src.set_center_freq_hz(433.92e6, 1).unwrap();
        assert!((src.get_center_freq(0).unwrap() - 915e6).abs() < 1.0);
        assert!((src.get_center_freq(1).unwrap() - 433.92e6).abs() < 1.0);
    }

    #[test]
    fn test_antenna_must_be_listed() {
        let mut src = sim_source(1);
        let antennas = src.get_antennas(0).unwrap();
        for ant in &antennas {
            src.set_antenna(ant, 0).unwrap();
            assert_eq!(&src.get_antenna(0).unwrap(), ant);
        }
        for bad in ["RX1", "", "rx2"] {
            let err = src.set_antenna(bad, 0).unwrap_err();
            assert!(
                matches!(err, SdrError::Configuration(_)),
                "antenna '{}' gave {:?}",
                bad,
                err
            );
        }
        assert_eq!(&src.get_antenna(0).unwrap(), antennas.last().unwrap());
    }

    #[test]
    fn test_sample_rate_quantization_bound() {
        let mut src = sim_source(1);
        let mcr = 32e6;
        for rate in [250e3, 1e6, 2.5e6, 3e6, 7.7e6, 20e6] {
            src.set_samp_rate(rate).unwrap();
            let actual = src.get_samp_rate().unwrap();
            // decimation rounding moves the divider by at most half a step
            assert!(
                (mcr / actual - mcr / rate).abs() <= 0.5,
                "requested {} got {}",
                rate,
                actual
            );
            assert_eq!(src.sample_rate(), actual);
        }

        src.set_samp_rate(1e6).unwrap();
        assert_eq!(src.get_samp_rate().unwrap(), 1e6);
        assert!(src.set_samp_rate(0.0).is_err());
        assert!(src.set_samp_rate(f64::NAN).is_err());
    }

    #[test]
    fn test_time_now_not_behind_set_value() {
        let mut src = sim_source(1);
        let t = TimeSpec::new(1_700_000_000, 0.25);
        src.set_time_now(t).unwrap();
        let now = src.get_time_now().unwrap();
        assert!(now >= t, "time went backwards: {} < {}", now, t);
        let later = src.get_time_now().unwrap();
        assert!(later >= now);
    }

    #[test]
    fn test_time_next_pps_applies_at_edge() {
        let dev = SimDevice::new().with_pps_period(std::time::Duration::from_millis(10));
        let mut src = SingleUsrpSource::new(dev, IoType::Fc32, 1).unwrap();
        src.set_time_now(TimeSpec::new(100, 0.0)).unwrap();
        src.set_time_next_pps(TimeSpec::new(0, 0.0)).unwrap();
        thread::sleep(std::time::Duration::from_millis(30));
        let now = src.get_time_now().unwrap();
        assert_eq!(now.full_secs, 0, "pps time not latched: {}", now);
    }

    #[test]
    fn test_out_of_range_channel_fails_without_side_effects() {
        let mut src = sim_source(1);
        src.set_gain(10.0, 0).unwrap();
        src.set_center_freq_hz(100e6, 0).unwrap();

        let expect_oob = |r: Result<()>| {
            assert_eq!(
                r.unwrap_err(),
                SdrError::ChannelOutOfRange { chan: 1, num_channels: 1 }
            );
        };
        expect_oob(src.set_gain(50.0, 1));
        expect_oob(src.set_antenna("TX/RX", 1));
        expect_oob(src.set_bandwidth(1e6, 1));
        expect_oob(src.set_center_freq_hz(2e9, 1).map(|_| ()));
        expect_oob(src.get_gain(1).map(|_| ()));
        expect_oob(src.get_antenna(1).map(|_| ()));
        expect_oob(src.get_antennas(1).map(|_| ()));
        expect_oob(src.get_center_freq(1).map(|_| ()));
        expect_oob(src.get_bandwidth(1).map(|_| ()));
        expect_oob(src.get_freq_range(1).map(|_| ()));
        expect_oob(src.get_gain_range(1).map(|_| ()));
        expect_oob(src.get_bandwidth_range(1).map(|_| ()));

        // the device has a second front-end, but it was not touched either
        assert_eq!(src.get_gain(0).unwrap(), 10.0);
        assert_eq!(src.device_mut().rx_gain(1).unwrap(), 0.0);
        assert!((src.get_center_freq(0).unwrap() - 100e6).abs() < 1.0);
    }

    #[test]
    fn test_range_queries_are_pure() {
        let src = sim_source(2);
        for chan in 0..2 {
            assert_eq!(src.get_freq_range(chan).unwrap(), src.get_freq_range(chan).unwrap());
            assert_eq!(src.get_gain_range(chan).unwrap(), src.get_gain_range(chan).unwrap());
        }
    }

    #[test]
    fn test_gain_clipped_to_range() {
        let mut src = sim_source(1);
        let range = src.get_gain_range(0).unwrap();
        src.set_gain(range.stop() + 20.0, 0).unwrap();
        assert_eq!(src.get_gain(0).unwrap(), range.stop());
        src.set_gain(-10.0, 0).unwrap();
        assert_eq!(src.get_gain(0).unwrap(), range.start());
        src.set_gain(31.6, 0).unwrap();
        assert_eq!(src.get_gain(0).unwrap(), 32.0);
        assert!(src.set_gain(f64::INFINITY, 0).is_err());
    }

    #[test]
    fn test_bandwidth_clipped_to_range() {
        let mut src = sim_source(1);
        src.set_bandwidth(1e9, 0).unwrap();
        let range = src.get_bandwidth_range(0).unwrap();
        assert_eq!(src.get_bandwidth(0).unwrap(), range.stop());
        src.set_bandwidth(5e6, 0).unwrap();
        assert_eq!(src.get_bandwidth(0).unwrap(), 5e6);
        assert!(src.set_bandwidth(-1.0, 0).is_err());
    }

    #[test]
    fn test_subdev_spec_must_cover_channels() {
        let mut src = sim_source(2);
        let err = src.set_subdev_spec("A:A").unwrap_err();
        assert!(err.is_configuration());
        assert!(src.set_subdev_spec("A:A:A").is_err());
        assert!(src.set_subdev_spec("B:0 B:1").is_err());

        src.set_subdev_spec("A:B A:A").unwrap();
        assert_eq!(src.get_subdev_spec().unwrap(), "A:B A:A");
    }

    #[test]
    fn test_subdev_swap_refreshes_channel0_frequency() {
        let mut src = sim_source(2);
        src.set_center_freq_hz(915e6, 0).unwrap();
        src.set_center_freq_hz(433.92e6, 1).unwrap();

        src.set_subdev_spec("A:B A:A").unwrap();
        let chan0 = src.get_center_freq(0).unwrap();
        assert!((chan0 - 433.92e6).abs() < 1.0, "chan 0 at {}", chan0);
        assert_eq!(src.center_frequency(), chan0);
        assert_eq!(src.sample_rate(), src.get_samp_rate().unwrap());
    }

    #[test]
    fn test_rejected_subdev_spec_keeps_streaming() {
        let mut src = sim_source(2);
        src.start_stream().unwrap();

        assert!(src.set_subdev_spec("B:0 B:1").is_err());
        assert!(src.is_streaming());
        assert!(src.recv_block().unwrap().is_some());

        src.set_subdev_spec("A:B A:A").unwrap();
        assert!(!src.is_streaming());
        src.start_stream().unwrap();
        assert!(src.recv_block().unwrap().is_some());
    }

    #[test]
    fn test_clock_config_is_device_wide() {
        let mut src = sim_source(2);
        src.set_clock_config(&ClockConfig::external()).unwrap();
        assert_eq!(src.device_mut().clock_config(), ClockConfig::external());

        let mimo = ClockConfig {
            ref_source: RefSource::Mimo,
            pps_source: PpsSource::Mimo,
            ..ClockConfig::default()
        };
        assert!(matches!(
            src.set_clock_config(&mimo),
            Err(SdrError::Configuration(_))
        ));
    }

    #[test]
    fn test_device_failure_propagates() {
        let mut src = sim_source(1);
        src.device_mut().disconnect();
        assert!(matches!(
            src.set_center_freq_hz(100e6, 0),
            Err(SdrError::HardwareCommunication(_))
        ));
        assert!(matches!(
            src.get_time_now(),
            Err(SdrError::HardwareCommunication(_))
        ));
    }

    #[test]
    fn test_device_escape_hatch() {
        let mut src = sim_source(1);
        let name = src.device().mboard_name().unwrap();
        assert_eq!(name, src.get_mboard_name().unwrap());
    }

    #[test]
    fn test_recv_block_tags_first_and_after_overflow() {
        let mut src = sim_source(2);
        src.set_samp_rate(1e6).unwrap();
        assert!(src.recv_block().is_err(), "recv before start must fail");

        src.start_stream().unwrap();
        let first = src.recv_block().unwrap().unwrap();
        assert!(first.time.is_some());
        assert_eq!(first.chans.len(), 2);
        assert_eq!(first.chans[0].len(), first.num_samples);
        assert_eq!(first.num_samples, src.num_packet_samps());

        let second = src.recv_block().unwrap().unwrap();
        assert!(second.time.is_none());

        src.device_mut().inject_rx_errors(&[RxErrorCode::Overflow]);
        assert!(src.recv_block().unwrap().is_none());
        assert_eq!(src.overflow_count(), 1);

        let after = src.recv_block().unwrap().unwrap();
        let t0 = first.time.unwrap();
        let t = after.time.expect("block after overflow must carry a time");
        // two packets delivered and one lost before this block
        let expected = 3.0 * src.num_packet_samps() as f64 / 1e6;
        assert!(((t - t0).real_secs() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_recv_block_fatal_errors() {
        let mut src = sim_source(1);
        src.start_stream().unwrap();
        src.device_mut()
            .inject_rx_errors(&[RxErrorCode::Timeout, RxErrorCode::BrokenChain]);
        assert!(src.recv_block().unwrap().is_none());
        assert!(matches!(
            src.recv_block(),
            Err(SdrError::HardwareCommunication(_))
        ));
    }

    #[test]
    fn test_start_streams_until_receiver_dropped() {
        let mut src = SingleUsrpSource::new(SimDevice::new(), IoType::Sc16, 1).unwrap();
        src.set_samp_rate(2e6).unwrap();
        let (tx, rx) = channel::bounded(2);

        let handle = thread::spawn(move || {
            let res = src.start(tx);
            (res, src)
        });

        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(rx.recv().unwrap());
        }
        drop(rx);

        let (res, src) = handle.join().unwrap();
        assert!(res.is_ok());
        assert!(!src.is_streaming());
        assert!(got[0].time.is_some());
        assert!(got[1..].iter().all(|b| b.time.is_none()));
        assert!(got.iter().all(|b| matches!(b.chans[0], Samples::Sc16(_))));
    }

    #[test]
    fn test_stop_flag_ends_stream() {
        let mut src = sim_source(1);
        let running = src.running_flag();
        let (tx, rx) = channel::unbounded();

        let handle = thread::spawn(move || src.start(tx));
        rx.recv().unwrap();
        running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_shared_source_stops_while_streaming() {
        let source = make_single_usrp_source("type=sim", IoType::Fc32, 1).unwrap();
        let running = source.lock().unwrap().running_flag();
        let (tx, rx) = channel::unbounded();

        let shared = source.clone();
        let handle = thread::spawn(move || {
            let mut src = shared.lock().unwrap();
            src.start(tx)
        });
        rx.recv().unwrap();
        assert!(source.try_lock().is_err(), "start holds the lock");

        running.store(false, Ordering::SeqCst);
        assert!(handle.join().unwrap().is_ok());
        let mut src = source.lock().unwrap();
        src.set_gain(20.0, 0).unwrap();
        assert_eq!(src.get_gain(0).unwrap(), 20.0);
    }

    #[test]
    fn test_apply_config() {
        let mut src = sim_source(2);
        let cfg = SourceConfig {
            clock: Some(ClockConfig::external()),
            subdev_spec: Some("A:A A:B".to_string()),
            samp_rate: Some(4e6),
            channels: vec![
                ChannelConfig {
                    freq: Some(915e6),
                    gain: Some(40.0),
                    antenna: Some("TX/RX".to_string()),
                    ..ChannelConfig::default()
                },
                ChannelConfig {
                    freq: Some(868e6),
                    lo_offset: Some(2e6),
                    bandwidth: Some(1e6),
                    ..ChannelConfig::default()
                },
            ],
        };
        src.apply_config(&cfg).unwrap();
        assert_eq!(src.get_samp_rate().unwrap(), 4e6);
        assert_eq!(src.get_gain(0).unwrap(), 40.0);
        assert_eq!(src.get_antenna(0).unwrap(), "TX/RX");
        assert_eq!(src.get_bandwidth(1).unwrap(), 1e6);
        assert!((src.get_center_freq(1).unwrap() - 868e6).abs() < 1.0);

        let too_many = SourceConfig {
            channels: vec![ChannelConfig::default(); 3],
            ..SourceConfig::default()
        };
        assert!(matches!(
            src.apply_config(&too_many),
            Err(SdrError::ChannelOutOfRange { chan: 2, num_channels: 2 })
        ));
    }

    #[test]
    fn test_factory_sim() {
        let source = make_single_usrp_source("type=sim", IoType::Sc16, 2).unwrap();
        let mut src = source.lock().unwrap();
        assert_eq!(src.get_num_channels(), 2);
        src.set_center_freq_hz(1.2e9, 1).unwrap();
        assert!(src.set_gain(1.0, 2).is_err());
    }

    #[test]
    fn test_factory_rejects_bad_channel_counts() {
        assert!(make_single_usrp_source("type=sim", IoType::Fc32, 0).is_err());
        assert!(make_single_usrp_source("type=sim", IoType::Fc32, 3).is_err());
        assert!(make_single_usrp_source("type=sim,master_clock_rate=x", IoType::Fc32, 1).is_err());
    }

    #[cfg(not(feature = "usrp"))]
    #[test]
    fn test_factory_hardware_needs_uhd() {
        match make_single_usrp_source("serial=31A5", IoType::Fc32, 1) {
            Err(err) => assert!(matches!(err, SdrError::UnsupportedOperation(_))),
            Ok(_) => panic!("opened hardware without UHD support"),
        }
    }
}
