// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;

use crate::addr::{DeviceAddr, SubdevSpec};
use crate::device::{DeviceInfo, UsrpDevice};
use crate::error::{Result, SdrError};
use crate::types::{
    ClockConfig, IoType, MetaRange, PpsPolarity, Range, RxErrorCode, RxMetadata, StreamCmd,
    StreamMode, TimeSpec, TunePolicy, TuneRequest, TuneResult,
};
use crate::Samples;

// UHD C API FFI bindings (manual, minimal)

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;
const UHD_ERROR_INDEX: UhdError = 10;
const UHD_ERROR_KEY: UhdError = 11;
const UHD_ERROR_NOT_IMPLEMENTED: UhdError = 20;
const UHD_ERROR_ASSERTION: UhdError = 40;
const UHD_ERROR_LOOKUP: UhdError = 41;
const UHD_ERROR_TYPE: UhdError = 42;
const UHD_ERROR_VALUE: UhdError = 43;

// Opaque handle types
type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;
type UhdStringVectorHandle = *mut c_void;
type UhdMetaRangeHandle = *mut c_void;
type UhdSubdevSpecHandle = *mut c_void;

// Tune request policies
const UHD_TUNE_REQUEST_POLICY_NONE: c_int = 78;
const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;
const UHD_TUNE_REQUEST_POLICY_MANUAL: c_int = 77;

// Stream modes
const UHD_STREAM_MODE_START_CONTINUOUS: c_int = 97;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;
const UHD_STREAM_MODE_NUM_SAMPS_AND_DONE: c_int = 100;

const MBOARD: usize = 0;
const STR_LEN: usize = 1024;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
#[derive(Default)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
#[derive(Default)]
struct UhdRange {
    start: c_double,
    stop: c_double,
    step: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    fn uhd_get_last_error(error_out: *mut c_char, strbuffer_len: usize) -> UhdError;

    // String vector
    fn uhd_string_vector_make(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_free(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_size(h: UhdStringVectorHandle, size_out: *mut usize) -> UhdError;
    fn uhd_string_vector_at(
        h: UhdStringVectorHandle,
        index: usize,
        value_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;

    // Meta range
    fn uhd_meta_range_make(h: *mut UhdMetaRangeHandle) -> UhdError;
    fn uhd_meta_range_free(h: *mut UhdMetaRangeHandle) -> UhdError;
    fn uhd_meta_range_size(h: UhdMetaRangeHandle, size_out: *mut usize) -> UhdError;
    fn uhd_meta_range_at(h: UhdMetaRangeHandle, num: usize, range_out: *mut UhdRange) -> UhdError;

    // Subdev spec
    fn uhd_subdev_spec_make(h: *mut UhdSubdevSpecHandle, markup: *const c_char) -> UhdError;
    fn uhd_subdev_spec_free(h: *mut UhdSubdevSpecHandle) -> UhdError;
    fn uhd_subdev_spec_to_string(
        h: UhdSubdevSpecHandle,
        string_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;

    // USRP
    fn uhd_usrp_find(args: *const c_char, strings_out: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_last_error(h: UhdUsrpHandle, error_out: *mut c_char, strbuffer_len: usize) -> UhdError;
    fn uhd_usrp_get_mboard_name(
        h: UhdUsrpHandle,
        mboard: usize,
        name_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;
    fn uhd_usrp_get_rx_num_channels(h: UhdUsrpHandle, num_channels_out: *mut usize) -> UhdError;
    fn uhd_usrp_set_rx_subdev_spec(
        h: UhdUsrpHandle,
        subdev_spec: UhdSubdevSpecHandle,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_get_rx_subdev_spec(
        h: UhdUsrpHandle,
        mboard: usize,
        subdev_spec_out: UhdSubdevSpecHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_rate(h: UhdUsrpHandle, chan: usize, rate_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_get_rx_freq(h: UhdUsrpHandle, chan: usize, freq_out: *mut c_double) -> UhdError;
    fn uhd_usrp_get_rx_freq_range(
        h: UhdUsrpHandle,
        chan: usize,
        freq_range_out: UhdMetaRangeHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_gain(
        h: UhdUsrpHandle,
        gain: c_double,
        chan: usize,
        gain_name: *const c_char,
    ) -> UhdError;
    fn uhd_usrp_get_rx_gain(
        h: UhdUsrpHandle,
        chan: usize,
        gain_name: *const c_char,
        gain_out: *mut c_double,
    ) -> UhdError;
    fn uhd_usrp_get_rx_gain_range(
        h: UhdUsrpHandle,
        name: *const c_char,
        chan: usize,
        gain_range_out: UhdMetaRangeHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_antenna(h: UhdUsrpHandle, ant: *const c_char, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_antenna(
        h: UhdUsrpHandle,
        chan: usize,
        ant_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;
    fn uhd_usrp_get_rx_antennas(
        h: UhdUsrpHandle,
        chan: usize,
        antennas_out: *mut UhdStringVectorHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_bandwidth(h: UhdUsrpHandle, bandwidth: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_bandwidth(h: UhdUsrpHandle, chan: usize, bandwidth_out: *mut c_double) -> UhdError;
    fn uhd_usrp_get_rx_bandwidth_range(
        h: UhdUsrpHandle,
        chan: usize,
        bandwidth_range_out: UhdMetaRangeHandle,
    ) -> UhdError;
    fn uhd_usrp_set_clock_source(h: UhdUsrpHandle, clock_source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_set_time_source(h: UhdUsrpHandle, time_source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_get_time_now(
        h: UhdUsrpHandle,
        mboard: usize,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
    fn uhd_usrp_get_time_last_pps(
        h: UhdUsrpHandle,
        mboard: usize,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
    fn uhd_usrp_set_time_now(h: UhdUsrpHandle, full_secs: i64, frac_secs: c_double, mboard: usize) -> UhdError;
    fn uhd_usrp_set_time_next_pps(
        h: UhdUsrpHandle,
        full_secs: i64,
        frac_secs: c_double,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_get_rx_stream(
        h: UhdUsrpHandle,
        stream_args: *mut UhdStreamArgs,
        h_out: UhdRxStreamerHandle,
    ) -> UhdError;

    // RX Streamer
    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_max_num_samps(h: UhdRxStreamerHandle, max_num_samps_out: *mut usize) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(
        h: UhdRxStreamerHandle,
        stream_cmd: *const UhdStreamCmd,
    ) -> UhdError;

    // RX Metadata
    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_has_time_spec(h: UhdRxMetadataHandle, result_out: *mut bool) -> UhdError;
    fn uhd_rx_metadata_time_spec(
        h: UhdRxMetadataHandle,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
    fn uhd_rx_metadata_error_code(h: UhdRxMetadataHandle, error_code_out: *mut c_int) -> UhdError;
}

/// Read a NUL-terminated string the library wrote into `buf`.
fn buf_to_string(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn last_error() -> String {
    let mut buf = vec![0u8; STR_LEN];
    unsafe { uhd_get_last_error(buf.as_mut_ptr() as *mut c_char, buf.len()) };
    buf_to_string(&buf)
}

/// Classify a UHD error code into the crate's error taxonomy.
fn map_error(code: UhdError, what: &str, detail: String) -> SdrError {
    let msg = if detail.is_empty() {
        format!("{} failed: error {}", what, code)
    } else {
        format!("{} failed: {}", what, detail)
    };
    match code {
        UHD_ERROR_INDEX | UHD_ERROR_KEY | UHD_ERROR_ASSERTION | UHD_ERROR_LOOKUP
        | UHD_ERROR_TYPE | UHD_ERROR_VALUE => SdrError::Configuration(msg),
        UHD_ERROR_NOT_IMPLEMENTED => SdrError::UnsupportedOperation(msg),
        _ => SdrError::HardwareCommunication(msg),
    }
}

fn check_global(err: UhdError, what: &str) -> Result<()> {
    if err == UHD_ERROR_NONE {
        Ok(())
    } else {
        Err(map_error(err, what, last_error()))
    }
}

fn cstring(s: &str, what: &str) -> Result<CString> {
    CString::new(s).map_err(|_| SdrError::config(format!("{} contains a NUL byte", what)))
}

/// Owned `uhd_string_vector_handle`.
struct StringVector(UhdStringVectorHandle);

impl StringVector {
    fn new() -> Result<Self> {
        let mut h: UhdStringVectorHandle = ptr::null_mut();
        check_global(unsafe { uhd_string_vector_make(&mut h) }, "uhd_string_vector_make")?;
        Ok(Self(h))
    }

    fn to_vec(&self) -> Vec<String> {
        let mut count: usize = 0;
        unsafe { uhd_string_vector_size(self.0, &mut count) };
        let mut buf = vec![0u8; STR_LEN];
        (0..count)
            .map(|i| {
                buf.fill(0);
                unsafe {
                    uhd_string_vector_at(self.0, i, buf.as_mut_ptr() as *mut c_char, buf.len())
                };
                buf_to_string(&buf)
            })
            .collect()
    }
}

impl Drop for StringVector {
    fn drop(&mut self) {
        unsafe { uhd_string_vector_free(&mut self.0) };
    }
}

/// Owned `uhd_meta_range_handle`.
struct MetaRangeHandle(UhdMetaRangeHandle);

impl MetaRangeHandle {
    fn new() -> Result<Self> {
        let mut h: UhdMetaRangeHandle = ptr::null_mut();
        check_global(unsafe { uhd_meta_range_make(&mut h) }, "uhd_meta_range_make")?;
        Ok(Self(h))
    }

    fn to_meta_range(&self) -> MetaRange {
        let mut count: usize = 0;
        unsafe { uhd_meta_range_size(self.0, &mut count) };
        let ranges = (0..count)
            .map(|i| {
                let mut r = UhdRange::default();
                unsafe { uhd_meta_range_at(self.0, i, &mut r) };
                Range::new(r.start, r.stop, r.step)
            })
            .collect();
        MetaRange::new(ranges)
    }
}

impl Drop for MetaRangeHandle {
    fn drop(&mut self) {
        unsafe { uhd_meta_range_free(&mut self.0) };
    }
}

/// Owned `uhd_subdev_spec_handle`.
struct SubdevSpecHandle(UhdSubdevSpecHandle);

impl SubdevSpecHandle {
    fn new(markup: &str) -> Result<Self> {
        let markup_c = cstring(markup, "subdev spec")?;
        let mut h: UhdSubdevSpecHandle = ptr::null_mut();
        check_global(
            unsafe { uhd_subdev_spec_make(&mut h, markup_c.as_ptr()) },
            "uhd_subdev_spec_make",
        )?;
        Ok(Self(h))
    }
}

impl Drop for SubdevSpecHandle {
    fn drop(&mut self) {
        unsafe { uhd_subdev_spec_free(&mut self.0) };
    }
}

fn policy(p: TunePolicy) -> c_int {
    match p {
        TunePolicy::None => UHD_TUNE_REQUEST_POLICY_NONE,
        TunePolicy::Auto => UHD_TUNE_REQUEST_POLICY_AUTO,
        TunePolicy::Manual => UHD_TUNE_REQUEST_POLICY_MANUAL,
    }
}

/// List USRP devices matching `hint`
pub fn list_devices(hint: &DeviceAddr) -> Result<Vec<DeviceInfo>> {
    let args = cstring(&hint.to_string(), "device address")?;
    let mut sv = StringVector::new()?;

    check_global(unsafe { uhd_usrp_find(args.as_ptr(), &mut sv.0) }, "uhd_usrp_find")?;

    let mut devices = Vec::new();
    for s in sv.to_vec() {
        let addr: DeviceAddr = match s.parse() {
            Ok(a) => a,
            Err(e) => {
                log::warn!("skipping unparsable USRP address '{}': {}", s, e);
                continue;
            }
        };
        devices.push(DeviceInfo {
            serial: addr.get("serial").unwrap_or_default().to_string(),
            product: addr.get("product").unwrap_or_default().to_string(),
            device_type: addr.get("type").unwrap_or_default().to_string(),
            addr,
        });
    }
    Ok(devices)
}

/// Receive streamer and its metadata handle
struct RxStream {
    handle: UhdRxStreamerHandle,
    md: UhdRxMetadataHandle,
    io_type: IoType,
    num_channels: usize,
    max_samps: usize,
}

impl Drop for RxStream {
    fn drop(&mut self) {
        unsafe {
            uhd_rx_metadata_free(&mut self.md);
            uhd_rx_streamer_free(&mut self.handle);
        }
    }
}

/// USRP device opened through the UHD C API.
pub struct UhdDevice {
    usrp: UhdUsrpHandle,
    rx: Option<RxStream>,
}

// The handle is only ever used from the thread that owns the device.
unsafe impl Send for UhdDevice {}

impl UhdDevice {
    pub fn open(addr: &DeviceAddr) -> Result<Self> {
        let mut addr = addr.clone();
        if !addr.has_key("num_recv_frames") {
            addr.set("num_recv_frames", "1024");
        }
        let dev_args = cstring(&addr.to_string(), "device address")?;

        log::info!("opening USRP {}", addr);
        let mut usrp: UhdUsrpHandle = ptr::null_mut();
        check_global(unsafe { uhd_usrp_make(&mut usrp, dev_args.as_ptr()) }, "uhd_usrp_make")?;

        Ok(Self { usrp, rx: None })
    }

    /// Raw `uhd_usrp_handle` for calls not wrapped here.
    pub fn raw_handle(&self) -> *mut c_void {
        self.usrp
    }

    fn check(&self, err: UhdError, what: &str) -> Result<()> {
        if err == UHD_ERROR_NONE {
            return Ok(());
        }
        let mut buf = vec![0u8; STR_LEN];
        unsafe { uhd_usrp_last_error(self.usrp, buf.as_mut_ptr() as *mut c_char, buf.len()) };
        Err(map_error(err, what, buf_to_string(&buf)))
    }

    fn get_f64(&self, what: &str, f: impl FnOnce(*mut c_double) -> UhdError) -> Result<f64> {
        let mut out: c_double = 0.0;
        self.check(f(&mut out), what)?;
        Ok(out)
    }

    fn get_string(&self, what: &str, f: impl FnOnce(*mut c_char, usize) -> UhdError) -> Result<String> {
        let mut buf = vec![0u8; STR_LEN];
        self.check(f(buf.as_mut_ptr() as *mut c_char, buf.len()), what)?;
        Ok(buf_to_string(&buf))
    }

    fn get_range(&self, what: &str, f: impl FnOnce(UhdMetaRangeHandle) -> UhdError) -> Result<MetaRange> {
        let range = MetaRangeHandle::new()?;
        self.check(f(range.0), what)?;
        Ok(range.to_meta_range())
    }

    fn get_time(&self, what: &str, f: impl FnOnce(*mut i64, *mut c_double) -> UhdError) -> Result<TimeSpec> {
        let mut full: i64 = 0;
        let mut frac: c_double = 0.0;
        self.check(f(&mut full, &mut frac), what)?;
        Ok(TimeSpec::new(full, frac))
    }
}

impl UsrpDevice for UhdDevice {
    fn num_channels(&self) -> Result<usize> {
        let mut n: usize = 0;
        self.check(
            unsafe { uhd_usrp_get_rx_num_channels(self.usrp, &mut n) },
            "uhd_usrp_get_rx_num_channels",
        )?;
        Ok(n)
    }

    fn mboard_name(&self) -> Result<String> {
        self.get_string("uhd_usrp_get_mboard_name", |out, len| unsafe {
            uhd_usrp_get_mboard_name(self.usrp, MBOARD, out, len)
        })
    }

    fn set_subdev_spec(&mut self, spec: &SubdevSpec) -> Result<()> {
        let handle = SubdevSpecHandle::new(&spec.to_string())?;
        self.check(
            unsafe { uhd_usrp_set_rx_subdev_spec(self.usrp, handle.0, MBOARD) },
            "uhd_usrp_set_rx_subdev_spec",
        )?;
        // the new channel mapping invalidates the streamer
        if self.rx.is_some() {
            if let Err(e) = self.issue_stream_cmd(&StreamCmd::stop_now()) {
                log::warn!("USRP stop before streamer teardown failed: {}", e);
            }
            self.rx = None;
        }
        Ok(())
    }

    fn subdev_spec(&self) -> Result<SubdevSpec> {
        let handle = SubdevSpecHandle::new("")?;
        self.check(
            unsafe { uhd_usrp_get_rx_subdev_spec(self.usrp, MBOARD, handle.0) },
            "uhd_usrp_get_rx_subdev_spec",
        )?;
        let mut buf = vec![0u8; STR_LEN];
        check_global(
            unsafe { uhd_subdev_spec_to_string(handle.0, buf.as_mut_ptr() as *mut c_char, buf.len()) },
            "uhd_subdev_spec_to_string",
        )?;
        buf_to_string(&buf).parse()
    }

    fn set_rx_rate(&mut self, rate: f64) -> Result<()> {
        // one rate for all channels of the motherboard
        for chan in 0..self.num_channels()? {
            self.check(
                unsafe { uhd_usrp_set_rx_rate(self.usrp, rate, chan) },
                "uhd_usrp_set_rx_rate",
            )?;
        }
        Ok(())
    }

    fn rx_rate(&self) -> Result<f64> {
        self.get_f64("uhd_usrp_get_rx_rate", |out| unsafe {
            uhd_usrp_get_rx_rate(self.usrp, 0, out)
        })
    }

    fn set_rx_freq(&mut self, request: &TuneRequest, chan: usize) -> Result<TuneResult> {
        let mut req = UhdTuneRequest {
            target_freq: request.target_freq,
            rf_freq_policy: policy(request.rf_policy),
            rf_freq: request.rf_freq,
            dsp_freq_policy: policy(request.dsp_policy),
            dsp_freq: request.dsp_freq,
            args: ptr::null_mut(),
        };
        let mut res = UhdTuneResult::default();
        self.check(
            unsafe { uhd_usrp_set_rx_freq(self.usrp, &mut req, chan, &mut res) },
            "uhd_usrp_set_rx_freq",
        )?;
        Ok(TuneResult {
            clipped_rf_freq: res.clipped_rf_freq,
            target_rf_freq: res.target_rf_freq,
            actual_rf_freq: res.actual_rf_freq,
            target_dsp_freq: res.target_dsp_freq,
            actual_dsp_freq: res.actual_dsp_freq,
        })
    }

    fn rx_freq(&self, chan: usize) -> Result<f64> {
        self.get_f64("uhd_usrp_get_rx_freq", |out| unsafe {
            uhd_usrp_get_rx_freq(self.usrp, chan, out)
        })
    }

    fn rx_freq_range(&self, chan: usize) -> Result<MetaRange> {
        self.get_range("uhd_usrp_get_rx_freq_range", |range| unsafe {
            uhd_usrp_get_rx_freq_range(self.usrp, chan, range)
        })
    }

    fn set_rx_gain(&mut self, gain: f64, chan: usize) -> Result<()> {
        let all = CString::default();
        self.check(
            unsafe { uhd_usrp_set_rx_gain(self.usrp, gain, chan, all.as_ptr()) },
            "uhd_usrp_set_rx_gain",
        )
    }

    fn rx_gain(&self, chan: usize) -> Result<f64> {
        let all = CString::default();
        self.get_f64("uhd_usrp_get_rx_gain", |out| unsafe {
            uhd_usrp_get_rx_gain(self.usrp, chan, all.as_ptr(), out)
        })
    }

    fn rx_gain_range(&self, chan: usize) -> Result<MetaRange> {
        let all = CString::default();
        self.get_range("uhd_usrp_get_rx_gain_range", |range| unsafe {
            uhd_usrp_get_rx_gain_range(self.usrp, all.as_ptr(), chan, range)
        })
    }

    fn set_rx_antenna(&mut self, ant: &str, chan: usize) -> Result<()> {
        let ant_c = cstring(ant, "antenna name")?;
        self.check(
            unsafe { uhd_usrp_set_rx_antenna(self.usrp, ant_c.as_ptr(), chan) },
            "uhd_usrp_set_rx_antenna",
        )
    }

    fn rx_antenna(&self, chan: usize) -> Result<String> {
        self.get_string("uhd_usrp_get_rx_antenna", |out, len| unsafe {
            uhd_usrp_get_rx_antenna(self.usrp, chan, out, len)
        })
    }

    fn rx_antennas(&self, chan: usize) -> Result<Vec<String>> {
        let mut sv = StringVector::new()?;
        self.check(
            unsafe { uhd_usrp_get_rx_antennas(self.usrp, chan, &mut sv.0) },
            "uhd_usrp_get_rx_antennas",
        )?;
        Ok(sv.to_vec())
    }

    fn set_rx_bandwidth(&mut self, bandwidth: f64, chan: usize) -> Result<()> {
        self.check(
            unsafe { uhd_usrp_set_rx_bandwidth(self.usrp, bandwidth, chan) },
            "uhd_usrp_set_rx_bandwidth",
        )
    }

    fn rx_bandwidth(&self, chan: usize) -> Result<f64> {
        self.get_f64("uhd_usrp_get_rx_bandwidth", |out| unsafe {
            uhd_usrp_get_rx_bandwidth(self.usrp, chan, out)
        })
    }

    fn rx_bandwidth_range(&self, chan: usize) -> Result<MetaRange> {
        self.get_range("uhd_usrp_get_rx_bandwidth_range", |range| unsafe {
            uhd_usrp_get_rx_bandwidth_range(self.usrp, chan, range)
        })
    }

    fn set_clock_config(&mut self, config: &ClockConfig) -> Result<()> {
        if config.pps_polarity == PpsPolarity::Negative {
            return Err(SdrError::unsupported(
                "UHD only latches time on the rising PPS edge",
            ));
        }
        let clock = cstring(config.ref_source.as_str(), "clock source")?;
        let time = cstring(config.pps_source.as_str(), "time source")?;
        self.check(
            unsafe { uhd_usrp_set_clock_source(self.usrp, clock.as_ptr(), MBOARD) },
            "uhd_usrp_set_clock_source",
        )?;
        self.check(
            unsafe { uhd_usrp_set_time_source(self.usrp, time.as_ptr(), MBOARD) },
            "uhd_usrp_set_time_source",
        )
    }

    fn time_now(&self) -> Result<TimeSpec> {
        self.get_time("uhd_usrp_get_time_now", |full, frac| unsafe {
            uhd_usrp_get_time_now(self.usrp, MBOARD, full, frac)
        })
    }

    fn time_last_pps(&self) -> Result<TimeSpec> {
        self.get_time("uhd_usrp_get_time_last_pps", |full, frac| unsafe {
            uhd_usrp_get_time_last_pps(self.usrp, MBOARD, full, frac)
        })
    }

    fn set_time_now(&mut self, time: TimeSpec) -> Result<()> {
        self.check(
            unsafe { uhd_usrp_set_time_now(self.usrp, time.full_secs, time.frac_secs, MBOARD) },
            "uhd_usrp_set_time_now",
        )
    }

    fn set_time_next_pps(&mut self, time: TimeSpec) -> Result<()> {
        self.check(
            unsafe { uhd_usrp_set_time_next_pps(self.usrp, time.full_secs, time.frac_secs, MBOARD) },
            "uhd_usrp_set_time_next_pps",
        )
    }

    fn setup_rx_stream(&mut self, io_type: IoType, channels: &[usize]) -> Result<usize> {
        self.rx = None;

        let mut handle: UhdRxStreamerHandle = ptr::null_mut();
        check_global(unsafe { uhd_rx_streamer_make(&mut handle) }, "uhd_rx_streamer_make")?;
        let mut md: UhdRxMetadataHandle = ptr::null_mut();
        if let Err(e) = check_global(unsafe { uhd_rx_metadata_make(&mut md) }, "uhd_rx_metadata_make") {
            unsafe { uhd_rx_streamer_free(&mut handle) };
            return Err(e);
        }
        // from here on the handles are released by RxStream's Drop
        let mut stream = RxStream {
            handle,
            md,
            io_type,
            num_channels: channels.len(),
            max_samps: 0,
        };

        let cpu_fmt = cstring(io_type.cpu_format(), "cpu format")?;
        let otw_fmt = cstring("sc16", "otw format")?;
        let stream_args_str = CString::default();
        let mut channel_list = channels.to_vec();

        let mut stream_args = UhdStreamArgs {
            cpu_format: cpu_fmt.as_ptr() as *mut c_char,
            otw_format: otw_fmt.as_ptr() as *mut c_char,
            args: stream_args_str.as_ptr() as *mut c_char,
            channel_list: channel_list.as_mut_ptr(),
            n_channels: channel_list.len() as c_int,
        };
        self.check(
            unsafe { uhd_usrp_get_rx_stream(self.usrp, &mut stream_args, stream.handle) },
            "uhd_usrp_get_rx_stream",
        )?;

        let mut max_samps: usize = 0;
        check_global(
            unsafe { uhd_rx_streamer_max_num_samps(stream.handle, &mut max_samps) },
            "uhd_rx_streamer_max_num_samps",
        )?;
        log::info!("USRP max_num_samps: {}", max_samps);

        stream.max_samps = max_samps;
        self.rx = Some(stream);
        Ok(max_samps)
    }

    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<()> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| SdrError::config("no rx streamer set up"))?;
        let (stream_mode, num_samps) = match cmd.mode {
            StreamMode::StartContinuous => (UHD_STREAM_MODE_START_CONTINUOUS, 0),
            StreamMode::StopContinuous => (UHD_STREAM_MODE_STOP_CONTINUOUS, 0),
            StreamMode::NumSampsAndDone(n) => (UHD_STREAM_MODE_NUM_SAMPS_AND_DONE, n),
        };
        let stream_cmd = UhdStreamCmd {
            stream_mode,
            num_samps,
            stream_now: cmd.stream_now,
            time_spec_full_secs: cmd.time_spec.full_secs,
            time_spec_frac_secs: cmd.time_spec.frac_secs,
        };
        check_global(
            unsafe { uhd_rx_streamer_issue_stream_cmd(rx.handle, &stream_cmd) },
            "uhd_rx_streamer_issue_stream_cmd",
        )
    }

    fn recv(&mut self, bufs: &mut [Samples], timeout: f64) -> Result<RxMetadata> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| SdrError::config("no rx streamer set up"))?;
        if bufs.len() != rx.num_channels {
            return Err(SdrError::config(format!(
                "recv got {} buffers for {} streamed channels",
                bufs.len(),
                rx.num_channels
            )));
        }
        if bufs.iter().any(|b| b.io_type() != rx.io_type) {
            return Err(SdrError::config("recv buffer format does not match the streamer"));
        }

        let samps_per_buff = bufs
            .iter()
            .map(|b| b.len())
            .min()
            .unwrap_or(0)
            .min(rx.max_samps);
        let mut ptrs: Vec<*mut c_void> = bufs
            .iter_mut()
            .map(|b| match b {
                Samples::Sc16(v) => v.as_mut_ptr() as *mut c_void,
                Samples::Fc32(v) => v.as_mut_ptr() as *mut c_void,
            })
            .collect();

        let mut num_rx: usize = 0;
        check_global(
            unsafe {
                uhd_rx_streamer_recv(
                    rx.handle,
                    ptrs.as_mut_ptr(),
                    samps_per_buff,
                    &mut rx.md,
                    timeout,
                    false, // one_packet
                    &mut num_rx,
                )
            },
            "uhd_rx_streamer_recv",
        )?;

        let mut error_code: c_int = 0;
        let mut has_time = false;
        let mut full: i64 = 0;
        let mut frac: c_double = 0.0;
        unsafe {
            uhd_rx_metadata_error_code(rx.md, &mut error_code);
            uhd_rx_metadata_has_time_spec(rx.md, &mut has_time);
            if has_time {
                uhd_rx_metadata_time_spec(rx.md, &mut full, &mut frac);
            }
        }

        Ok(RxMetadata {
            num_samps: num_rx,
            time_spec: has_time.then(|| TimeSpec::new(full, frac)),
            error_code: RxErrorCode::from_uhd(error_code),
        })
    }
}

impl Drop for UhdDevice {
    fn drop(&mut self) {
        self.rx = None;
        unsafe { uhd_usrp_free(&mut self.usrp) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            map_error(UHD_ERROR_VALUE, "uhd_usrp_set_rx_antenna", "bad".into()),
            SdrError::Configuration(_)
        ));
        assert!(matches!(
            map_error(UHD_ERROR_NOT_IMPLEMENTED, "x", String::new()),
            SdrError::UnsupportedOperation(_)
        ));
        // USB and IO failures are link problems
        assert!(matches!(
            map_error(21, "x", String::new()),
            SdrError::HardwareCommunication(_)
        ));
        assert!(matches!(
            map_error(30, "x", String::new()),
            SdrError::HardwareCommunication(_)
        ));
    }

    #[test]
    fn test_buf_to_string_stops_at_nul() {
        let mut buf = vec![0u8; 16];
        buf[..3].copy_from_slice(b"RX2");
        assert_eq!(buf_to_string(&buf), "RX2");
        assert_eq!(buf_to_string(b"no terminator"), "");
    }
}
