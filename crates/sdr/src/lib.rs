pub mod addr;
pub mod config;
pub mod device;
pub mod error;
pub mod sim;
pub mod source;
pub mod types;

#[cfg(feature = "usrp")]
pub mod usrp;

use crossbeam::channel::Sender;
use num_complex::Complex32;

pub use addr::{DeviceAddr, SubdevSpec};
pub use config::{ChannelConfig, SourceConfig};
pub use device::{find_devices, DeviceInfo, UsrpDevice};
pub use error::{Result, SdrError};
pub use sim::SimDevice;
pub use source::{make_single_usrp_source, SharedSource, SingleUsrpSource, UsrpSource};
pub use types::{
    ClockConfig, IoType, MetaRange, PpsPolarity, PpsSource, Range, RefSource, TimeSpec,
    TunePolicy, TuneRequest, TuneResult,
};

/// Samples for one channel in the host format chosen at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Interleaved I,Q,I,Q,... as i16
    Sc16(Vec<i16>),
    Fc32(Vec<Complex32>),
}

impl Samples {
    /// Zeroed buffer holding `num_samples` complex samples.
    pub fn zeroed(io_type: IoType, num_samples: usize) -> Self {
        match io_type {
            IoType::Sc16 => Samples::Sc16(vec![0; num_samples * 2]),
            IoType::Fc32 => Samples::Fc32(vec![Complex32::new(0.0, 0.0); num_samples]),
        }
    }

    /// Number of complex samples held.
    pub fn len(&self) -> usize {
        match self {
            Samples::Sc16(v) => v.len() / 2,
            Samples::Fc32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn io_type(&self) -> IoType {
        match self {
            Samples::Sc16(_) => IoType::Sc16,
            Samples::Fc32(_) => IoType::Fc32,
        }
    }

    /// Copy of the first `num_samples` complex samples.
    pub fn head(&self, num_samples: usize) -> Samples {
        match self {
            Samples::Sc16(v) => Samples::Sc16(v[..num_samples * 2].to_vec()),
            Samples::Fc32(v) => Samples::Fc32(v[..num_samples].to_vec()),
        }
    }
}

/// A block of received samples, one entry per channel.
#[derive(Debug, Clone)]
pub struct SampleBuf {
    pub chans: Vec<Samples>,
    /// Number of complex samples per channel
    pub num_samples: usize,
    /// Device time of the first sample. Set on the first block after the
    /// stream starts and on the first block after an overflow.
    pub time: Option<TimeSpec>,
}

/// Common trait for streaming SDR sources
pub trait SdrSource: Send {
    /// Start streaming samples into the channel.
    /// Runs until stop() is called, the receiver is dropped, or an error occurs.
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<()>;

    /// Signal the source to stop streaming
    fn stop(&mut self);

    /// Get the sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Get the center frequency of channel 0 in Hz
    fn center_frequency(&self) -> f64;
}
