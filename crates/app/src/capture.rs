// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam::channel::{self, RecvTimeoutError, Sender};

use usrp_sdr::{SampleBuf, Samples, SdrError, SdrSource, SharedSource, UsrpSource};

/// Raw IQ file writer: little-endian ci16 or cf32, interleaved I/Q.
pub struct CaptureWriter<W: Write> {
    writer: W,
    samples_written: u64,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            samples_written: 0,
        }
    }

    /// Append the first `num_samples` complex samples of `samples`.
    pub fn write_samples(&mut self, samples: &Samples, num_samples: usize) -> io::Result<()> {
        let n = num_samples.min(samples.len());
        match samples {
            Samples::Sc16(v) => {
                for &x in &v[..n * 2] {
                    self.writer.write_i16::<LittleEndian>(x)?;
                }
            }
            Samples::Fc32(v) => {
                for c in &v[..n] {
                    self.writer.write_f32::<LittleEndian>(c.re)?;
                    self.writer.write_f32::<LittleEndian>(c.im)?;
                }
            }
        }
        self.samples_written += n as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Longest wait for the next block before a capture gives up
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a capture run
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub samples: u64,
    pub blocks: u64,
    /// Blocks that carried a device timestamp
    pub tagged_blocks: u64,
}

fn stream_into(source: SharedSource, tx: Sender<SampleBuf>) -> usrp_sdr::Result<()> {
    let mut src = source
        .lock()
        .map_err(|_| SdrError::comm("source lock poisoned"))?;
    src.start(tx)
}

/// Stream from `source` and write `num_samples` samples of channel 0 to `path`.
pub fn run_capture(
    source: &SharedSource,
    path: &Path,
    num_samples: u64,
) -> Result<CaptureStats, String> {
    let file = File::create(path).map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
    let mut writer = CaptureWriter::new(BufWriter::new(file));

    // the streaming thread holds the lock, so take the stop handle first
    let running = source
        .lock()
        .map_err(|_| "source lock poisoned".to_string())?
        .running_flag();

    let (tx, rx) = channel::bounded::<SampleBuf>(64);
    let shared = source.clone();
    let streamer = thread::spawn(move || stream_into(shared, tx));

    let mut stats = CaptureStats::default();
    let mut write_result = Ok(());
    loop {
        let buf = match rx.recv_timeout(IDLE_TIMEOUT) {
            Ok(buf) => buf,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                write_result = Err(format!(
                    "no samples received for {} s",
                    IDLE_TIMEOUT.as_secs()
                ));
                break;
            }
        };
        if buf.time.is_some() {
            stats.tagged_blocks += 1;
        }
        let Some(chan0) = buf.chans.first() else {
            continue;
        };
        let remaining = num_samples - writer.samples_written();
        let n = (buf.num_samples as u64).min(remaining) as usize;
        if let Err(e) = writer.write_samples(chan0, n) {
            write_result = Err(format!("write to {} failed: {}", path.display(), e));
            break;
        }
        stats.blocks += 1;
        if writer.samples_written() >= num_samples {
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
    drop(rx);

    let stream_result = streamer
        .join()
        .map_err(|_| "streaming thread panicked".to_string())?;
    write_result?;
    stream_result.map_err(|e| e.to_string())?;

    writer
        .flush()
        .map_err(|e| format!("flush of {} failed: {}", path.display(), e))?;
    stats.samples = writer.samples_written();
    log::info!(
        "captured {} samples in {} blocks to {}",
        stats.samples,
        stats.blocks,
        path.display()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;
    use usrp_sdr::{make_single_usrp_source, IoType};

    #[test]
    fn test_ci16_layout() {
        let mut w = CaptureWriter::new(Vec::new());
        w.write_samples(&Samples::Sc16(vec![1, -2, 3, 4]), 2).unwrap();
        assert_eq!(w.samples_written(), 2);
        assert_eq!(w.into_inner(), vec![1, 0, 0xFE, 0xFF, 3, 0, 4, 0]);
    }

    #[test]
    fn test_cf32_layout_and_truncation() {
        let mut w = CaptureWriter::new(Vec::new());
        let s = Samples::Fc32(vec![Complex32::new(1.0, -1.0), Complex32::new(0.5, 0.25)]);
        w.write_samples(&s, 1).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-1.0f32).to_le_bytes());
    }

    #[test]
    fn test_capture_from_sim() {
        let source = make_single_usrp_source("type=sim", IoType::Sc16, 1).unwrap();
        source.lock().unwrap().set_samp_rate(1e6).unwrap();

        let path = std::env::temp_dir().join(format!("usrp-probe-test-{}.ci16", std::process::id()));
        let stats = run_capture(&source, &path, 5000).unwrap();
        assert_eq!(stats.samples, 5000);
        assert!(stats.tagged_blocks >= 1);

        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(len, 5000 * IoType::Sc16.bytes_per_sample() as u64);

        // the stream is over and the source can be reconfigured
        source.lock().unwrap().set_gain(20.0, 0).unwrap();
    }
}
