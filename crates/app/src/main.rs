mod capture;
mod report;

use clap::Parser;
use std::path::PathBuf;

use usrp_sdr::{
    find_devices, make_single_usrp_source, ChannelConfig, ClockConfig, DeviceAddr, IoType,
    PpsSource, RefSource, SourceConfig, TimeSpec,
};

use report::{FoundDevice, SourceReport};

#[derive(Parser, Debug)]
#[command(name = "usrp-probe")]
#[command(about = "Open, configure and inspect a USRP receive source")]
struct Cli {
    /// Device address, e.g. "serial=3101234", "usrp-B210-3101234" or "type=sim"
    #[arg(short = 'a', long, default_value = "type=sim")]
    args: String,

    /// List devices matching --args and exit
    #[arg(long)]
    find: bool,

    /// Number of receive channels
    #[arg(short = 'C', long, default_value = "1")]
    channels: usize,

    /// Host sample format: fc32 or sc16
    #[arg(long, default_value = "fc32")]
    io_type: IoType,

    /// JSON source configuration, applied before the flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subdevice specification, e.g. "A:A A:B"
    #[arg(long)]
    subdev: Option<String>,

    /// Sample rate in Msps
    #[arg(short = 'r', long)]
    rate: Option<f64>,

    /// Center frequency in MHz (all channels)
    #[arg(short = 'c', long)]
    freq: Option<f64>,

    /// LO offset in MHz, used with --freq
    #[arg(long)]
    lo_offset: Option<f64>,

    /// Gain in dB (all channels)
    #[arg(short = 'g', long)]
    gain: Option<f64>,

    /// Antenna (all channels)
    #[arg(long)]
    antenna: Option<String>,

    /// Analog bandwidth in MHz (all channels)
    #[arg(long)]
    bandwidth: Option<f64>,

    /// Reference clock source: internal, external, mimo, gpsdo
    #[arg(long = "ref")]
    ref_source: Option<RefSource>,

    /// PPS source: internal, external, mimo, gpsdo
    #[arg(long = "pps")]
    pps_source: Option<PpsSource>,

    /// Zero the device time at the next PPS edge
    #[arg(long)]
    zero_time_at_pps: bool,

    /// Write channel 0 samples (raw ci16 or cf32, per --io-type) to this file
    #[arg(short = 'w', long)]
    capture: Option<PathBuf>,

    /// Number of samples to capture
    #[arg(short = 'n', long, default_value = "1000000")]
    nsamps: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.verbose {
        log::info!("usrp-probe starting");
        log::info!("device args: {}", cli.args);
        log::info!("channels: {}", cli.channels);
    }

    let result = if cli.find { run_find(&cli) } else { run(&cli) };
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_find(cli: &Cli) -> Result<(), String> {
    let hint: DeviceAddr = cli.args.parse().map_err(|e| format!("{}", e))?;
    let found = find_devices(&hint).map_err(|e| e.to_string())?;
    let found: Vec<FoundDevice> = found.iter().map(FoundDevice::from).collect();

    if cli.json {
        let out = serde_json::to_string_pretty(&found).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else if found.is_empty() {
        println!("no devices found");
    } else {
        for dev in &found {
            println!("{}  ({})", dev.iface, dev.addr);
        }
    }
    Ok(())
}

/// Merge the config file (if any) with the command line flags.
fn build_config(cli: &Cli) -> Result<SourceConfig, String> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            serde_json::from_str::<SourceConfig>(&text)
                .map_err(|e| format!("invalid config {}: {}", path.display(), e))?
        }
        None => SourceConfig::default(),
    };

    if cli.ref_source.is_some() || cli.pps_source.is_some() {
        let mut clock = cfg.clock.unwrap_or_default();
        if let Some(r) = cli.ref_source {
            clock.ref_source = r;
        }
        if let Some(p) = cli.pps_source {
            clock.pps_source = p;
        }
        cfg.clock = Some(clock);
    }
    if let Some(spec) = &cli.subdev {
        cfg.subdev_spec = Some(spec.clone());
    }
    if let Some(rate) = cli.rate {
        cfg.samp_rate = Some(rate * 1e6);
    }

    if cfg.channels.len() < cli.channels {
        cfg.channels.resize(cli.channels, ChannelConfig::default());
    }
    for ch in &mut cfg.channels {
        if let Some(freq) = cli.freq {
            ch.freq = Some(freq * 1e6);
        }
        if let Some(off) = cli.lo_offset {
            ch.lo_offset = Some(off * 1e6);
        }
        if let Some(gain) = cli.gain {
            ch.gain = Some(gain);
        }
        if let Some(ant) = &cli.antenna {
            ch.antenna = Some(ant.clone());
        }
        if let Some(bw) = cli.bandwidth {
            ch.bandwidth = Some(bw * 1e6);
        }
    }
    Ok(cfg)
}

fn run(cli: &Cli) -> Result<(), String> {
    let cfg = build_config(cli)?;
    let source = make_single_usrp_source(&cli.args, cli.io_type, cli.channels)
        .map_err(|e| e.to_string())?;

    let report = {
        let mut src = source.lock().map_err(|_| "source lock poisoned".to_string())?;
        src.apply_config(&cfg).map_err(|e| e.to_string())?;
        if cli.zero_time_at_pps {
            src.set_time_next_pps(TimeSpec::new(0, 0.0))
                .map_err(|e| e.to_string())?;
        }
        if cfg.clock.is_some_and(|c| c != ClockConfig::default()) {
            log::info!("last PPS at {}", src.get_time_last_pps().map_err(|e| e.to_string())?);
        }
        SourceReport::collect(&*src).map_err(|e| e.to_string())?
    };

    if cli.json {
        let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        print!("{}", report);
    }

    if let Some(path) = &cli.capture {
        if cli.nsamps == 0 {
            return Err("--nsamps must be positive".to_string());
        }
        let stats = capture::run_capture(&source, path, cli.nsamps)?;
        if !cli.json {
            println!(
                "captured {} samples ({} blocks, {} timestamped) to {}",
                stats.samples,
                stats.blocks,
                stats.tagged_blocks,
                path.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_fill_every_channel() {
        let cli = Cli::parse_from([
            "usrp-probe", "-C", "2", "-c", "915", "-g", "20", "--ref", "ext", "-r", "2",
        ]);
        let cfg = build_config(&cli).unwrap();
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.channels[1].freq, Some(915e6));
        assert_eq!(cfg.channels[0].gain, Some(20.0));
        assert_eq!(cfg.samp_rate, Some(2e6));
        let clock = cfg.clock.unwrap();
        assert_eq!(clock.ref_source, RefSource::External);
        assert_eq!(clock.pps_source, PpsSource::Internal);
    }

    #[test]
    fn test_bad_io_type_rejected() {
        assert!(Cli::try_parse_from(["usrp-probe", "--io-type", "s8"]).is_err());
    }

    #[test]
    fn test_run_against_sim() {
        let cli = Cli::parse_from(["usrp-probe", "-C", "2", "-c", "433.92", "--antenna", "RX2"]);
        run(&cli).unwrap();
    }
}
