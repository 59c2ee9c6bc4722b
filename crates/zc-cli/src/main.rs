#![forbid(unsafe_code)]

mod logging;

use anyhow::{Context, Result, bail};
use logging::Sink;
use std::env;
use std::path::{Path, PathBuf};
use zc::{
    AssembleOptions, Assembler, Dmsetup, DumpReport, FormatConfig, InvocationMode, Outcome,
    format_devices, lexicon_error_to_zc, parse_block_size, parse_cache_mode, parse_size,
};

fn main() {
    if let Err(error) = run() {
        logging::report_error(&error);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "start" => start(&rest),
        "format" => {
            logging::init(Sink::Stderr);
            format(&rest)
        }
        "dump" => {
            logging::init(Sink::Stderr);
            dump(&rest)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("zc\n");
    println!("USAGE:");
    println!("  zc start [--udev] DEVICE");
    println!(
        "  zc format -o ORIGIN -c CACHE [-m METADATA] [-b BLOCK_SIZE] [-M MODE] [-a ALIGNMENT]"
    );
    println!("  zc dump DEVICE [--json]");
    println!();
    println!("Without -m the cache device also holds the cache metadata.");
    println!("Logging is controlled by {}.", logging::FILTER_ENV);
}

// ── start ───────────────────────────────────────────────────────────────────

fn start(args: &[String]) -> Result<()> {
    let (udev, device) = match args {
        [flag, device] if flag == "--udev" => (true, device),
        [device] if !device.starts_with('-') => (false, device),
        _ => bail!("usage: zc start [--udev] DEVICE"),
    };

    let (sink, mode) = if udev {
        (Sink::Syslog, InvocationMode::Automatic)
    } else {
        (Sink::Stderr, InvocationMode::Manual)
    };
    logging::init(sink);

    let assembler = Assembler::new(Dmsetup::default(), AssembleOptions::default());
    let outcome = assembler
        .run(device, mode)
        .with_context(|| format!("failed to start {device}"))?;

    match outcome {
        Outcome::Assembled { composite } | Outcome::AlreadyAssembled { composite } => {
            tracing::debug!(node = %composite.display(), "cache device ready");
        }
        Outcome::Partial { missing } => {
            tracing::debug!(?missing, "waiting for sibling devices");
        }
        Outcome::NotParticipant | Outcome::Stale => {}
    }
    Ok(())
}

// ── format ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FormatArgs {
    origin: Option<PathBuf>,
    cache: Option<PathBuf>,
    metadata: Option<PathBuf>,
    config: FormatConfig,
}

fn parse_format_args(args: &[String]) -> Result<FormatArgs> {
    let mut parsed = FormatArgs::default();
    let mut it = args.iter();

    while let Some(flag) = it.next() {
        let Some(value) = it.next() else {
            bail!("{flag}: value missing");
        };
        let device = |slot: &mut Option<PathBuf>, what: &str| -> Result<()> {
            if slot.replace(PathBuf::from(value)).is_some() {
                bail!("{what} device specified more than once");
            }
            Ok(())
        };
        match flag.as_str() {
            "-o" => device(&mut parsed.origin, "origin")?,
            "-c" => device(&mut parsed.cache, "cache")?,
            "-m" => device(&mut parsed.metadata, "metadata")?,
            "-b" => {
                parsed.config.block_size =
                    parse_block_size(value).map_err(|e| lexicon_error_to_zc(&e))?;
            }
            "-M" => {
                parsed.config.cache_mode =
                    parse_cache_mode(value).map_err(|e| lexicon_error_to_zc(&e))?;
            }
            "-a" => {
                parsed.config.alignment =
                    parse_size(value).map_err(|e| lexicon_error_to_zc(&e))?;
            }
            _ => bail!("unknown option: {flag}"),
        }
    }

    parsed.config.validate()?;
    Ok(parsed)
}

fn format(args: &[String]) -> Result<()> {
    let parsed = parse_format_args(args)?;
    let Some(origin) = parsed.origin.as_deref() else {
        bail!("origin device (-o) not specified");
    };
    let Some(cache) = parsed.cache.as_deref() else {
        bail!("cache device (-c) not specified");
    };

    let set_id = format_devices(&parsed.config, origin, cache, parsed.metadata.as_deref())
        .context("failed to format cache set")?;
    println!("{set_id}");
    Ok(())
}

// ── dump ────────────────────────────────────────────────────────────────────

fn dump(args: &[String]) -> Result<()> {
    let json = args.iter().any(|arg| arg == "--json");
    let mut devices = args.iter().filter(|arg| *arg != "--json");
    let (Some(device), None) = (devices.next(), devices.next()) else {
        bail!("usage: zc dump DEVICE [--json]");
    };

    let report = DumpReport::from_device(Path::new(device))
        .with_context(|| format!("failed to read superblock from {device}"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        print!("{report}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zc::CacheMode;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn format_args_defaults() {
        let parsed = parse_format_args(&args(&["-o", "/dev/sda", "-c", "/dev/sdb"])).expect("parse");
        assert_eq!(parsed.origin.as_deref(), Some(Path::new("/dev/sda")));
        assert_eq!(parsed.cache.as_deref(), Some(Path::new("/dev/sdb")));
        assert!(parsed.metadata.is_none());
        assert_eq!(parsed.config, FormatConfig::default());
    }

    #[test]
    fn format_args_overrides() {
        let parsed = parse_format_args(&args(&[
            "-o", "/dev/sda", "-c", "/dev/sdb", "-m", "/dev/sdc", "-b", "64K", "-M",
            "Passthrough", "-a", "1M",
        ]))
        .expect("parse");
        assert_eq!(parsed.config.block_size, 65536);
        assert_eq!(parsed.config.cache_mode, CacheMode::Passthrough);
        assert_eq!(parsed.config.alignment, 1 << 20);
        assert_eq!(parsed.metadata.as_deref(), Some(Path::new("/dev/sdc")));
    }

    #[test]
    fn format_args_rejections() {
        for bad in [
            &["-b", "40000"][..],
            &["-b", "5X"],
            &["-M", "writearound"],
            &["-a", "6K"],
            &["-o", "/dev/sda", "-o", "/dev/sdb"],
            &["-x", "1"],
            &["-c"],
        ] {
            assert!(parse_format_args(&args(bad)).is_err(), "{bad:?}");
        }
    }
}
