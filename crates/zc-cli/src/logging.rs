#![forbid(unsafe_code)]
//! Process-wide diagnostic sink.
//!
//! `init` installs a `tracing-subscriber` fmt layer, filtered by `ZC_LOG`
//! (default `info`), that writes either to standard error or to the local
//! syslog socket. It runs once per process. Nothing reads the sink back
//! except [`report_error`], which only decides where the final message goes.

use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::sync::{Arc, Once, OnceLock};
use tracing::{Level, Metadata};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;

pub const FILTER_ENV: &str = "ZC_LOG";
pub const SYSLOG_IDENT: &str = "udev-zodcache";
const SYSLOG_SOCKET: &str = "/dev/log";
/// `LOG_USER` facility code.
const FACILITY_USER: u8 = 1;

static INIT: Once = Once::new();
static ACTIVE: OnceLock<Sink> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sink {
    #[default]
    Stderr,
    Syslog,
}

pub fn init(sink: Sink) {
    INIT.call_once(|| {
        let _ = ACTIVE.set(sink);
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .with_env_var(FILTER_ENV)
            .from_env_lossy();

        match sink {
            Sink::Stderr => {
                let layer = fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(io::stderr)
                    .with_filter(filter);
                tracing_subscriber::registry().with(layer).init();
            }
            Sink::Syslog => {
                let layer = fmt::layer()
                    .with_ansi(false)
                    .without_time()
                    .with_target(false)
                    .with_level(false)
                    .with_writer(SyslogWriter::connect())
                    .with_filter(filter);
                tracing_subscriber::registry().with(layer).init();
            }
        }
    });
}

/// Report the error that ends the process through the active sink.
pub fn report_error(error: &anyhow::Error) {
    match ACTIVE.get() {
        Some(Sink::Syslog) => tracing::error!("{error:#}"),
        _ => eprintln!("error: {error:#}"),
    }
}

// ── Syslog writer ───────────────────────────────────────────────────────────

/// Severity for a tracing level, per RFC 3164.
#[must_use]
pub fn severity(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    }
}

/// One syslog datagram: `<PRI>ident[pid]: message`.
#[must_use]
pub fn frame(level: Level, pid: u32, message: &str) -> Vec<u8> {
    let priority = FACILITY_USER * 8 + severity(level);
    format!(
        "<{priority}>{SYSLOG_IDENT}[{pid}]: {}",
        message.trim_end_matches('\n')
    )
    .into_bytes()
}

/// Hands out one buffering writer per event. Falls back to standard error
/// when the syslog socket cannot be reached.
#[derive(Debug, Clone)]
pub struct SyslogWriter {
    socket: Option<Arc<UnixDatagram>>,
}

impl SyslogWriter {
    #[must_use]
    pub fn connect() -> Self {
        let socket = UnixDatagram::unbound()
            .and_then(|socket| socket.connect(SYSLOG_SOCKET).map(|()| socket))
            .ok()
            .map(Arc::new);
        Self { socket }
    }

    fn event(&self, level: Level) -> SyslogEvent {
        SyslogEvent {
            socket: self.socket.clone(),
            level,
            buf: Vec::new(),
        }
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogEvent;

    fn make_writer(&'a self) -> Self::Writer {
        self.event(Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.event(*meta.level())
    }
}

/// Collects one formatted event and sends it as a single datagram on drop.
pub struct SyslogEvent {
    socket: Option<Arc<UnixDatagram>>,
    level: Level,
    buf: Vec<u8>,
}

impl Write for SyslogEvent {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogEvent {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let message = String::from_utf8_lossy(&self.buf);
        let sent = self.socket.as_ref().is_some_and(|socket| {
            socket
                .send(&frame(self.level, std::process::id(), &message))
                .is_ok()
        });
        if !sent {
            let _ = io::stderr().write_all(&self.buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_use_user_facility() {
        assert_eq!(frame(Level::ERROR, 42, "x")[..4], *b"<11>");
        assert_eq!(frame(Level::INFO, 42, "x")[..4], *b"<14>");
        assert_eq!(frame(Level::DEBUG, 42, "x")[..4], *b"<15>");
    }

    #[test]
    fn frame_layout() {
        assert_eq!(
            frame(Level::WARN, 7, "device busy\n"),
            b"<12>udev-zodcache[7]: device busy".to_vec()
        );
    }

    #[test]
    fn datagram_carries_whole_event() {
        let (tx, rx) = UnixDatagram::pair().expect("pair");
        let writer = SyslogWriter {
            socket: Some(Arc::new(tx)),
        };
        {
            let mut event = writer.event(Level::ERROR);
            event.write_all(b"first half, ").expect("write");
            event.write_all(b"second half\n").expect("write");
        }
        let mut buf = [0_u8; 256];
        let n = rx.recv(&mut buf).expect("recv");
        let text = std::str::from_utf8(&buf[..n]).expect("utf8");
        assert!(text.starts_with("<11>udev-zodcache["));
        assert!(text.ends_with("]: first half, second half"));
    }

    #[test]
    fn disconnected_writer_still_accepts_output() {
        let writer = SyslogWriter { socket: None };
        let mut event = writer.make_writer();
        assert_eq!(event.write(b"fallback\n").expect("write"), 9);
    }
}
