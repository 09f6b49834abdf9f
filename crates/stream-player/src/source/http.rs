//! HTTP transport used for streaming playback.
//!
//! The response body is pulled by a fetcher thread into a bounded channel.
//! `read` polls that channel and checks the liveness watchdog and the
//! session's quit flag between polls, so a stalled server or a quit request
//! never leaves the playback worker blocked indefinitely.
//!
//! Every socket wait is also capped by [`IdleLimit`], so a fetcher blocked
//! on a silent server gives up on its own and releases the connection.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use symphonia::core::io::MediaSource;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, DefaultConnector, NextTimeout, Transport,
};

use super::ReadAhead;
use crate::watchdog::{Watchdog, stalled_error};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the HTTP transport.
#[derive(Clone, Debug)]
pub(crate) struct HttpConfig {
    /// Connect / response-header deadline and body inactivity window.
    pub(crate) timeout: Duration,
    /// Bytes requested per body read.
    pub(crate) chunk_size: usize,
    /// Chunks buffered ahead of the decoder.
    pub(crate) queue_chunks: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            chunk_size: 16 * 1024,
            queue_chunks: 64,
        }
    }
}

struct Fetcher {
    rx: Receiver<io::Result<Vec<u8>>>,
    stop: Arc<AtomicBool>,
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        // A read blocked in the socket ends within one idle window.
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Connector stage that bounds every wait on the wire by `window`.
///
/// ureq only offers whole-body deadlines; this turns the inactivity window
/// into a per-read socket timeout instead.
#[derive(Debug)]
struct IdleLimit {
    window: Duration,
}

impl<In: Transport> Connector<In> for IdleLimit {
    type Out = IdleTransport<In>;

    fn connect(
        &self,
        _details: &ConnectionDetails,
        chained: Option<In>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        Ok(chained.map(|inner| IdleTransport {
            inner,
            window: self.window,
        }))
    }
}

#[derive(Debug)]
struct IdleTransport<T> {
    inner: T,
    window: Duration,
}

impl<T> IdleTransport<T> {
    fn cap(&self, mut timeout: NextTimeout) -> NextTimeout {
        timeout.after = timeout.after.min(self.window.into());
        timeout
    }
}

impl<T: Transport> Transport for IdleTransport<T> {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        let timeout = self.cap(timeout);
        self.inner.transmit_output(amount, timeout)
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let timeout = self.cap(timeout);
        self.inner.await_input(timeout)
    }

    fn is_open(&mut self) -> bool {
        self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_connect(Some(timeout))
        .timeout_recv_response(Some(timeout))
        .build();
    let connector = DefaultConnector::new().chain(IdleLimit { window: timeout });
    ureq::Agent::with_parts(config, connector, DefaultResolver::default())
}

/// A streaming HTTP body exposed as a Symphonia [`MediaSource`].
pub(crate) struct HttpStream {
    url: String,
    agent: ureq::Agent,
    config: HttpConfig,
    fetcher: Option<Fetcher>,
    buf: Vec<u8>,
    buf_pos: usize,
    pos: u64,
    len: Option<u64>,
    ranges: bool,
    eof: bool,
    /// A failed body stays failed until the next request.
    failed: Option<(io::ErrorKind, String)>,
    watchdog: Arc<Watchdog>,
    quit: Arc<AtomicBool>,
    read_ahead: Arc<ReadAhead>,
}

impl HttpStream {
    /// Issue the initial request and start pulling the body.
    ///
    /// Connect and response-header waits use ureq's native deadlines; body
    /// reads are covered by the watchdog and by the socket idle limit.
    pub(crate) fn open(
        url: &str,
        config: HttpConfig,
        watchdog: Arc<Watchdog>,
        quit: Arc<AtomicBool>,
        read_ahead: Arc<ReadAhead>,
    ) -> io::Result<Self> {
        let agent = build_agent(config.timeout);

        let mut stream = Self {
            url: url.to_string(),
            agent,
            config,
            fetcher: None,
            buf: Vec::new(),
            buf_pos: 0,
            pos: 0,
            len: None,
            ranges: false,
            eof: false,
            failed: None,
            watchdog,
            quit,
            read_ahead,
        };
        stream.start_at(0)?;
        Ok(stream)
    }

    /// (Re)start the fetcher at byte offset `start`.
    fn start_at(&mut self, start: u64) -> io::Result<()> {
        self.fetcher = None;
        self.buf.clear();
        self.buf_pos = 0;
        self.eof = false;
        self.failed = None;

        let mut req = self.agent.get(&self.url);
        if start > 0 {
            req = req.header("Range", &format!("bytes={start}-"));
        }
        self.watchdog.ping();
        let resp = req.call().map_err(map_ureq_error)?;

        let status = resp.status();
        let headers = resp.headers();
        let content_length = header_u64(headers.get("Content-Length"));
        let accepts_ranges = headers
            .get("Accept-Ranges")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let content_range = headers
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if start > 0 && status != ureq::http::StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("server ignored range request (status {status})"),
            ));
        }

        if start == 0 {
            self.ranges = accepts_ranges;
            self.len = content_length;
        } else if let Some(total) = content_range.as_deref().and_then(parse_content_range_total) {
            self.len = Some(total);
        }
        self.pos = start;

        tracing::debug!(
            url = %self.url,
            start,
            len = ?self.len,
            ranges = self.ranges,
            "http stream connected"
        );

        let (tx, rx) = crossbeam_channel::bounded(self.config.queue_chunks.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let (_, body) = resp.into_parts();
        let chunk_size = self.config.chunk_size.max(1);
        let watchdog = self.watchdog.clone();
        let read_ahead = self.read_ahead.clone();
        let stop_thread = stop.clone();
        thread::Builder::new()
            .name("http-fetch".to_string())
            .spawn(move || {
                fetch_loop(
                    body.into_reader(),
                    chunk_size,
                    tx,
                    &stop_thread,
                    &watchdog,
                    &read_ahead,
                )
            })?;
        self.fetcher = Some(Fetcher { rx, stop });
        Ok(())
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let Some(fetcher) = self.fetcher.as_ref() else {
            self.eof = true;
            return Ok(());
        };
        loop {
            match fetcher.rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(chunk)) => {
                    if chunk.is_empty() {
                        self.eof = true;
                    } else {
                        self.buf = chunk;
                        self.buf_pos = 0;
                    }
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.failed = Some((e.kind(), e.to_string()));
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.quit.load(Ordering::Relaxed) {
                        return Err(io::Error::new(io::ErrorKind::Interrupted, "playback cancelled"));
                    }
                    if !self.read_ahead.is_paused() && self.watchdog.is_stalled() {
                        return Err(stalled_error(self.watchdog.timeout()));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.eof = true;
                    return Ok(());
                }
            }
        }
    }
}

fn fetch_loop(
    mut reader: impl Read,
    chunk_size: usize,
    tx: Sender<io::Result<Vec<u8>>>,
    stop: &AtomicBool,
    watchdog: &Watchdog,
    read_ahead: &ReadAhead,
) {
    loop {
        read_ahead.wait_while_paused(stop);
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut chunk = vec![0u8; chunk_size];
        match reader.read(&mut chunk) {
            Ok(0) => {
                let _ = tx.send(Ok(Vec::new()));
                return;
            }
            Ok(n) => {
                watchdog.ping();
                chunk.truncate(n);
                if tx.send(Ok(chunk)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let e = classify_body_error(e);
                tracing::debug!("http body read failed: {e}");
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl Read for HttpStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.buf_pos >= self.buf.len() {
            if let Some((kind, msg)) = &self.failed {
                return Err(io::Error::new(*kind, msg.clone()));
            }
            if self.eof {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        let available = self.buf.len() - self.buf_pos;
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        self.pos = self.pos.saturating_add(n as u64);
        Ok(n)
    }
}

impl Seek for HttpStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(x) => x,
            SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
            SeekFrom::End(d) => {
                let len = self.len.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "stream length unknown")
                })?;
                len.saturating_add_signed(d)
            }
        };
        if target == self.pos {
            return Ok(self.pos);
        }

        // Forward seeks inside the current chunk need no new request.
        let chunk_start = self.pos - self.buf_pos as u64;
        let chunk_end = chunk_start + self.buf.len() as u64;
        if target >= chunk_start && target < chunk_end {
            self.buf_pos = (target - chunk_start) as usize;
            self.pos = target;
            return Ok(self.pos);
        }

        if !self.ranges {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream does not support seeking",
            ));
        }
        self.start_at(target)?;
        Ok(self.pos)
    }
}

impl MediaSource for HttpStream {
    fn is_seekable(&self) -> bool {
        self.ranges && self.len.is_some()
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

fn map_ureq_error(err: ureq::Error) -> io::Error {
    match err {
        ureq::Error::Io(e) => e,
        ureq::Error::Timeout(t) => {
            io::Error::new(io::ErrorKind::TimedOut, format!("http timeout: {t}"))
        }
        ureq::Error::StatusCode(404) => io::Error::new(io::ErrorKind::NotFound, "http status 404"),
        ureq::Error::StatusCode(code) => io::Error::other(format!("http status {code}")),
        other => io::Error::other(format!("http request failed: {other}")),
    }
}

/// ureq hands body failures back wrapped in `io::ErrorKind::Other`; recover
/// the kinds the read loop distinguishes.
fn classify_body_error(err: io::Error) -> io::Error {
    let kind = match err.get_ref().and_then(|e| e.downcast_ref::<ureq::Error>()) {
        Some(ureq::Error::Timeout(_)) => io::ErrorKind::TimedOut,
        // Broken transfer framing is corrupt data, like a bad frame.
        Some(ureq::Error::Protocol(_)) => io::ErrorKind::InvalidData,
        _ => return err,
    };
    io::Error::new(kind, err.to_string())
}

fn header_u64(value: Option<&ureq::http::HeaderValue>) -> Option<u64> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Extract the total length from a Content-Range header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    // Format: "bytes start-end/total"
    let (_, total) = header.split_once('/')?;
    total.parse::<u64>().ok()
}
