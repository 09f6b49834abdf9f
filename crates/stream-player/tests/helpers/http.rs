//! A small HTTP/1.1 server that serves one body and can misbehave on cue.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// Serve every request in full, honouring `Range`.
    None,
    /// Send this many body bytes, then go silent with the socket open.
    StallAfter(usize),
    /// For the first `responses` requests, send `bytes` body bytes with
    /// chunked encoding followed by a malformed chunk header.
    CorruptAfter { bytes: usize, responses: usize },
}

pub struct WavServer {
    pub url: String,
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl WavServer {
    pub fn start(body: Vec<u8>, fault: Fault) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let body = Arc::new(body);
        let requests = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let (accepted, live, halt) = (requests.clone(), open.clone(), stop.clone());
        thread::spawn(move || {
            for conn in listener.incoming() {
                if halt.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(conn) = conn else { continue };
                let index = accepted.fetch_add(1, Ordering::SeqCst);
                live.fetch_add(1, Ordering::SeqCst);
                let (body, live, halt) = (body.clone(), live.clone(), halt.clone());
                thread::spawn(move || {
                    let _ = serve(conn, &body, fault, index, &halt);
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            url: format!("http://{addr}/stream.wav"),
            addr,
            requests,
            open,
            stop,
        }
    }

    /// Requests received so far. Every response closes its connection.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Connections the server is still holding.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WavServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wake the accept loop.
        let _ = TcpStream::connect(self.addr);
    }
}

fn serve(
    mut conn: TcpStream,
    body: &[u8],
    fault: Fault,
    index: usize,
    stop: &AtomicBool,
) -> io::Result<()> {
    conn.set_read_timeout(Some(Duration::from_secs(5)))?;
    let head = read_head(&mut conn)?;
    let start = range_start(&head).unwrap_or(0).min(body.len());
    let rest = &body[start..];

    let status = if start > 0 {
        "206 Partial Content"
    } else {
        "200 OK"
    };
    let mut headers = format!(
        "HTTP/1.1 {status}\r\nContent-Type: audio/wav\r\nAccept-Ranges: bytes\r\nConnection: close\r\n"
    );
    if start > 0 {
        headers.push_str(&format!(
            "Content-Range: bytes {start}-{}/{}\r\n",
            body.len() - 1,
            body.len()
        ));
    }

    match fault {
        Fault::CorruptAfter { bytes, responses } if index < responses => {
            let good = &rest[..bytes.min(rest.len())];
            let mut out = headers.into_bytes();
            out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
            out.extend_from_slice(format!("{:x}\r\n", good.len()).as_bytes());
            out.extend_from_slice(good);
            out.extend_from_slice(b"\r\nzz\r\n");
            conn.write_all(&out)?;
            conn.flush()
        }
        Fault::StallAfter(bytes) => {
            headers.push_str(&format!("Content-Length: {}\r\n\r\n", rest.len()));
            conn.write_all(headers.as_bytes())?;
            conn.write_all(&rest[..bytes.min(rest.len())])?;
            conn.flush()?;
            hold_until_client_leaves(&mut conn, stop)
        }
        _ => {
            headers.push_str(&format!("Content-Length: {}\r\n\r\n", rest.len()));
            conn.write_all(headers.as_bytes())?;
            conn.write_all(rest)?;
            conn.flush()
        }
    }
}

fn read_head(conn: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 512];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = conn.read(&mut buf)?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn range_start(head: &str) -> Option<usize> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        let spec = value.trim().strip_prefix("bytes=")?;
        spec.split('-').next()?.parse().ok()
    })
}

/// Keep the socket open without sending until the client closes it.
fn hold_until_client_leaves(conn: &mut TcpStream, stop: &AtomicBool) -> io::Result<()> {
    conn.set_read_timeout(Some(Duration::from_millis(50)))?;
    let mut buf = [0u8; 64];
    while !stop.load(Ordering::Relaxed) {
        match conn.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
