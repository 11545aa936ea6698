// SPDX-License-Identifier: GPL-3.0-only

//! MJPEG multipart stream server (§4.5): a TCP listener broadcasting the
//! Orchestrator's latest annotated frame to any number of connected
//! clients, each served by its own thread.
//!
//! One accept thread, a per-client send loop that polls a shared "current
//! frame" cell, and disconnect handling that simply closes that one
//! client's socket without touching the server or any other client.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, warn};

use crate::constants::{STREAM_CLIENT_INTERVAL_MS, STREAM_JPEG_QUALITY, STREAM_NO_FRAME_POLL_MS};
use crate::errors::StreamError;

const MULTIPART_BOUNDARY: &str = "frame";

/// Builds a listening `TcpListener` with `SO_REUSEADDR` set before `bind()`,
/// so a server that was just stopped can restart on the same port
/// immediately instead of hitting `EADDRINUSE` while the socket sits in
/// `TIME_WAIT` (§4.5).
fn bind_with_reuse_addr(port: u16) -> Result<TcpListener, StreamError> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(StreamError::BindFailed(std::io::Error::last_os_error().to_string()));
        }

        let optval: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return Err(StreamError::BindFailed(std::io::Error::last_os_error().to_string()));
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr { s_addr: 0 }, // INADDR_ANY
            sin_zero: [0; 8],
        };
        let ret = libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if ret < 0 {
            libc::close(fd);
            return Err(StreamError::BindFailed(std::io::Error::last_os_error().to_string()));
        }

        if libc::listen(fd, 128) < 0 {
            libc::close(fd);
            return Err(StreamError::BindFailed(std::io::Error::last_os_error().to_string()));
        }

        Ok(std::os::fd::FromRawFd::from_raw_fd(fd))
    }
}

/// Single-slot shared buffer holding the most recent frame to broadcast.
/// Writers overwrite, readers clone (§3, §5).
#[derive(Default)]
pub struct BroadcastCell {
    frame_jpeg: Mutex<Option<Arc<Vec<u8>>>>,
}

impl BroadcastCell {
    pub fn write(&self, rgb: &image::RgbImage) {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, STREAM_JPEG_QUALITY);
        if encoder.encode_image(rgb).is_ok() {
            *self.frame_jpeg.lock().unwrap() = Some(Arc::new(buf));
        }
    }

    fn read(&self) -> Option<Arc<Vec<u8>>> {
        self.frame_jpeg.lock().unwrap().clone()
    }
}

struct ClientList {
    handles: Vec<JoinHandle<()>>,
}

/// Accepts TCP clients and serves the multipart-image byte stream (§4.5).
pub struct StreamServer {
    port: u16,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<TcpListener>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    clients: Arc<Mutex<ClientList>>,
    pub broadcast: Arc<BroadcastCell>,
}

impl StreamServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            running: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
            accept_thread: Mutex::new(None),
            clients: Arc::new(Mutex::new(ClientList { handles: Vec::new() })),
            broadcast: Arc::new(BroadcastCell::default()),
        }
    }

    /// Binds the listening socket with address reuse so rapid restarts
    /// don't fail (§4.5). `setsockopt(SO_REUSEADDR)` has no effect if set
    /// after `bind()`, so this builds the socket by hand instead of going
    /// through `TcpListener::bind` directly.
    pub fn initialize(&self) -> Result<(), StreamError> {
        let listener = bind_with_reuse_addr(self.port)?;
        listener.set_nonblocking(false)?;
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    /// Spawns the accept thread. Idempotent: a second call while already
    /// running is a no-op (§4.5).
    ///
    /// The listener is put in non-blocking mode and polled: a genuinely
    /// blocking `accept()` can only be unblocked from another thread by
    /// closing its exact file descriptor, but a cloned listener (the usual
    /// way to hand a listener to a thread while keeping one for `stop()`)
    /// duplicates the descriptor rather than sharing it, so closing the
    /// original would not wake a blocked clone. Polling avoids that trap
    /// at the cost of a bounded shutdown latency (`STREAM_NO_FRAME_POLL_MS`).
    pub fn start(&self) -> Result<(), StreamError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| StreamError::BindFailed("start() called before initialize()".into()))?;
        listener.set_nonblocking(true)?;

        let running = Arc::clone(&self.running);
        let clients = Arc::clone(&self.clients);
        let broadcast = Arc::clone(&self.broadcast);

        let handle = std::thread::spawn(move || {
            accept_loop(listener, running, clients, broadcast);
        });
        *self.accept_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// True while the accept thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the accept thread to stop, joins it, then joins every
    /// client thread. A no-op if never started (§4.5).
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let handles = std::mem::take(&mut self.clients.lock().unwrap().handles);
        for h in handles {
            let _ = h.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    clients: Arc<Mutex<ClientList>>,
    broadcast: Arc<BroadcastCell>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((socket, _addr)) => {
                let broadcast = Arc::clone(&broadcast);
                let running = Arc::clone(&running);
                let handle = std::thread::spawn(move || {
                    client_loop(socket, &running, &broadcast);
                });
                clients.lock().unwrap().handles.push(handle);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(STREAM_NO_FRAME_POLL_MS));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept streaming client");
                std::thread::sleep(Duration::from_millis(STREAM_NO_FRAME_POLL_MS));
            }
        }
    }
}

fn client_loop(mut socket: TcpStream, running: &AtomicBool, broadcast: &BroadcastCell) {
    let preamble = "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
         Cache-Control: no-cache, private\r\n\
         Connection: keep-alive\r\n\r\n";
    if socket.write_all(preamble.as_bytes()).is_err() {
        debug!("Streaming client disconnected before preamble was sent");
        return;
    }

    while running.load(Ordering::SeqCst) {
        let Some(jpeg) = broadcast.read() else {
            std::thread::sleep(Duration::from_millis(STREAM_NO_FRAME_POLL_MS));
            continue;
        };

        let header = format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        );
        if socket.write_all(header.as_bytes()).is_err() {
            debug!("Streaming client disconnected (header send failed)");
            return;
        }
        if socket.write_all(&jpeg).is_err() {
            debug!("Streaming client disconnected (frame send failed)");
            return;
        }
        if socket.write_all(b"\r\n").is_err() {
            debug!("Streaming client disconnected (boundary send failed)");
            return;
        }

        std::thread::sleep(Duration::from_millis(STREAM_CLIENT_INTERVAL_MS));
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpStream as ClientStream;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn start_stop_restart_cycle_succeeds() {
        let port = free_port();
        let server = StreamServer::new(port);
        server.initialize().unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
        assert!(!server.is_running());

        server.initialize().unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
    }

    #[test]
    fn stopping_before_starting_is_a_noop() {
        let server = StreamServer::new(free_port());
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn abrupt_disconnect_does_not_kill_server() {
        let port = free_port();
        let server = StreamServer::new(port);
        server.initialize().unwrap();
        server.start().unwrap();

        {
            let mut client = ClientStream::connect(("127.0.0.1", port)).unwrap();
            let mut buf = [0u8; 64];
            let _ = client.read(&mut buf);
            // Disconnect without reading the body.
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(server.is_running());

        // A second client can still connect.
        let second = ClientStream::connect(("127.0.0.1", port));
        assert!(second.is_ok());

        server.stop();
    }

    #[test]
    fn starting_twice_is_idempotent() {
        let port = free_port();
        let server = StreamServer::new(port);
        server.initialize().unwrap();
        server.start().unwrap();
        server.start().unwrap();
        assert!(server.is_running());
        server.stop();
    }
}
