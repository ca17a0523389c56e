use crate::packet::{check_body, FrameBuffer};
use crate::{Options, Packet};
use log::{debug, trace};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown as SocketShutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A connection that moves whole packets.
///
/// Implementations report I/O failures as [`Error::ConnectionClosed`] or [`Error::Timeout`] and
/// are unusable afterwards.
///
/// [`Error::ConnectionClosed`]: crate::Error::ConnectionClosed
/// [`Error::Timeout`]: crate::Error::Timeout
pub trait Transport: Send {
    fn send(&mut self, packet: &Packet) -> crate::Result<()>;

    /// Block until a complete packet has arrived.
    fn receive(&mut self) -> crate::Result<Packet>;

    /// Close the connection. Calling this more than once has no effect.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// A handle that closes the connection from another thread. A [`Transport::receive`] blocked
    /// at that time returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed).
    fn shutdown_handle(&self) -> Arc<dyn Shutdown>;
}

pub trait Shutdown: Send + Sync {
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// [`Transport`] over a blocking TCP socket.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    shutdown: Arc<TcpShutdown>,
    buffer: FrameBuffer,
    max_frame_len: usize,
    read_timeout: Option<Duration>,
}

#[derive(Debug)]
struct TcpShutdown {
    stream: TcpStream,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Connect to `addr`, applying the timeouts from `options`.
    pub fn open<A: ToSocketAddrs>(addr: A, options: &Options) -> crate::Result<Self> {
        let stream = match options.connect_timeout {
            Some(timeout) => connect_timeout(addr, timeout)?,
            None => TcpStream::connect(addr).map_err(crate::Error::Connect)?,
        };

        stream
            .set_write_timeout(options.write_timeout)
            .map_err(crate::Error::Connect)?;
        stream.set_nodelay(true).map_err(crate::Error::Connect)?;

        let shutdown_stream = stream.try_clone().map_err(crate::Error::Connect)?;
        if let Ok(peer) = stream.peer_addr() {
            debug!("connected to {}", peer);
        }

        Ok(TcpTransport {
            stream,
            shutdown: Arc::new(TcpShutdown {
                stream: shutdown_stream,
                closed: AtomicBool::new(false),
            }),
            buffer: FrameBuffer::new(options.max_frame_len),
            max_frame_len: options.max_frame_len,
            read_timeout: options.read_timeout,
        })
    }

    /// The deadline covers the whole frame, however many reads it takes.
    fn read_packet(&mut self) -> crate::Result<Packet> {
        let deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);

        // Repeatedly fetch data from the remote until a whole frame is buffered
        loop {
            if let Some(packet) = self.buffer.next_packet()? {
                trace!("received {:?} packet {} ({} bytes)", packet.kind, packet.id, packet.body.len());
                return Ok(packet);
            }

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!("no complete frame within {:?}", self.read_timeout);
                    return Err(crate::Error::Timeout);
                }
                self.stream
                    .set_read_timeout(Some(remaining))
                    .map_err(crate::Error::from_io)?;
            }

            let space = self.buffer.read_space();
            match self.stream.read(space) {
                Ok(0) => {
                    self.buffer.commit(0);
                    if self.buffer.has_partial() {
                        debug!("connection closed part way through a frame");
                    }
                    return Err(crate::Error::ConnectionClosed);
                }
                Ok(written) => self.buffer.commit(written),
                Err(err) if err.kind() == ErrorKind::Interrupted => self.buffer.commit(0),
                Err(err) => {
                    self.buffer.commit(0);
                    if self.shutdown.is_shutdown() {
                        return Err(crate::Error::ConnectionClosed);
                    }
                    debug!("read failed: {}", err);
                    return Err(crate::Error::from_io(err));
                }
            }
        }
    }
}

fn connect_timeout<A: ToSocketAddrs>(addr: A, timeout: std::time::Duration) -> crate::Result<TcpStream> {
    let mut last_err = None;
    for addr in addr.to_socket_addrs().map_err(crate::Error::Connect)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!("connecting to {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }

    Err(crate::Error::Connect(last_err.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidInput, "address resolved to nothing")
    })))
}

impl Transport for TcpTransport {
    fn send(&mut self, packet: &Packet) -> crate::Result<()> {
        if !self.is_open() {
            return Err(crate::Error::ConnectionClosed);
        }

        check_body(&packet.body, self.max_frame_len)?;
        let frame = crate::encode(packet.id, packet.kind, &packet.body)?;
        trace!("sending {:?} packet {} ({} bytes)", packet.kind, packet.id, packet.body.len());

        if let Err(err) = self.stream.write_all(&frame).and_then(|_| self.stream.flush()) {
            debug!("write failed: {}", err);
            let was_shutdown = self.shutdown.is_shutdown();
            self.close();
            return Err(if was_shutdown {
                crate::Error::ConnectionClosed
            } else {
                crate::Error::from_io(err)
            });
        }
        Ok(())
    }

    fn receive(&mut self) -> crate::Result<Packet> {
        if !self.is_open() {
            return Err(crate::Error::ConnectionClosed);
        }

        let result = self.read_packet();
        if result.is_err() {
            self.close();
        }
        result
    }

    fn close(&mut self) {
        self.shutdown.shutdown();
    }

    fn is_open(&self) -> bool {
        !self.shutdown.is_shutdown()
    }

    fn shutdown_handle(&self) -> Arc<dyn Shutdown> {
        self.shutdown.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shutdown for TcpShutdown {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("closing connection");
        if let Err(err) = self.stream.shutdown(SocketShutdown::Both) {
            // Already gone if the peer closed first
            trace!("socket shutdown failed: {}", err);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
