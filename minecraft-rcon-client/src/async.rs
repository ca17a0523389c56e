//! Asynchronous client for use on a [Tokio](https://tokio.rs/) runtime.
//!
//! [`AsyncClient`] mirrors the blocking [`Client`](crate::Client): one connection, one request
//! at a time, no retries. It can run over any `AsyncRead + AsyncWrite` stream, which is mostly
//! useful for tests; [`AsyncClient::connect`] opens a TCP connection.
//!
//! # Example
//! ```rust,no_run
//! use minecraft_rcon_client::r#async::AsyncClient;
//! use minecraft_rcon_client::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = AsyncClient::new(Config::new("localhost", "25575", "password123")).unwrap();
//!     client.connect().await.unwrap();
//!
//!     println!("{} players online", client.player_count().await.unwrap());
//! }
//! ```

use crate::auth::{AuthExchange, AuthProgress};
use crate::packet::{check_body, FrameBuffer};
use crate::response::{PendingRequest, Progress};
use crate::{
    parse_player_count, parse_player_list, parse_scores, scores_command, Config, Options, Packet,
    PacketType, ResponseMode, Score, LIST_PLAYERS_COMMAND, PLAYER_COUNT_COMMAND,
};
use log::{debug, trace, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

/// Asynchronous RCON client over a stream of type `S`.
pub struct AsyncClient<S = TcpStream> {
    config: Config,
    session: Mutex<Option<AsyncSession<S>>>,
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    // Bumped by every close(), under the shutdown lock
    closes: AtomicU64,
}

struct AsyncSession<S> {
    stream: S,
    buffer: FrameBuffer,
    next_id: i32,
    stale_marker: Option<i32>,
    options: Options,
    shutdown: watch::Receiver<bool>,
    open: bool,
}

impl<S> AsyncClient<S> {
    /// Create a client for the server in `config`. No connection is made yet.
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;
        Ok(AsyncClient {
            config,
            session: Mutex::new(None),
            shutdown: parking_lot::Mutex::new(None),
            closes: AtomicU64::new(0),
        })
    }

    /// Close the connection. A request waiting on another task fails with
    /// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed). Calling this on a closed
    /// client has no effect.
    pub fn close(&self) {
        let sender = {
            let mut shutdown = self.shutdown.lock();
            self.closes.fetch_add(1, Ordering::SeqCst);
            shutdown.take()
        };
        if let Some(sender) = sender {
            debug!("closing connection");
            sender.send_replace(true);
        }

        // A request in flight drops the session itself once it sees the signal
        if let Ok(mut session) = self.session.try_lock() {
            session.take();
        }
    }

    /// Whether the client holds a live, authenticated connection.
    pub fn is_connected(&self) -> bool {
        self.shutdown
            .lock()
            .as_ref()
            .map_or(false, |sender| !*sender.borrow())
    }
}

impl AsyncClient<TcpStream> {
    /// Open a TCP connection to the configured server and log in. An existing connection is
    /// closed first.
    pub async fn connect(&self) -> crate::Result<()> {
        let generation = self.closes.load(Ordering::SeqCst);
        let address = self.config.address();
        debug!("connecting to {}", address);

        let connect = TcpStream::connect(address.as_str());
        let stream = match self.config.options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| {
                    crate::Error::Connect(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ))
                })?,
            None => connect.await,
        }
        .map_err(crate::Error::Connect)?;

        stream.set_nodelay(true).map_err(crate::Error::Connect)?;
        self.login(stream, generation).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncClient<S> {
    /// Log in over an already established `stream`. An existing connection is closed first.
    pub async fn connect_with(&self, stream: S) -> crate::Result<()> {
        let generation = self.closes.load(Ordering::SeqCst);
        self.login(stream, generation).await
    }

    /// Log in unless [`AsyncClient::close`] has been called since `generation` was read.
    async fn login(&self, stream: S, generation: u64) -> crate::Result<()> {
        let mut session = self.session.lock().await;
        if session.take().is_some() {
            debug!("replacing existing connection");
        }

        let (sender, receiver) = watch::channel(false);
        {
            let mut shutdown = self.shutdown.lock();
            if let Some(old) = shutdown.take() {
                old.send_replace(true);
            }
            if self.closes.load(Ordering::SeqCst) != generation {
                debug!("closed while connecting");
                return Err(crate::Error::ConnectionClosed);
            }
            *shutdown = Some(sender);
        }

        let mut new_session = AsyncSession::new(stream, self.config.options.clone(), receiver);
        if let Err(err) = new_session.authenticate(&self.config.password).await {
            debug!("login failed: {}", err);
            self.drop_shutdown();
            return Err(err);
        }

        // A close() racing the end of the login has already signalled the session, which
        // fails its first request and is dropped then
        *session = Some(new_session);
        Ok(())
    }

    /// Run `command` and return the server's output.
    pub async fn execute(&self, command: &str) -> crate::Result<String> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(crate::Error::ConnectionClosed)?;

        match session.execute(command).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_terminal() {
                    warn!("closing connection: {}", err);
                    *guard = None;
                    self.drop_shutdown();
                }
                Err(err)
            }
        }
    }

    /// Names tracked by the scoreboard, in the order the server lists them.
    pub async fn players(&self) -> crate::Result<Vec<String>> {
        parse_player_list(&self.execute(LIST_PLAYERS_COMMAND).await?)
    }

    /// Number of players online.
    pub async fn player_count(&self) -> crate::Result<usize> {
        parse_player_count(&self.execute(PLAYER_COUNT_COMMAND).await?)
    }

    /// Objective scores of `player`, in the order the server lists them.
    pub async fn scores(&self, player: &str) -> crate::Result<Vec<Score>> {
        let command = scores_command(player)?;
        parse_scores(&self.execute(&command).await?)
    }

    fn drop_shutdown(&self) {
        if let Some(sender) = self.shutdown.lock().take() {
            sender.send_replace(true);
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncSession<S> {
    fn new(stream: S, options: Options, shutdown: watch::Receiver<bool>) -> Self {
        AsyncSession {
            stream,
            buffer: FrameBuffer::new(options.max_frame_len),
            next_id: 1,
            stale_marker: None,
            options,
            shutdown,
            open: true,
        }
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }

    async fn authenticate(&mut self, password: &str) -> crate::Result<()> {
        let mut exchange = AuthExchange::new(self.allocate_id(), self.options.skip_auth_echo);
        self.send(&exchange.request(password)).await?;

        loop {
            let packet = self.receive().await?;
            match exchange.accept(&packet)? {
                AuthProgress::Skip => continue,
                AuthProgress::Accepted => return Ok(()),
            }
        }
    }

    async fn execute(&mut self, command: &str) -> crate::Result<String> {
        check_body(command, self.options.max_frame_len)?;

        let id = self.allocate_id();
        let marker = match self.options.response_mode {
            ResponseMode::TrailingMarker => Some(self.allocate_id()),
            ResponseMode::Single => None,
        };

        trace!("executing {:?} as request {}", command, id);
        self.send(&Packet::new(id, PacketType::EXEC_COMMAND, command))
            .await?;
        if let Some(marker) = marker {
            self.send(&Packet::new(marker, PacketType::RESPONSE_VALUE, ""))
                .await?;
        }

        let mut pending = PendingRequest::new(id, marker);
        loop {
            let packet = self.receive().await?;
            match pending.accept(packet, self.stale_marker)? {
                Progress::Pending => continue,
                Progress::Complete {
                    packet,
                    marker_consumed,
                } => {
                    self.stale_marker = if marker_consumed { None } else { marker };
                    return Ok(packet.body);
                }
            }
        }
    }

    async fn send(&mut self, packet: &Packet) -> crate::Result<()> {
        if !self.open {
            return Err(crate::Error::ConnectionClosed);
        }

        check_body(&packet.body, self.options.max_frame_len)?;
        let frame = crate::encode(packet.id, packet.kind, &packet.body)?;
        trace!("sending {:?} packet {} ({} bytes)", packet.kind, packet.id, packet.body.len());

        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&frame).await?;
            stream.flush().await
        };
        let result = guarded(&mut self.shutdown, self.options.write_timeout, write).await;
        if result.is_err() {
            self.open = false;
        }
        result
    }

    async fn receive(&mut self) -> crate::Result<Packet> {
        if !self.open {
            return Err(crate::Error::ConnectionClosed);
        }

        // The deadline covers the whole frame, however many reads it takes
        let result = match self.options.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read_packet())
                .await
                .unwrap_or(Err(crate::Error::Timeout)),
            None => self.read_packet().await,
        };
        if result.is_err() {
            self.open = false;
        }
        result
    }

    async fn read_packet(&mut self) -> crate::Result<Packet> {
        loop {
            if let Some(packet) = self.buffer.next_packet()? {
                trace!("received {:?} packet {} ({} bytes)", packet.kind, packet.id, packet.body.len());
                return Ok(packet);
            }

            let space = self.buffer.read_space();
            let read = guarded(&mut self.shutdown, None, self.stream.read(space)).await;

            match read {
                Ok(0) => {
                    self.buffer.commit(0);
                    return Err(crate::Error::ConnectionClosed);
                }
                Ok(written) => self.buffer.commit(written),
                Err(err) => {
                    self.buffer.commit(0);
                    return Err(err);
                }
            }
        }
    }
}

/// Run an I/O future under the read or write deadline, giving up early when the client is
/// closed.
async fn guarded<T, F>(
    shutdown: &mut watch::Receiver<bool>,
    timeout: Option<Duration>,
    io: F,
) -> crate::Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let io = async {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, io).await {
                Ok(result) => result.map_err(crate::Error::from_io),
                Err(_) => Err(crate::Error::Timeout),
            },
            None => io.await.map_err(crate::Error::from_io),
        }
    };

    tokio::select! {
        biased;
        _ = closed(shutdown) => Err(crate::Error::ConnectionClosed),
        result = io => result,
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        // The sender is dropped together with the client
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
