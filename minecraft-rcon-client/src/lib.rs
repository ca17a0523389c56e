//! This crate provides an RCON client for Minecraft servers, together with parsers for the
//! output of the `scoreboard players list` and `list` commands.
//!
//! The default `sync` feature provides a blocking [`Client`] built on [`std::net::TcpStream`].
//! Enabling the `async` feature adds [`r#async::AsyncClient`], which requires a
//! [Tokio](https://tokio.rs/) runtime.
//!
//! # Example
//! ```rust,no_run
//! use minecraft_rcon_client::{Client, Config};
//!
//! let client = Client::new(Config::new("localhost", "25575", "password123")).unwrap();
//! client.connect().unwrap();
//!
//! for player in client.players().unwrap() {
//!     for score in client.scores(&player).unwrap() {
//!         println!("{} {}={}", player, score.name, score.value);
//!     }
//! }
//! ```

mod auth;
mod config;
mod packet;
mod response;
mod scoreboard;

#[cfg(feature = "sync")]
mod client;
#[cfg(feature = "sync")]
mod session;
#[cfg(feature = "sync")]
mod transport;

#[cfg(all(test, feature = "sync"))]
mod mock;

#[cfg(feature = "async")]
pub mod r#async;

pub use self::config::*;
pub use self::packet::{decode, encode, DecodeError, Packet, PacketType, MIN_FRAME_LEN};
pub use self::response::ResponseMode;
pub use self::scoreboard::*;

#[cfg(feature = "sync")]
pub use self::client::*;
#[cfg(feature = "sync")]
pub use self::transport::{Shutdown, TcpTransport, Transport};

/// Error type for RCON operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not connect to server")]
    Connect(#[source] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("protocol desync: expected response id {expected}, received {received}")]
    ProtocolDesync { expected: i32, received: i32 },

    #[error("unexpected response format: {0:?}")]
    UnexpectedFormat(String),

    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// Whether the connection that produced this error can no longer be used.
    ///
    /// Terminal errors close the session; the caller has to [`connect`](Client::connect) again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::Timeout
                | Error::AuthenticationFailed
                | Error::MalformedPacket(_)
                | Error::ProtocolDesync { .. }
        )
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::ConnectionClosed,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        match err {
            // Only raised when the stream ended part way through a frame
            DecodeError::NeedMoreData => Error::ConnectionClosed,
            DecodeError::Malformed(reason) => Error::MalformedPacket(reason),
        }
    }
}

/// [`Result`] alias for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Connect to an RCON server and authenticate.
///
/// This is a shorthand for [`Client::new`] followed by [`Client::connect`].
///
/// # Example
/// ```rust,no_run
/// use minecraft_rcon_client::{connect, Config, Error};
///
/// match connect(Config::new("localhost", "25575", "password123")) {
///     Ok(client) => println!("{}", client.execute("list").unwrap()),
///     Err(Error::AuthenticationFailed) => eprintln!("Invalid password."),
///     Err(err) => panic!("Connection failed: {}", err),
/// }
/// ```
#[cfg(feature = "sync")]
pub fn connect(config: Config) -> Result<Client> {
    let client = Client::new(config)?;
    client.connect()?;
    Ok(client)
}
