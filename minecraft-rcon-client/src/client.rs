use crate::session::Session;
use crate::{
    parse_player_count, parse_player_list, parse_scores, scores_command, Config, Options, Score,
    Shutdown, TcpTransport, Transport, LIST_PLAYERS_COMMAND, PLAYER_COUNT_COMMAND,
};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Opens the connection a [`Client`] runs on.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn open(&self) -> crate::Result<Self::Transport>;
}

/// [`Connector`] for a TCP server.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    options: Options,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, options: Options) -> Self {
        TcpConnector {
            address: address.into(),
            options,
        }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn open(&self) -> crate::Result<TcpTransport> {
        debug!("connecting to {}", self.address);
        TcpTransport::open(self.address.as_str(), &self.options)
    }
}

/// Blocking RCON client.
///
/// The client owns at most one connection. Requests are strictly one at a time: concurrent
/// callers of [`Client::execute`] wait for each other. Errors that leave the connection unusable
/// (see [`Error::is_terminal`]) close it, and every later call fails with
/// [`Error::ConnectionClosed`] until [`Client::connect`] is called again. The client never
/// reconnects or retries on its own.
///
/// [`Error::is_terminal`]: crate::Error::is_terminal
/// [`Error::ConnectionClosed`]: crate::Error::ConnectionClosed
pub struct Client<C: Connector = TcpConnector> {
    connector: C,
    password: String,
    options: Options,
    session: Mutex<Option<Session<C::Transport>>>,
    // Kept outside the session lock so close() can interrupt a request in progress
    shutdown: Mutex<Option<Arc<dyn Shutdown>>>,
    connected: AtomicBool,
}

impl Client<TcpConnector> {
    /// Create a client for the server in `config`. No connection is made until
    /// [`Client::connect`].
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;
        let connector = TcpConnector::new(config.address(), config.options.clone());
        Ok(Client::with_connector(connector, config.password, config.options))
    }
}

impl<C: Connector> Client<C> {
    pub fn with_connector(connector: C, password: impl Into<String>, options: Options) -> Self {
        Client {
            connector,
            password: password.into(),
            options,
            session: Mutex::new(None),
            shutdown: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Open the connection and log in.
    ///
    /// An existing connection is closed first. Fails with
    /// [`Error::AuthenticationFailed`](crate::Error::AuthenticationFailed) if the server rejects
    /// the password.
    pub fn connect(&self) -> crate::Result<()> {
        let mut session = self.session.lock();
        if let Some(mut old) = session.take() {
            debug!("replacing existing connection");
            old.close();
        }
        self.connected.store(false, Ordering::SeqCst);

        let transport = self.connector.open()?;
        let mut new_session = Session::new(transport, self.options.clone());
        *self.shutdown.lock() = Some(new_session.shutdown_handle());

        if let Err(err) = new_session.authenticate(&self.password) {
            debug!("login failed: {}", err);
            new_session.close();
            self.shutdown.lock().take();
            return Err(err);
        }

        *session = Some(new_session);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the client holds a live, authenticated connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self
                .shutdown
                .lock()
                .as_ref()
                .map_or(false, |handle| !handle.is_shutdown())
    }

    /// Run `command` and return the server's output.
    pub fn execute(&self, command: &str) -> crate::Result<String> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(crate::Error::ConnectionClosed)?;

        match session.execute(command) {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_terminal() {
                    warn!("closing connection: {}", err);
                    session.close();
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                    self.shutdown.lock().take();
                }
                Err(err)
            }
        }
    }

    /// Close the connection. A request blocked on another thread fails with
    /// [`Error::ConnectionClosed`](crate::Error::ConnectionClosed). Calling this on a closed
    /// client has no effect.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);

        let handle = self.shutdown.lock().take();
        if let Some(handle) = handle {
            handle.shutdown();
        }

        if let Some(mut session) = self.session.lock().take() {
            session.close();
        }
    }

    /// Names tracked by the scoreboard, in the order the server lists them.
    pub fn players(&self) -> crate::Result<Vec<String>> {
        parse_player_list(&self.execute(LIST_PLAYERS_COMMAND)?)
    }

    /// Number of players online.
    pub fn player_count(&self) -> crate::Result<usize> {
        parse_player_count(&self.execute(PLAYER_COUNT_COMMAND)?)
    }

    /// Objective scores of `player`, in the order the server lists them.
    pub fn scores(&self, player: &str) -> crate::Result<Vec<Score>> {
        let command = scores_command(player)?;
        parse_scores(&self.execute(&command)?)
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{server, MockConnector, MockTransport, Reply};
    use crate::{Packet, PacketType};
    use std::thread;

    fn scoreboard(command: &str) -> String {
        match command {
            "scoreboard players list" => "There are 2 tracked players: Alice, Bob".to_string(),
            "scoreboard players list Alice" => "Alice has 1,234 [gold]\nAlice has no score recorded for [xp]".to_string(),
            "scoreboard players list Bob" => "Bob has no scores".to_string(),
            "list" => "There are 2 of a max of 20 players online: Alice, Bob".to_string(),
            other => format!("ran {}", other),
        }
    }

    fn client(password: &'static str) -> Client<MockConnector<impl Fn() -> crate::Result<MockTransport> + Send + Sync>> {
        let connector = MockConnector::new(|| Ok(server("secret", scoreboard)));
        Client::with_connector(connector, password, Options::default())
    }

    #[test]
    fn reads_scoreboard() {
        let client = client("secret");
        client.connect().unwrap();
        assert!(client.is_connected());

        assert_eq!(client.players().unwrap(), ["Alice", "Bob"]);
        assert_eq!(client.player_count().unwrap(), 2);
        assert_eq!(
            client.scores("Alice").unwrap(),
            [Score::new("gold", 1234), Score::new("xp", 0)]
        );
        assert!(client.scores("Bob").unwrap().is_empty());
    }

    #[test]
    fn wrong_password_fails_and_leaves_client_closed() {
        let client = client("wrong");
        assert!(matches!(
            client.connect(),
            Err(crate::Error::AuthenticationFailed)
        ));
        assert!(!client.is_connected());
        assert!(matches!(
            client.execute("list"),
            Err(crate::Error::ConnectionClosed)
        ));
    }

    #[test]
    fn execute_before_connect_is_rejected() {
        let client = client("secret");
        assert!(matches!(
            client.execute("list"),
            Err(crate::Error::ConnectionClosed)
        ));
        assert_eq!(client.connector.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn terminal_error_drops_connection() {
        let connector = MockConnector::new(|| {
            Ok(MockTransport::new(|packet: &Packet| match packet.kind {
                PacketType::AUTH => Reply::Packets(vec![Packet::new(
                    packet.id,
                    PacketType::AUTH_RESPONSE,
                    "",
                )]),
                _ => Reply::Packets(vec![Packet::new(
                    packet.id + 100,
                    PacketType::RESPONSE_VALUE,
                    "stray",
                )]),
            }))
        });
        let client = Client::with_connector(connector, "pw", Options::default());
        client.connect().unwrap();

        assert!(matches!(
            client.execute("list"),
            Err(crate::Error::ProtocolDesync { .. })
        ));
        assert!(!client.is_connected());
        assert!(matches!(
            client.execute("list"),
            Err(crate::Error::ConnectionClosed)
        ));

        // The caller decides to reconnect
        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.connector.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn server_closing_connection_is_reported() {
        let connector = MockConnector::new(|| {
            Ok(MockTransport::new(|packet: &Packet| match packet.kind {
                PacketType::AUTH => Reply::Packets(vec![Packet::new(
                    packet.id,
                    PacketType::AUTH_RESPONSE,
                    "",
                )]),
                _ => Reply::Close,
            }))
        });
        let client = Client::with_connector(connector, "pw", Options::default());
        client.connect().unwrap();

        assert!(matches!(
            client.execute("stop"),
            Err(crate::Error::ConnectionClosed)
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn invalid_command_keeps_connection() {
        let client = client("secret");
        client.connect().unwrap();

        assert!(matches!(
            client.execute("say \0"),
            Err(crate::Error::InvalidCommand(_))
        ));
        assert!(matches!(
            client.scores(""),
            Err(crate::Error::InvalidCommand(_))
        ));
        assert!(client.is_connected());
        assert_eq!(client.execute("time query day").unwrap(), "ran time query day");
    }

    #[test]
    fn concurrent_callers_get_their_own_responses() {
        let client = Arc::new(client("secret"));
        client.connect().unwrap();

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let client = client.clone();
                thread::spawn(move || {
                    for round in 0..25 {
                        let command = format!("say {} {}", worker, round);
                        assert_eq!(client.execute(&command).unwrap(), format!("ran {}", command));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert!(client.is_connected());
    }

    #[test]
    fn close_is_idempotent() {
        let client = client("secret");
        client.connect().unwrap();

        client.close();
        client.close();
        assert!(!client.is_connected());
        assert!(matches!(
            client.execute("list"),
            Err(crate::Error::ConnectionClosed)
        ));
    }
}
