//! In-memory transport for exercising the protocol layers without a server.

use crate::{Connector, Packet, PacketType, Shutdown, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) enum Reply {
    Packets(Vec<Packet>),
    /// The server drops the connection.
    Close,
}

type Responder = Box<dyn FnMut(&Packet) -> Reply + Send>;

pub(crate) struct MockTransport {
    responder: Responder,
    queue: VecDeque<Packet>,
    sent: Arc<Mutex<Vec<Packet>>>,
    shutdown: Arc<MockShutdown>,
}

#[derive(Default)]
pub(crate) struct MockShutdown {
    closed: AtomicBool,
}

impl MockTransport {
    /// Answer every sent packet with whatever `responder` returns.
    pub fn new(responder: impl FnMut(&Packet) -> Reply + Send + 'static) -> Self {
        MockTransport {
            responder: Box::new(responder),
            queue: VecDeque::new(),
            sent: Arc::default(),
            shutdown: Arc::default(),
        }
    }

    /// Feed `packets` in order, regardless of what is sent.
    pub fn scripted(packets: Vec<Packet>) -> Self {
        let mut transport = MockTransport::new(|_: &Packet| Reply::Packets(Vec::new()));
        transport.queue.extend(packets);
        transport
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<Packet>>> {
        self.sent.clone()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, packet: &Packet) -> crate::Result<()> {
        if !self.is_open() {
            return Err(crate::Error::ConnectionClosed);
        }

        self.sent.lock().push(packet.clone());
        match (self.responder)(packet) {
            Reply::Packets(packets) => self.queue.extend(packets),
            Reply::Close => self.close(),
        }
        Ok(())
    }

    fn receive(&mut self) -> crate::Result<Packet> {
        if !self.is_open() {
            return Err(crate::Error::ConnectionClosed);
        }

        // Nothing left to read stands in for an expired read deadline
        self.queue.pop_front().ok_or_else(|| {
            self.shutdown.shutdown();
            crate::Error::Timeout
        })
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

impl Shutdown for MockShutdown {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Opens a fresh [`MockTransport`] from `make` on every connect.
pub(crate) struct MockConnector<F> {
    make: F,
    pub opened: AtomicUsize,
}

impl<F> MockConnector<F>
where
    F: Fn() -> crate::Result<MockTransport> + Send + Sync,
{
    pub fn new(make: F) -> Self {
        MockConnector {
            make,
            opened: AtomicUsize::new(0),
        }
    }
}

impl<F> Connector for MockConnector<F>
where
    F: Fn() -> crate::Result<MockTransport> + Send + Sync,
{
    type Transport = MockTransport;

    fn open(&self) -> crate::Result<MockTransport> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        (self.make)()
    }
}

/// A well-behaved server: accepts `password`, answers markers and replies to commands with
/// `output(command)`.
pub(crate) fn server(
    password: &'static str,
    output: impl Fn(&str) -> String + Send + 'static,
) -> MockTransport {
    MockTransport::new(move |packet: &Packet| match packet.kind {
        PacketType::AUTH if packet.body == password => Reply::Packets(vec![Packet::new(
            packet.id,
            PacketType::AUTH_RESPONSE,
            "",
        )]),
        PacketType::AUTH => Reply::Packets(vec![Packet::new(-1, PacketType::AUTH_RESPONSE, "")]),
        PacketType::EXEC_COMMAND => Reply::Packets(vec![Packet::new(
            packet.id,
            PacketType::RESPONSE_VALUE,
            output(&packet.body),
        )]),
        _ => Reply::Packets(vec![Packet::new(
            packet.id,
            PacketType::RESPONSE_VALUE,
            format!("Unknown request {:x}", packet.kind.0),
        )]),
    })
}
