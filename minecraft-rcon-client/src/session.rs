use crate::auth::{AuthExchange, AuthProgress};
use crate::packet::check_body;
use crate::response::{PendingRequest, Progress};
use crate::{Options, Packet, PacketType, ResponseMode, Shutdown, Transport};
use log::trace;
use std::sync::Arc;

/// One authenticated connection: a transport plus the correlation state layered on top of it.
pub(crate) struct Session<T> {
    transport: T,
    next_id: i32,
    stale_marker: Option<i32>,
    options: Options,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, options: Options) -> Self {
        Session {
            transport,
            next_id: 1,
            stale_marker: None,
            options,
        }
    }

    /// Ids only need to be unique among requests in flight. They stay positive so they can never
    /// be confused with the -1 of a failed login.
    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if id == i32::MAX { 1 } else { id + 1 };
        id
    }

    pub fn authenticate(&mut self, password: &str) -> crate::Result<()> {
        let mut exchange = AuthExchange::new(self.allocate_id(), self.options.skip_auth_echo);
        self.transport.send(&exchange.request(password))?;

        loop {
            let packet = self.transport.receive()?;
            match exchange.accept(&packet)? {
                AuthProgress::Skip => continue,
                AuthProgress::Accepted => return Ok(()),
            }
        }
    }

    pub fn execute(&mut self, command: &str) -> crate::Result<String> {
        check_body(command, self.options.max_frame_len)?;

        let id = self.allocate_id();
        let marker = match self.options.response_mode {
            ResponseMode::TrailingMarker => Some(self.allocate_id()),
            ResponseMode::Single => None,
        };

        trace!("executing {:?} as request {}", command, id);
        self.transport
            .send(&Packet::new(id, PacketType::EXEC_COMMAND, command))?;
        if let Some(marker) = marker {
            self.transport
                .send(&Packet::new(marker, PacketType::RESPONSE_VALUE, ""))?;
        }

        let mut pending = PendingRequest::new(id, marker);
        loop {
            let packet = self.transport.receive()?;
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

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn shutdown_handle(&self) -> Arc<dyn Shutdown> {
        self.transport.shutdown_handle()
    }
}
