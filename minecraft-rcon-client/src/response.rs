use crate::{Packet, PacketType};
use log::{trace, warn};

/// How the end of a command response is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Follow every command with an empty `RESPONSE_VALUE` packet. The server answers it only
    /// after it has sent all of the command's output, so its echo marks the end of a response
    /// that was split over several packets. An empty packet with the command's id ends the
    /// response too.
    #[default]
    TrailingMarker,

    /// Return the first packet that carries the command's id.
    Single,
}

pub(crate) enum Progress {
    Pending,
    Complete {
        packet: Packet,
        /// Whether the trailing marker's echo has been read. If not, it is still on its way and
        /// must be skipped when it arrives.
        marker_consumed: bool,
    },
}

/// Correlation state for the one request in flight.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    id: i32,
    marker: Option<i32>,
    kind: Option<PacketType>,
    body: String,
    fragments: usize,
}

impl PendingRequest {
    pub fn new(id: i32, marker: Option<i32>) -> Self {
        PendingRequest {
            id,
            marker,
            kind: None,
            body: String::new(),
            fragments: 0,
        }
    }

    /// Feed the next packet read from the connection.
    ///
    /// `stale_marker` is the marker of an earlier request whose echo has not been seen yet.
    pub fn accept(&mut self, packet: Packet, stale_marker: Option<i32>) -> crate::Result<Progress> {
        if Some(packet.id) == self.marker {
            trace!("response {} ended by marker {}", self.id, packet.id);
            return Ok(self.complete(true));
        }

        if Some(packet.id) == stale_marker {
            trace!("skipping late marker echo {}", packet.id);
            return Ok(Progress::Pending);
        }

        if packet.id != self.id {
            warn!(
                "received response id {} while waiting for {}",
                packet.id, self.id
            );
            return Err(crate::Error::ProtocolDesync {
                expected: self.id,
                received: packet.id,
            });
        }

        if self.marker.is_none() {
            return Ok(Progress::Complete {
                packet,
                marker_consumed: true,
            });
        }

        if packet.body.is_empty() && self.fragments > 0 {
            trace!("response {} ended by empty packet", self.id);
            return Ok(self.complete(false));
        }

        self.kind.get_or_insert(packet.kind);
        self.body.push_str(&packet.body);
        self.fragments += 1;
        trace!("response {} fragment {} ({} bytes)", self.id, self.fragments, packet.body.len());

        Ok(Progress::Pending)
    }

    fn complete(&mut self, marker_consumed: bool) -> Progress {
        Progress::Complete {
            packet: Packet {
                id: self.id,
                kind: self.kind.unwrap_or(PacketType::RESPONSE_VALUE),
                body: std::mem::take(&mut self.body),
            },
            marker_consumed,
        }
    }
}
