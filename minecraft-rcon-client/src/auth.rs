use crate::{Packet, PacketType};
use log::{debug, warn};

/// Id the server puts in the login response when the password is wrong.
pub(crate) const AUTH_FAILED_ID: i32 = -1;

pub(crate) enum AuthProgress {
    /// Not the login response, keep reading.
    Skip,
    Accepted,
}

/// State of one login attempt.
pub(crate) struct AuthExchange {
    id: i32,
    skip_echo: bool,
    echo_skipped: bool,
}

impl AuthExchange {
    pub fn new(id: i32, skip_echo: bool) -> Self {
        AuthExchange {
            id,
            skip_echo,
            echo_skipped: false,
        }
    }

    pub fn request(&self, password: &str) -> Packet {
        Packet::new(self.id, PacketType::AUTH, password)
    }

    pub fn accept(&mut self, packet: &Packet) -> crate::Result<AuthProgress> {
        if packet.id == AUTH_FAILED_ID {
            debug!("server rejected the password");
            return Err(crate::Error::AuthenticationFailed);
        }

        if self.is_echo(packet) {
            return self.skip_echo(packet);
        }

        if packet.id == self.id {
            debug!("authenticated with request id {}", self.id);
            return Ok(AuthProgress::Accepted);
        }

        Err(crate::Error::ProtocolDesync {
            expected: self.id,
            received: packet.id,
        })
    }

    fn is_echo(&self, packet: &Packet) -> bool {
        packet.id == self.id && packet.kind == PacketType::RESPONSE_VALUE && packet.body.is_empty()
    }

    // Some servers answer a login with an empty RESPONSE_VALUE before the real AUTH_RESPONSE.
    // Exactly one is tolerated.
    fn skip_echo(&mut self, packet: &Packet) -> crate::Result<AuthProgress> {
        if !self.skip_echo || self.echo_skipped {
            warn!("unexpected empty response value during login");
            return Err(crate::Error::ProtocolDesync {
                expected: self.id,
                received: packet.id,
            });
        }

        debug!("skipping empty response value sent before the login response");
        self.echo_skipped = true;
        Ok(AuthProgress::Skip)
    }
}
