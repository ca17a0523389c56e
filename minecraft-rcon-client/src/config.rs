use crate::ResponseMode;
use std::time::Duration;

/// Port the vanilla server listens on when `rcon.port` is not set.
pub const DEFAULT_PORT: &str = "25575";

/// Default upper bound for a frame's length field.
///
/// Vanilla servers split output into 4096 byte packets, so this leaves plenty of headroom while
/// still rejecting garbage lengths before allocating for them.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Server address and credential.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub password: String,
    pub options: Options,
}

/// Transport and protocol tuning.
#[derive(Debug, Clone)]
pub struct Options {
    /// Limit on establishing the TCP connection. `None` uses the operating system's limit.
    pub connect_timeout: Option<Duration>,

    /// Deadline for each read. When it expires the request fails with [`Error::Timeout`] and the
    /// connection is closed. `None` blocks until the server answers or the connection is closed.
    ///
    /// [`Error::Timeout`]: crate::Error::Timeout
    pub read_timeout: Option<Duration>,

    pub write_timeout: Option<Duration>,

    /// Largest accepted value of a frame's length field, in either direction.
    pub max_frame_len: usize,

    /// How the end of a command response is detected.
    pub response_mode: ResponseMode,

    /// Tolerate one empty `RESPONSE_VALUE` packet before the login response. Some server
    /// implementations send it, vanilla Minecraft does not.
    pub skip_auth_echo: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            response_mode: ResponseMode::TrailingMarker,
            skip_auth_echo: true,
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: impl Into<String>, password: impl Into<String>) -> Self {
        Config {
            host: host.into(),
            port: port.into(),
            password: password.into(),
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Check the fields needed to reach the server. The password is passed through as is.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("host is empty"));
        }
        if self.port.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("port is empty"));
        }
        if self.options.max_frame_len < crate::MIN_FRAME_LEN {
            return Err(crate::Error::InvalidConfig("max_frame_len is below the minimum frame length"));
        }
        Ok(())
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port.trim())
        } else {
            format!("{}:{}", host, self.port.trim())
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_host_and_port_only() {
        assert!(Config::new("localhost", DEFAULT_PORT, "").validate().is_ok());
        assert!(matches!(
            Config::new(" ", DEFAULT_PORT, "pw").validate(),
            Err(crate::Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new("localhost", "", "pw").validate(),
            Err(crate::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn formats_addresses() {
        assert_eq!(Config::new("mc.example.com", "25575", "").address(), "mc.example.com:25575");
        assert_eq!(Config::new("::1", "25575", "").address(), "[::1]:25575");
    }

    #[test]
    fn debug_output_hides_the_password() {
        let debug = format!("{:?}", Config::new("localhost", "25575", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
