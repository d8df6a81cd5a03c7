//! Tunables of the proxy handshake.


use std::time::Duration;

use crate::message::OsVersion;


/// The workstation name announced in Authenticate messages unless configured otherwise.
pub const DEFAULT_WORKSTATION: &str = "WORKSTATION";

/// The default upper bound for the size of a proxy response head.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;


/// Options influencing how a CONNECT tunnel is authenticated.
///
/// The defaults produce the same messages as a stock Windows 7 client that does not reveal its
/// workstation name before authenticating.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct HandshakeOptions {
    /// The workstation name sent in the Authenticate message.
    pub workstation: String,

    /// Whether the workstation name is also sent in the Negotiate message.
    pub send_workstation_in_negotiate: bool,

    /// The operating system version announced in the Negotiate message.
    pub os_version: OsVersion,

    /// Responses whose status line and headers exceed this many bytes are rejected.
    pub max_header_bytes: usize,

    /// Timeout for establishing the TCP connection to the proxy; only used by
    /// [`NtlmProxyDialer`](crate::NtlmProxyDialer).
    pub connect_timeout: Option<Duration>,

    /// Read and write timeout on the proxy connection; only used by
    /// [`NtlmProxyDialer`](crate::NtlmProxyDialer).
    pub io_timeout: Option<Duration>,
}
impl HandshakeOptions {
    pub fn with_workstation<W: Into<String>>(mut self, workstation: W) -> Self {
        self.workstation = workstation.into();
        self
    }

    pub fn with_workstation_in_negotiate(mut self, send: bool) -> Self {
        self.send_workstation_in_negotiate = send;
        self
    }

    pub fn with_os_version(mut self, os_version: OsVersion) -> Self {
        self.os_version = os_version;
        self
    }

    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// The workstation name to place into the Negotiate message, if any.
    pub(crate) fn negotiate_workstation(&self) -> &str {
        if self.send_workstation_in_negotiate {
            &self.workstation
        } else {
            ""
        }
    }
}
impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            workstation: DEFAULT_WORKSTATION.to_owned(),
            send_workstation_in_negotiate: false,
            os_version: OsVersion::default(),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            connect_timeout: None,
            io_timeout: None,
        }
    }
}
