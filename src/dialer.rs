//! Opening connections to the proxy.


use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::Credentials;
use crate::config::HandshakeOptions;
use crate::error::HandshakeError;
use crate::handshake::{AuthenticatedStream, authenticate_with};


/// Obtains a connection to the proxy from `dial` and authenticates a tunnel to `target` on it.
///
/// `dial` is not called for anonymous credentials. A failure to dial is reported as
/// [`HandshakeError::Transport`].
pub fn connect_via<S, F>(
    dial: F,
    target: &str,
    creds: &Credentials,
    options: &HandshakeOptions,
) -> Result<AuthenticatedStream<S>, HandshakeError>
where
    S: Read + Write,
    F: FnOnce() -> io::Result<S>,
{
    if creds.is_anonymous() {
        return Err(HandshakeError::AnonymousNotSupported);
    }
    let stream = dial()
        .map_err(|e| {
            debug!(destination = target, error = %e, "failed to connect to the proxy");
            HandshakeError::Transport(e)
        })?;
    authenticate_with(stream, target, creds, options)
}


/// Opens NTLM-authenticated tunnels through an HTTP proxy over TCP.
#[derive(Clone, Debug)]
pub struct NtlmProxyDialer {
    proxy_addr: String,
    credentials: Credentials,
    options: HandshakeOptions,
}
impl NtlmProxyDialer {
    /// Creates a dialer for the proxy at `proxy_addr` (`host:port`) using the default options.
    pub fn new<A: Into<String>>(proxy_addr: A, credentials: Credentials) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            credentials,
            options: HandshakeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HandshakeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    pub fn options(&self) -> &HandshakeOptions {
        &self.options
    }

    /// Opens a tunnel to `target` (`host:port`).
    pub fn connect(&self, target: &str) -> Result<AuthenticatedStream<TcpStream>, HandshakeError> {
        connect_via(|| self.dial(), target, &self.credentials, &self.options)
    }

    fn dial(&self) -> io::Result<TcpStream> {
        let stream = match self.options.connect_timeout {
            Some(timeout) => connect_with_timeout(&self.proxy_addr, timeout)?,
            None => TcpStream::connect(self.proxy_addr.as_str())?,
        };
        stream.set_read_timeout(self.options.io_timeout)?;
        stream.set_write_timeout(self.options.io_timeout)?;
        debug!(proxy = %self.proxy_addr, "connected to the proxy");
        Ok(stream)
    }
}

/// Tries each address `addr` resolves to until one accepts within `timeout`.
fn connect_with_timeout(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} does not resolve to any address", addr),
    )))
}
