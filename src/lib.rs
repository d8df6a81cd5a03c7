//! NTLMv2 authentication for HTTP CONNECT proxy tunnels.
//!
//! Many corporate proxies only let clients open tunnels after an NTLM handshake. This crate
//! performs that handshake on a blocking connection and hands back a stream that reaches the
//! requested destination through the proxy.
//!
//! Sample usage:
//! ```no_run
//! use std::io::{Read, Write};
//! use std::time::Duration;
//!
//! use ntlmtunnel::{Credentials, HandshakeOptions, NtlmProxyDialer};
//!
//! fn fetch_banner() -> Result<String, Box<dyn std::error::Error>> {
//!     let creds = Credentials::from_qualified_username(r"CORP\jdoe", "hunter2");
//!     let dialer = NtlmProxyDialer::new("proxy.corp.example:8080", creds)
//!         .with_options(
//!             HandshakeOptions::default()
//!                 .with_workstation("BUILDHOST")
//!                 .with_connect_timeout(Duration::from_secs(10))
//!                 .with_io_timeout(Duration::from_secs(30)),
//!         );
//!
//!     let mut tunnel = dialer.connect("git.example.com:22")?;
//!     tunnel.write_all(b"SSH-2.0-example\r\n")?;
//!     let mut banner = [0u8; 256];
//!     let n = tunnel.read(&mut banner)?;
//!     Ok(String::from_utf8_lossy(&banner[..n]).into_owned())
//! }
//! ```
//!
//! Connections obtained elsewhere (e.g. through another tunnel) can be authenticated with
//! [`authenticate`] or [`authenticate_with`]; [`connect_via`] combines this with a custom way of
//! dialing the proxy.
//!
//! Only NTLMv2 is spoken. Proxies demanding NTLMv1 or a session key exchange are refused with
//! [`UnsupportedMode`].


mod codec;
mod config;
mod crypto;
mod dialer;
mod error;
mod handshake;
mod http;
mod message;


use std::fmt;

pub use crate::codec::{decode_av_pairs, decode_challenge, encode_authenticate, encode_negotiate};
pub use crate::config::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_WORKSTATION, HandshakeOptions};
pub use crate::crypto::{
    ChallengeResponse, check_policy, compute_responses, filetime_from, filetime_now, ntlm_hash,
    ntlmv2_hash, random_client_challenge, respond_to_challenge,
};
pub use crate::dialer::{NtlmProxyDialer, connect_via};
pub use crate::error::{DecodeError, HandshakeError, UnsupportedMode};
pub use crate::handshake::{AuthenticatedStream, NTLM_SCHEME, authenticate, authenticate_with};
pub use crate::http::{ProxyResponse, ResponseReader, write_connect};
pub use crate::message::{
    AUTHENTICATE_MESSAGE_TYPE, AuthenticateMessage, AvId, AvPair, CHALLENGE_MESSAGE_TYPE,
    ChallengeMessage, DEFAULT_NEGOTIATE_FLAGS, Flags, Message, NEGOTIATE_MESSAGE_TYPE,
    NTLMSSP_SIGNATURE, NegotiateMessage, OsVersion, VarField,
};


/// Standard NTLM credentials, consisting of username, password and domain.
///
/// The [`Debug`] representation never shows the password.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// The username part of the credentials.
    pub username: String,

    /// The password part of the credentials.
    pub password: String,

    /// The domain part of the credentials.
    ///
    /// Often specified in combination with the username as `<DOMAIN>\<USERNAME>`. In credentials
    /// without a domain, the domain is an empty string.
    pub domain: String,
}
impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>, D: Into<String>>(username: U, password: P, domain: D) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    /// Creates credentials from a username that may be qualified with a domain.
    ///
    /// `DOMAIN\user` is split into domain and username. Anything else, including user principal
    /// names such as `user@domain.example`, is taken as the username with an empty domain.
    pub fn from_qualified_username<P: Into<String>>(qualified: &str, password: P) -> Self {
        let (domain, username) = qualified.split_once('\\')
            .unwrap_or(("", qualified));
        Self::new(username, password, domain)
    }

    /// Whether these are empty credentials, which NTLM would turn into anonymous authentication.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_username() {
        let creds = Credentials::from_qualified_username(r"CORP\jdoe", "secret");
        assert_eq!(creds, Credentials::new("jdoe", "secret", "CORP"));

        let upn = Credentials::from_qualified_username("jdoe@corp.example", "secret");
        assert_eq!(upn.username, "jdoe@corp.example");
        assert_eq!(upn.domain, "");
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("jdoe", "hunter2", "CORP");
        let debugged = format!("{:?}", creds);
        assert!(debugged.contains("jdoe"));
        assert!(debugged.contains("CORP"));
        assert!(!debugged.contains("hunter2"));
    }

    #[test]
    fn test_anonymous() {
        assert!(Credentials::new("", "", "CORP").is_anonymous());
        assert!(!Credentials::new("jdoe", "", "").is_anonymous());
        assert!(!Credentials::new("", "hunter2", "").is_anonymous());
    }
}
