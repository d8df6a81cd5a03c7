//! The NTLM handshake over an HTTP CONNECT request.
//!
//! A handshake takes two round trips on the same connection:
//!
//! 1. `CONNECT` with a Negotiate message, answered by `407 Proxy Authentication Required` and a
//!    Challenge message in `Proxy-Authenticate`.
//! 2. `CONNECT` with the Authenticate message, answered by `200` once the tunnel is open.
//!
//! The connection must stay open between both requests since NTLM authenticates the connection,
//! not the request.


use std::io::{self, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, trace, warn};

use crate::Credentials;
use crate::codec::{decode_challenge, encode_authenticate, encode_negotiate};
use crate::config::HandshakeOptions;
use crate::crypto::{filetime_now, random_client_challenge, respond_to_challenge};
use crate::error::HandshakeError;
use crate::http::{ProxyResponse, ResponseReader, write_connect};
use crate::message::{ChallengeMessage, NegotiateMessage};


/// The HTTP authentication scheme name of NTLM.
pub const NTLM_SCHEME: &str = "NTLM";

const STATUS_OK: u16 = 200;
const STATUS_PROXY_AUTHENTICATION_REQUIRED: u16 = 407;


/// A stream tunnelled through an authenticated CONNECT request.
///
/// If the proxy already sent data from the far end together with its `200` response, that data is
/// returned by the first reads before anything else is read from the underlying stream.
#[derive(Debug)]
pub struct AuthenticatedStream<S> {
    stream: S,
    early_data: Vec<u8>,
    early_pos: usize,
}
impl<S> AuthenticatedStream<S> {
    fn new(stream: S, early_data: Vec<u8>) -> Self {
        Self {
            stream,
            early_data,
            early_pos: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// The bytes received through the tunnel that have not been read yet.
    pub fn early_data(&self) -> &[u8] {
        &self.early_data[self.early_pos..]
    }

    /// Returns the underlying stream.
    ///
    /// Any unread [early data](Self::early_data) is lost; use [`into_parts`](Self::into_parts) to
    /// keep it.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Returns the underlying stream and the unread early data.
    pub fn into_parts(mut self) -> (S, Vec<u8>) {
        self.early_data.drain(..self.early_pos);
        (self.stream, self.early_data)
    }
}
impl<S: Read> Read for AuthenticatedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.early_data();
        if pending.is_empty() {
            return self.stream.read(buf);
        }
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        self.early_pos += n;
        Ok(n)
    }
}
impl<S: Write> Write for AuthenticatedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}


/// Authenticates a CONNECT tunnel to `target` (`host:port`) with the default options.
///
/// See [`authenticate_with`].
pub fn authenticate<S: Read + Write>(
    stream: S,
    target: &str,
    creds: &Credentials,
) -> Result<AuthenticatedStream<S>, HandshakeError> {
    authenticate_with(stream, target, creds, &HandshakeOptions::default())
}

/// Authenticates a CONNECT tunnel to `target` (`host:port`) on an open connection to the proxy.
///
/// On success, the returned stream is connected to `target` through the proxy. On failure, the
/// stream is dropped; pass `&mut stream` to keep the connection, which must not be used for
/// another handshake either way.
///
/// Anonymous credentials are rejected before anything is sent.
pub fn authenticate_with<S: Read + Write>(
    stream: S,
    target: &str,
    creds: &Credentials,
    options: &HandshakeOptions,
) -> Result<AuthenticatedStream<S>, HandshakeError> {
    if creds.is_anonymous() {
        warn!(destination = target, "refusing anonymous NTLM authentication");
        return Err(HandshakeError::AnonymousNotSupported);
    }

    debug!(destination = target, username = %creds.username, domain = %creds.domain, "starting NTLM proxy authentication");
    let handshake = Handshake {
        stream,
        reader: ResponseReader::new(options.max_header_bytes),
        target,
        creds,
        options,
    };
    handshake.run()
}


/// Where a handshake stands.
#[derive(Debug)]
enum State {
    Init,
    NegotiateSent,
    ChallengeReceived(ChallengeMessage),
    AuthenticateSent,
    Authenticated,
}
impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::NegotiateSent => "NegotiateSent",
            Self::ChallengeReceived(_) => "ChallengeReceived",
            Self::AuthenticateSent => "AuthenticateSent",
            Self::Authenticated => "Authenticated",
        }
    }
}

struct Handshake<'a, S> {
    stream: S,
    reader: ResponseReader,
    target: &'a str,
    creds: &'a Credentials,
    options: &'a HandshakeOptions,
}
impl<'a, S: Read + Write> Handshake<'a, S> {
    fn run(mut self) -> Result<AuthenticatedStream<S>, HandshakeError> {
        let mut state = State::Init;
        loop {
            let from = state.name();
            state = match self.advance(state) {
                Ok(State::Authenticated) => break,
                Ok(next) => next,
                Err(e) => {
                    debug!(destination = self.target, state = from, error = %e, "NTLM proxy authentication failed");
                    return Err(e);
                },
            };
            trace!(destination = self.target, state = state.name(), "NTLM handshake progressed");
        }

        debug!(destination = self.target, username = %self.creds.username, "NTLM proxy authentication succeeded");
        let early_data = self.reader.into_buffered();
        if !early_data.is_empty() {
            trace!(destination = self.target, length = early_data.len(), "tunnel data received with the proxy response");
        }
        Ok(AuthenticatedStream::new(self.stream, early_data))
    }

    fn advance(&mut self, state: State) -> Result<State, HandshakeError> {
        match state {
            State::Init => {
                self.send_negotiate()?;
                Ok(State::NegotiateSent)
            },
            State::NegotiateSent => {
                let challenge = self.receive_challenge()?;
                Ok(State::ChallengeReceived(challenge))
            },
            State::ChallengeReceived(challenge) => {
                self.send_authenticate(&challenge)?;
                Ok(State::AuthenticateSent)
            },
            State::AuthenticateSent => {
                self.receive_confirmation()?;
                Ok(State::Authenticated)
            },
            State::Authenticated => Ok(State::Authenticated),
        }
    }

    fn send_connect(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        let authorization = format!("{} {}", NTLM_SCHEME, BASE64.encode(message));
        write_connect(&mut self.stream, self.target, &authorization)?;
        Ok(())
    }

    fn send_negotiate(&mut self) -> Result<(), HandshakeError> {
        let negotiate = NegotiateMessage::new(
            &self.creds.domain,
            self.options.negotiate_workstation(),
            self.options.os_version,
        );
        let bytes = encode_negotiate(
            negotiate.flags,
            &negotiate.supplied_domain,
            &negotiate.supplied_workstation,
            negotiate.os_version,
        )?;
        trace!(flags = ?negotiate.flags, "sending NTLM negotiate message");
        self.send_connect(&bytes)
    }

    fn receive_challenge(&mut self) -> Result<ChallengeMessage, HandshakeError> {
        let response = self.reader.read_response(&mut self.stream)?;
        if response.status != STATUS_PROXY_AUTHENTICATION_REQUIRED {
            return Err(HandshakeError::UnexpectedStatus(response.status));
        }

        let token = challenge_token(&response)
            .ok_or(HandshakeError::NoChallenge)?;
        let bytes = BASE64.decode(token)?;
        let challenge = decode_challenge(&bytes)?;
        debug!(
            destination = self.target,
            status = response.status,
            target_name = %challenge.target_name,
            flags = ?challenge.flags,
            "received NTLM challenge",
        );
        Ok(challenge)
    }

    fn send_authenticate(&mut self, challenge: &ChallengeMessage) -> Result<(), HandshakeError> {
        if challenge.timestamp().is_none() {
            trace!("challenge carries no timestamp, using local time");
        }
        let authenticate = respond_to_challenge(
            challenge,
            self.creds,
            random_client_challenge(),
            filetime_now(),
            &self.options.workstation,
        )?;
        let bytes = encode_authenticate(&authenticate)?;
        trace!(flags = ?authenticate.flags, "sending NTLM authenticate message");
        self.send_connect(&bytes)
    }

    fn receive_confirmation(&mut self) -> Result<(), HandshakeError> {
        let response = self.reader.read_response(&mut self.stream)?;
        if response.status != STATUS_OK {
            return Err(HandshakeError::UnexpectedStatus(response.status));
        }
        Ok(())
    }
}

/// Finds the NTLM token among the proxy's `Proxy-Authenticate` headers.
///
/// Proxies commonly offer several schemes, each in its own header; a bare `NTLM` (without a
/// token) is an offer, not a challenge.
fn challenge_token(response: &ProxyResponse) -> Option<&str> {
    response.header_values("proxy-authenticate")
        .find_map(|value| {
            let mut pieces = value.split_whitespace();
            let scheme = pieces.next()?;
            if !scheme.eq_ignore_ascii_case(NTLM_SCHEME) {
                return None;
            }
            pieces.next()
        })
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::AUTHENTICATE_FIXED_LEN;
    use crate::message::{AvId, AvPair, Flags, Message};

    /// A connection to a proxy that answers with canned bytes and records everything written.
    struct ScriptedProxy {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }
    impl ScriptedProxy {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        /// The base64 tokens of all `Proxy-Authorization` headers written so far.
        fn sent_tokens(&self) -> Vec<Vec<u8>> {
            String::from_utf8_lossy(&self.output)
                .lines()
                .filter_map(|line| line.strip_prefix("Proxy-Authorization: NTLM "))
                .map(|token| BASE64.decode(token).unwrap())
                .collect()
        }
    }
    impl Read for ScriptedProxy {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }
    impl Write for ScriptedProxy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn creds() -> Credentials {
        Credentials::new("User", "Password", "Domain")
    }

    fn challenge_response(flags: Flags) -> Vec<u8> {
        let challenge = ChallengeMessage::new(
            flags,
            *b"\x01\x23\x45\x67\x89\xab\xcd\xef",
            "Domain",
            vec![
                AvPair::from_string(AvId::NbDomainName, "Domain"),
                AvPair::from_string(AvId::NbComputerName, "Server"),
            ],
        ).unwrap();
        format!(
            "HTTP/1.1 407 Proxy Authentication Required\r\n\
             Proxy-Authenticate: Negotiate\r\n\
             Proxy-Authenticate: NTLM {}\r\n\
             Content-Length: 0\r\n\
             \r\n",
            BASE64.encode(challenge.to_bytes().unwrap()),
        ).into_bytes()
    }

    fn default_challenge_flags() -> Flags {
        Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_TARGET_INFO
            | Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY | Flags::TARGET_TYPE_DOMAIN
    }

    #[test]
    fn test_anonymous_is_rejected_without_io() {
        let mut proxy = ScriptedProxy::new(Vec::new());
        let anonymous = Credentials::new("", "", "Domain");
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &anonymous),
            Err(HandshakeError::AnonymousNotSupported),
        ));
        assert!(proxy.output.is_empty());
    }

    #[test]
    fn test_forbidden() {
        let mut proxy = ScriptedProxy::new(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_vec());
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::UnexpectedStatus(403)),
        ));
        // only the negotiate request was sent
        assert_eq!(proxy.sent_tokens().len(), 1);
    }

    #[test]
    fn test_missing_challenge() {
        let mut proxy = ScriptedProxy::new(
            b"HTTP/1.1 407 Proxy Authentication Required\r\n\
              Proxy-Authenticate: Basic realm=\"corp\"\r\n\
              Proxy-Authenticate: NTLM\r\n\
              \r\n".to_vec(),
        );
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::NoChallenge),
        ));
    }

    #[test]
    fn test_invalid_base64() {
        let mut proxy = ScriptedProxy::new(
            b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: NTLM !!!\r\n\r\n".to_vec(),
        );
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::InvalidChallengeEncoding(_)),
        ));
    }

    #[test]
    fn test_not_a_challenge() {
        // a negotiate message where a challenge is expected
        let negotiate = NegotiateMessage::new("", "", Default::default()).to_bytes().unwrap();
        let response = format!(
            "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: NTLM {}\r\n\r\n",
            BASE64.encode(negotiate),
        );
        let mut proxy = ScriptedProxy::new(response.into_bytes());
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::Decode(_)),
        ));
    }

    #[test]
    fn test_v1_is_rejected() {
        let flags = default_challenge_flags() | Flags::NEGOTIATE_LM_KEY;
        let mut proxy = ScriptedProxy::new(challenge_response(flags));
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::Unsupported(crate::UnsupportedMode::V1Requested)),
        ));
        // nothing was sent in response to the challenge
        assert_eq!(proxy.sent_tokens().len(), 1);
    }

    #[test]
    fn test_rejected_credentials() {
        let mut input = challenge_response(default_challenge_flags());
        input.extend_from_slice(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n");
        let mut proxy = ScriptedProxy::new(input);
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::UnexpectedStatus(407)),
        ));
    }

    #[test]
    fn test_connection_closed_after_negotiate() {
        let mut proxy = ScriptedProxy::new(Vec::new());
        assert!(matches!(
            authenticate(&mut proxy, "example.com:443", &creds()),
            Err(HandshakeError::Transport(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof,
        ));
    }

    #[test]
    fn test_successful_handshake() {
        let mut input = challenge_response(default_challenge_flags());
        input.extend_from_slice(b"HTTP/1.1 200 Connection established\r\n\r\nSSH-2.0-test\r\n");
        let proxy = ScriptedProxy::new(input);

        let options = HandshakeOptions::default()
            .with_workstation("LAPTOP")
            .with_workstation_in_negotiate(true);
        let mut tunnel = authenticate_with(proxy, "git.example.com:22", &creds(), &options).unwrap();

        let mut banner = String::new();
        tunnel.read_to_string(&mut banner).unwrap();
        assert_eq!(banner, "SSH-2.0-test\r\n");

        let proxy = tunnel.into_inner();
        let request = String::from_utf8(proxy.output.clone()).unwrap();
        assert!(request.starts_with("CONNECT git.example.com:22 HTTP/1.1\r\nHost: git.example.com:22\r\n"));
        assert!(!request.contains("Password"));

        let tokens = proxy.sent_tokens();
        assert_eq!(tokens.len(), 2);

        match Message::try_from(tokens[0].as_slice()).unwrap() {
            Message::Negotiate(negotiate) => {
                assert_eq!(negotiate.supplied_domain, "DOMAIN");
                assert_eq!(negotiate.supplied_workstation, "LAPTOP");
                assert!(negotiate.flags.contains(Flags::NEGOTIATE_OEM_DOMAIN_SUPPLIED));
                assert!(negotiate.flags.contains(Flags::NEGOTIATE_OEM_WORKSTATION_SUPPLIED));
                assert!(!negotiate.flags.contains(Flags::NEGOTIATE_KEY_EXCH));
            },
            other => panic!("expected negotiate message, got {:?}", other),
        }

        assert!(tokens[1].len() > AUTHENTICATE_FIXED_LEN);
        match Message::try_from(tokens[1].as_slice()).unwrap() {
            Message::Authenticate(authenticate) => {
                assert_eq!(authenticate.user_name, "User");
                assert_eq!(authenticate.target_name, "Domain");
                assert_eq!(authenticate.workstation, "LAPTOP");
                assert!(authenticate.lm_response.is_empty());
                // proof, blob header, timestamp, client challenge, reserved, target info, reserved
                assert!(authenticate.nt_response.len() > 16 + 8 + 8 + 8 + 4 + 4);
                assert!(!authenticate.flags.contains(Flags::NEGOTIATE_VERSION));
            },
            other => panic!("expected authenticate message, got {:?}", other),
        }
    }

    #[test]
    fn test_early_data() {
        let mut stream = AuthenticatedStream::new(Cursor::new(b" world".to_vec()), b"hello".to_vec());
        let mut first = [0u8; 3];
        assert_eq!(stream.read(&mut first).unwrap(), 3);
        assert_eq!(&first, b"hel");
        assert_eq!(stream.early_data(), b"lo");

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"lo world");

        let stream = AuthenticatedStream::new(Cursor::new(Vec::<u8>::new()), b"abc".to_vec());
        let (_inner, early) = stream.into_parts();
        assert_eq!(early, b"abc");
    }
}
