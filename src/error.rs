//! Error types.
//!
//! Errors are split by layer: [`DecodeError`] for the binary message codec, [`UnsupportedMode`]
//! for NTLM features this crate refuses to negotiate and [`HandshakeError`] for everything that
//! can go wrong while authenticating a CONNECT tunnel. None of them ever carries password
//! material.


use std::io;

use thiserror::Error;


/// An error that may occur while encoding or decoding NTLM messages.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum DecodeError {
    /// The signature or the message type does not identify a Challenge message.
    #[error("not an NTLM challenge message (signature {signature:?}, message type {message_type})")]
    NotAChallenge { signature: Vec<u8>, message_type: u32 },

    /// The message does not start with the NTLMSSP signature.
    #[error("mismatched signature (expected {expected:?}, obtained {obtained:?})")]
    InvalidSignature { expected: [u8; 8], obtained: Vec<u8> },

    /// A field points beyond the end of the message.
    #[error("field at offset {offset} with length {length} extends beyond the message ({buffer_len} bytes)")]
    BufferOverrun { offset: usize, length: usize, buffer_len: usize },

    /// A string field cannot be written because Unicode has not been negotiated.
    #[error("only Unicode (UTF-16) string fields are supported")]
    UnicodeRequired,

    /// A UTF-16 string field has an odd number of bytes.
    #[error("UTF-16 field has odd length {length}")]
    OddLengthUnicode { length: usize },

    /// A UTF-16 string field contains unpaired surrogates.
    #[error("failed to decode value as UTF-16: {value:?}")]
    InvalidUtf16 { value: Vec<u16> },

    /// A payload is too long to be described by a 16-bit length.
    #[error("field of {length} bytes does not fit into a 16-bit length")]
    FieldTooLong { length: usize },

    /// The fixed part of a message does not have the length mandated by the protocol.
    #[error("fixed message block has {obtained} bytes, expected {expected}")]
    LayoutMismatch { expected: usize, obtained: usize },
}

/// An NTLM mode requested by the server that this implementation does not support.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum UnsupportedMode {
    /// The server asked for LM session keys (`NTLMSSP_NEGOTIATE_LM_KEY`), i.e. NTLMv1.
    #[error("only NTLMv2 is supported, but the server requested v1 (NTLMSSP_NEGOTIATE_LM_KEY)")]
    V1Requested,

    /// The server asked for a key exchange (`NTLMSSP_NEGOTIATE_KEY_EXCH`).
    #[error("key exchange requested but not supported (NTLMSSP_NEGOTIATE_KEY_EXCH)")]
    KeyExchangeRequested,
}

/// An error that terminates a proxy authentication attempt.
///
/// The connection the handshake ran on must not be reused after any of these.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The proxy answered 407 without an NTLM challenge.
    #[error("no NTLM challenge received from the proxy")]
    NoChallenge,

    /// The proxy answered with a status code the current handshake step does not allow.
    #[error("unexpected status {0} from the proxy")]
    UnexpectedStatus(u16),

    /// Reading from or writing to the proxy connection failed.
    #[error("proxy connection failed: {0}")]
    Transport(#[from] io::Error),

    /// Username and password are both empty.
    #[error("anonymous authentication not supported")]
    AnonymousNotSupported,

    /// The challenge could not be decoded or the response could not be encoded.
    #[error("invalid NTLM message: {0}")]
    Decode(#[from] DecodeError),

    /// The proxy requested an NTLM mode that is not supported.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedMode),

    /// The challenge token in `Proxy-Authenticate` is not valid base64.
    #[error("failed to decode NTLM challenge: {0}")]
    InvalidChallengeEncoding(#[from] base64::DecodeError),

    /// The proxy's response is not well-formed HTTP.
    #[error("malformed proxy response: {0}")]
    MalformedResponse(String),
}

impl From<httparse::Error> for HandshakeError {
    fn from(e: httparse::Error) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_mode_is_transparent() {
        let e = HandshakeError::from(UnsupportedMode::V1Requested);
        assert_eq!(e.to_string(), UnsupportedMode::V1Requested.to_string());
        assert!(matches!(e, HandshakeError::Unsupported(UnsupportedMode::V1Requested)));
    }

    #[test]
    fn test_io_error_becomes_transport() {
        let e: HandshakeError = io::Error::new(io::ErrorKind::TimedOut, "timed out").into();
        assert!(matches!(e, HandshakeError::Transport(ref inner) if inner.kind() == io::ErrorKind::TimedOut));
    }

    #[test]
    fn test_decode_error_display() {
        let e = DecodeError::BufferOverrun { offset: 60, length: 10, buffer_len: 64 };
        assert_eq!(
            e.to_string(),
            "field at offset 60 with length 10 extends beyond the message (64 bytes)",
        );
    }
}
