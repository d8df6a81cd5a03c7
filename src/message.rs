//! Typed representations of the NTLM messages exchanged during a proxy handshake.
//!
//! Serialization and deserialization live in [`crate::codec`]; the types here only describe
//! what is on the wire.


use bitflags::bitflags;

use crate::error::DecodeError;


/// The signature at the start of every NTLMSSP message.
pub const NTLMSSP_SIGNATURE: [u8; 8] = *b"NTLMSSP\0";

/// Message type number of the Negotiate message.
pub const NEGOTIATE_MESSAGE_TYPE: u32 = 0x0000_0001;

/// Message type number of the Challenge message.
pub const CHALLENGE_MESSAGE_TYPE: u32 = 0x0000_0002;

/// Message type number of the Authenticate message.
pub const AUTHENTICATE_MESSAGE_TYPE: u32 = 0x0000_0003;


bitflags! {
    /// NTLM negotiation flags.
    ///
    /// Bits without a name are reserved; they are kept as received and never set by this crate.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        /// Strings are encoded as UTF-16LE.
        const NEGOTIATE_UNICODE = 0x0000_0001;
        /// Strings are encoded in the OEM code page.
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        /// LAN Manager session keys; only meaningful for NTLMv1.
        const NEGOTIATE_LM_KEY = 0x0000_0080;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        /// The Negotiate message carries a domain name.
        const NEGOTIATE_OEM_DOMAIN_SUPPLIED = 0x0000_1000;
        /// The Negotiate message carries a workstation name.
        const NEGOTIATE_OEM_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const NEGOTIATE_EXTENDED_SESSION_SECURITY = 0x0008_0000;
        const NEGOTIATE_IDENTIFY = 0x0010_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        /// The Challenge message carries target information (AV pairs).
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        /// The message carries an [`OsVersion`] block.
        const NEGOTIATE_VERSION = 0x0200_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        /// Explicit session key exchange; never supported here.
        const NEGOTIATE_KEY_EXCH = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}

/// The flags sent in every Negotiate message.
///
/// Never contains [`Flags::NEGOTIATE_KEY_EXCH`].
pub const DEFAULT_NEGOTIATE_FLAGS: Flags = Flags::NEGOTIATE_TARGET_INFO
    .union(Flags::NEGOTIATE_56BIT)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_UNICODE)
    .union(Flags::NEGOTIATE_EXTENDED_SESSION_SECURITY)
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN);


/// A structure representing the version of an operating system as well as the NTLM revision used.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub reserved: [u8; 3],
    pub ntlm_revision: u8,
}
impl OsVersion {
    /// The current NTLMSSP revision.
    pub const NTLMSSP_REVISION_W2K3: u8 = 15;

    /// Windows 7 SP1, the version this crate announces unless configured otherwise.
    pub const WINDOWS_7: Self = Self {
        major_version: 6,
        minor_version: 1,
        build_number: 7601,
        reserved: [0, 0, 0],
        ntlm_revision: Self::NTLMSSP_REVISION_W2K3,
    };
}
impl Default for OsVersion {
    fn default() -> Self {
        Self::WINDOWS_7
    }
}

/// Describes where a variable-length payload is located within a message.
///
/// The offset is relative to the start of the message, i.e. the first byte of the signature.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VarField {
    pub length: u16,
    pub max_length: u16,
    pub buffer_offset: u32,
}

/// Identifies the kind of an AV pair within the Challenge message's target information.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AvId {
    /// Terminates the list.
    Eol,
    NbComputerName,
    NbDomainName,
    DnsComputerName,
    DnsDomainName,
    DnsTreeName,
    Flags,
    /// Server time as a FILETIME; if present, it is used as the NTLMv2 response timestamp.
    Timestamp,
    SingleHost,
    TargetName,
    ChannelBindings,
    Unknown(u16),
}
impl From<AvId> for u16 {
    fn from(id: AvId) -> Self {
        match id {
            AvId::Eol => 0x0000,
            AvId::NbComputerName => 0x0001,
            AvId::NbDomainName => 0x0002,
            AvId::DnsComputerName => 0x0003,
            AvId::DnsDomainName => 0x0004,
            AvId::DnsTreeName => 0x0005,
            AvId::Flags => 0x0006,
            AvId::Timestamp => 0x0007,
            AvId::SingleHost => 0x0008,
            AvId::TargetName => 0x0009,
            AvId::ChannelBindings => 0x000A,
            AvId::Unknown(w) => w,
        }
    }
}
impl From<u16> for AvId {
    fn from(w: u16) -> Self {
        match w {
            0x0000 => AvId::Eol,
            0x0001 => AvId::NbComputerName,
            0x0002 => AvId::NbDomainName,
            0x0003 => AvId::DnsComputerName,
            0x0004 => AvId::DnsDomainName,
            0x0005 => AvId::DnsTreeName,
            0x0006 => AvId::Flags,
            0x0007 => AvId::Timestamp,
            0x0008 => AvId::SingleHost,
            0x0009 => AvId::TargetName,
            0x000A => AvId::ChannelBindings,
            other => AvId::Unknown(other),
        }
    }
}

/// An entry of target information included in the Challenge message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AvPair {
    pub id: AvId,
    pub value: Vec<u8>,
}
impl AvPair {
    /// Creates an AV pair whose value is a string, encoded as UTF-16LE.
    ///
    /// AV pair strings are always Unicode, regardless of the negotiated flags.
    pub fn from_string(id: AvId, value: &str) -> Self {
        let value = value.encode_utf16()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        Self {
            id,
            value,
        }
    }

    /// Creates an `MsvAvTimestamp` AV pair.
    pub fn timestamp(filetime: u64) -> Self {
        Self {
            id: AvId::Timestamp,
            value: filetime.to_le_bytes().to_vec(),
        }
    }
}

/// An NTLM message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Message {
    Negotiate(NegotiateMessage),
    Challenge(ChallengeMessage),
    Authenticate(AuthenticateMessage),
    Other(u32, Vec<u8>),
}
impl Message {
    /// Returns the 32-bit message number identifying the type of this message.
    pub fn message_number(&self) -> u32 {
        match self {
            Self::Negotiate(_) => NEGOTIATE_MESSAGE_TYPE,
            Self::Challenge(_) => CHALLENGE_MESSAGE_TYPE,
            Self::Authenticate(_) => AUTHENTICATE_MESSAGE_TYPE,
            Self::Other(t, _data) => *t,
        }
    }
}

/// The contents of an NTLM Negotiate message.
///
/// The Negotiate message is the first message in an NTLM challenge-response process and is sent by
/// the client to the proxy; the proxy is expected to respond with a Challenge message.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NegotiateMessage {
    /// Stores which information has been specified and which NTLM behavior should be negotiated.
    pub flags: Flags,

    /// The domain against which the client wishes to authenticate.
    pub supplied_domain: String,

    /// The NetBIOS name of the client.
    pub supplied_workstation: String,

    /// Version information about the client's operating system.
    pub os_version: OsVersion,
}
impl NegotiateMessage {
    /// Creates a Negotiate message with [`DEFAULT_NEGOTIATE_FLAGS`], announcing the domain and the
    /// workstation if they are not empty.
    pub fn new(domain: &str, workstation: &str, os_version: OsVersion) -> Self {
        let mut flags = DEFAULT_NEGOTIATE_FLAGS;
        if !domain.is_empty() {
            flags |= Flags::NEGOTIATE_OEM_DOMAIN_SUPPLIED;
        }
        if !workstation.is_empty() {
            flags |= Flags::NEGOTIATE_OEM_WORKSTATION_SUPPLIED;
        }
        Self {
            flags,
            supplied_domain: domain.to_owned(),
            supplied_workstation: workstation.to_owned(),
            os_version,
        }
    }
}

/// The contents of an NTLM Challenge message.
///
/// The Challenge message is sent by the proxy in response to the client's Negotiate message; the
/// client is expected to respond with an Authenticate message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeMessage {
    /// The realm against which the client is authenticating, usually the domain.
    pub target_name: String,

    /// Stores which NTLM behavior has been accepted by the proxy.
    pub flags: Flags,

    /// The server challenge.
    pub server_challenge: [u8; 8],

    /// The reserved (context) field.
    pub context: [u8; 8],

    /// The target information as transmitted, including the terminating entry.
    ///
    /// This is the byte string mixed into the NTLMv2 response.
    pub target_info_raw: Vec<u8>,

    /// The parsed target information, in order of appearance, without the terminating entry.
    pub target_info: Vec<AvPair>,

    /// Version information about the proxy's operating system, if supplied.
    pub os_version: Option<OsVersion>,
}
impl ChallengeMessage {
    /// Creates a Challenge message whose raw target information is the encoding of `target_info`.
    ///
    /// Fails with [`DecodeError::FieldTooLong`] if an AV pair value exceeds `u16::MAX` bytes.
    pub fn new(flags: Flags, server_challenge: [u8; 8], target_name: &str, target_info: Vec<AvPair>) -> Result<Self, DecodeError> {
        let mut target_info_raw = Vec::new();
        if !target_info.is_empty() {
            for pair in &target_info {
                target_info_raw.extend_from_slice(&pair.to_bytes()?);
            }
            target_info_raw.extend_from_slice(&[0, 0, 0, 0]);
        }
        let os_version = if flags.contains(Flags::NEGOTIATE_VERSION) {
            Some(OsVersion::default())
        } else {
            None
        };
        Ok(Self {
            target_name: target_name.to_owned(),
            flags,
            server_challenge,
            context: [0; 8],
            target_info_raw,
            target_info,
            os_version,
        })
    }

    /// Returns the value of the first AV pair with the given identifier.
    pub fn av_pair(&self, id: AvId) -> Option<&[u8]> {
        self.target_info.iter()
            .find(|pair| pair.id == id)
            .map(|pair| pair.value.as_slice())
    }

    /// Returns the server timestamp (`MsvAvTimestamp`), if the proxy supplied a well-formed one.
    pub fn timestamp(&self) -> Option<[u8; 8]> {
        self.av_pair(AvId::Timestamp)
            .and_then(|value| value.try_into().ok())
    }
}

/// The contents of an NTLM Authenticate message.
///
/// The Authenticate message is sent by the client in response to the proxy's Challenge message;
/// once it is accepted by the proxy, the tunnel is authenticated. No session key and no MIC are
/// ever sent.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AuthenticateMessage {
    pub flags: Flags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,

    /// The authentication realm, echoed from the Challenge message.
    pub target_name: String,

    pub user_name: String,
    pub workstation: String,
}
