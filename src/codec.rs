//! Binary encoding and decoding of NTLM messages.
//!
//! All integers are little-endian. Every message starts with a fixed block (signature, message
//! type, flags and [`VarField`] descriptors) followed by a payload area that the descriptors point
//! into. Writing goes through `MessageWriter`, which places payloads after the fixed block and
//! fills in the descriptors as it goes; reading goes through `MessageReader`, which checks every
//! bound before slicing.


use crate::error::DecodeError;
use crate::message::{
    AUTHENTICATE_MESSAGE_TYPE, AuthenticateMessage, AvId, AvPair, CHALLENGE_MESSAGE_TYPE,
    ChallengeMessage, Flags, Message, NEGOTIATE_MESSAGE_TYPE, NTLMSSP_SIGNATURE, NegotiateMessage,
    OsVersion, VarField,
};


/// Length of the signature and message type.
pub const HEADER_LEN: usize = 8 + 4;

/// Length of the fixed part of a Negotiate message.
pub const NEGOTIATE_FIXED_LEN: usize
    = HEADER_LEN
    + 4 // flags
    + 8 // domain
    + 8 // workstation
    + 8 // version
    ;

/// Length of the fixed part of a Challenge message without the optional version block.
pub const CHALLENGE_FIXED_LEN: usize
    = HEADER_LEN
    + 8 // target name
    + 4 // flags
    + 8 // server challenge
    + 8 // reserved
    + 8 // target info
    ;

/// Length of the fixed part of an Authenticate message.
pub const AUTHENTICATE_FIXED_LEN: usize
    = HEADER_LEN
    + 8 // LM challenge response
    + 8 // NT challenge response
    + 8 // target name
    + 8 // user name
    + 8 // workstation
    + 8 // encrypted random session key
    + 4 // flags
    ;


/// Builds a message from its fixed block and its payloads.
struct MessageWriter {
    fixed: Vec<u8>,
    payload: Vec<u8>,
    fixed_len: usize,
}
impl MessageWriter {
    /// Starts a message of the given type whose fixed block will be `fixed_len` bytes long.
    fn new(message_type: u32, fixed_len: usize) -> Self {
        let mut fixed = Vec::with_capacity(fixed_len);
        fixed.extend_from_slice(&NTLMSSP_SIGNATURE);
        fixed.extend_from_slice(&message_type.to_le_bytes());
        Self {
            fixed,
            payload: Vec::new(),
            fixed_len,
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.fixed.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.fixed.extend_from_slice(bytes);
    }

    /// Appends `data` to the payload and a descriptor pointing to it to the fixed block.
    fn put_var_field(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let length: u16 = data.len().try_into()
            .or(Err(DecodeError::FieldTooLong { length: data.len() }))?;
        let offset = self.fixed_len + self.payload.len();
        let buffer_offset: u32 = offset.try_into()
            .or(Err(DecodeError::FieldTooLong { length: offset }))?;

        let field = VarField {
            length,
            max_length: length,
            buffer_offset,
        };
        self.fixed.extend_from_slice(&field.to_bytes());
        self.payload.extend_from_slice(data);
        Ok(())
    }

    /// Checks that the fixed block has the expected length and joins it with the payload.
    fn finish(self) -> Result<Vec<u8>, DecodeError> {
        if self.fixed.len() != self.fixed_len {
            return Err(DecodeError::LayoutMismatch { expected: self.fixed_len, obtained: self.fixed.len() });
        }
        let mut ret = self.fixed;
        ret.extend_from_slice(&self.payload);
        Ok(ret)
    }
}

/// A cursor over a complete message that refuses to read out of bounds.
struct MessageReader<'a> {
    message: &'a [u8],
    position: usize,
}
impl<'a> MessageReader<'a> {
    fn new(message: &'a [u8]) -> Self {
        Self {
            message,
            position: 0,
        }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = slice_checked(self.message, self.position, length)?;
        self.position += length;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut ret = [0u8; N];
        ret.copy_from_slice(self.take(N)?);
        Ok(ret)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    fn var_field(&mut self) -> Result<VarField, DecodeError> {
        let length = self.u16()?;
        let max_length = self.u16()?;
        let buffer_offset = self.u32()?;
        Ok(VarField {
            length,
            max_length,
            buffer_offset,
        })
    }

    fn flags(&mut self) -> Result<Flags, DecodeError> {
        // reserved bits are kept as-is
        self.u32().map(Flags::from_bits_retain)
    }

    fn os_version(&mut self) -> Result<OsVersion, DecodeError> {
        let bytes: [u8; 8] = self.array()?;
        Ok(OsVersion {
            major_version: bytes[0],
            minor_version: bytes[1],
            build_number: u16::from_le_bytes([bytes[2], bytes[3]]),
            reserved: [bytes[4], bytes[5], bytes[6]],
            ntlm_revision: bytes[7],
        })
    }

    /// Reads the optional version block if the flags announce it and the fixed block has room for
    /// it before the first payload.
    fn optional_os_version(&mut self, flags: Flags, first_payload: usize) -> Result<Option<OsVersion>, DecodeError> {
        if flags.contains(Flags::NEGOTIATE_VERSION) && self.position + 8 <= first_payload.min(self.message.len()) {
            self.os_version().map(Some)
        } else {
            Ok(None)
        }
    }

    fn remaining(&self) -> usize {
        self.message.len() - self.position
    }
}

/// Returns `length` bytes of `buffer` starting at `offset`, or [`DecodeError::BufferOverrun`].
fn slice_checked(buffer: &[u8], offset: usize, length: usize) -> Result<&[u8], DecodeError> {
    let overrun = || DecodeError::BufferOverrun { offset, length, buffer_len: buffer.len() };
    let end = offset.checked_add(length).ok_or_else(overrun)?;
    buffer.get(offset..end).ok_or_else(overrun)
}

/// Returns the offset of the first non-empty payload among `fields`, or `default` if all are empty.
fn first_payload_offset(fields: &[VarField], default: usize) -> usize {
    fields.iter()
        .filter(|f| f.length > 0)
        .map(|f| f.buffer_offset as usize)
        .min()
        .unwrap_or(default)
}


impl VarField {
    /// Serializes the descriptor into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.max_length.to_le_bytes());
        ret[4..8].copy_from_slice(&self.buffer_offset.to_le_bytes());
        ret
    }

    /// Extracts the payload this descriptor points to from the complete message.
    pub fn resolve<'a>(&self, message: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        if self.length == 0 {
            // empty fields may carry any offset
            return Ok(&[]);
        }
        let offset: usize = self.buffer_offset.try_into()
            .or(Err(DecodeError::BufferOverrun {
                offset: usize::MAX,
                length: self.length.into(),
                buffer_len: message.len(),
            }))?;
        slice_checked(message, offset, self.length.into())
    }
}

impl OsVersion {
    /// Serializes the OS version structure into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version,
            self.minor_version,
            build[0],
            build[1],
            self.reserved[0],
            self.reserved[1],
            self.reserved[2],
            self.ntlm_revision,
        ]
    }
}

impl AvPair {
    /// Serializes the AV pair into bytes.
    ///
    /// Fails with [`DecodeError::FieldTooLong`] if the value is longer than `u16::MAX` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let id: u16 = self.id.into();
        let length: u16 = self.value.len().try_into()
            .or(Err(DecodeError::FieldTooLong { length: self.value.len() }))?;

        let mut ret = Vec::with_capacity(4 + self.value.len());
        ret.extend_from_slice(&id.to_le_bytes());
        ret.extend_from_slice(&length.to_le_bytes());
        ret.extend_from_slice(&self.value);
        Ok(ret)
    }

    /// Attempts to convert the value of this AV pair into a string.
    pub fn to_string(&self) -> Result<String, DecodeError> {
        utf16_le_bytes_to_string(&self.value)
    }
}

/// Parses target information into AV pairs, stopping at the terminating entry.
///
/// Running out of bytes before the terminator is a [`DecodeError::BufferOverrun`].
pub fn decode_av_pairs(target_info: &[u8]) -> Result<Vec<AvPair>, DecodeError> {
    let mut reader = MessageReader::new(target_info);
    let mut pairs = Vec::new();
    loop {
        let id: AvId = reader.u16()?.into();
        if id == AvId::Eol {
            break;
        }
        let length = reader.u16()?;
        let value = reader.take(length.into())?.to_vec();
        pairs.push(AvPair {
            id,
            value,
        });
    }
    Ok(pairs)
}


fn string_to_utf16_le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Converts UTF-16 values stored as bytes in little-endian format into a string.
fn utf16_le_bytes_to_string(bytes: &[u8]) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLengthUnicode { length: bytes.len() });
    }
    let u16s: Vec<u16> = bytes.chunks_exact(2)
        .map(|chk| u16::from_le_bytes([chk[0], chk[1]]))
        .collect();
    String::from_utf16(&u16s)
        .or(Err(DecodeError::InvalidUtf16 { value: u16s }))
}

/// Converts OEM bytes into a string.
///
/// No code page is negotiated, so OEM strings are taken as (mostly ASCII) UTF-8.
fn oem_bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decodes a string field according to the negotiated flags.
fn ntlm_bytes_to_string(flags: Flags, bytes: &[u8]) -> Result<String, DecodeError> {
    if flags.contains(Flags::NEGOTIATE_UNICODE) {
        utf16_le_bytes_to_string(bytes)
    } else {
        Ok(oem_bytes_to_string(bytes))
    }
}

/// Reads and validates the signature and returns the message type.
fn read_header(reader: &mut MessageReader<'_>) -> Result<u32, DecodeError> {
    let signature: [u8; 8] = reader.array()?;
    if signature != NTLMSSP_SIGNATURE {
        return Err(DecodeError::InvalidSignature { expected: NTLMSSP_SIGNATURE, obtained: signature.to_vec() });
    }
    reader.u32()
}


/// Serializes a Negotiate message.
///
/// The domain and workstation are uppercased and sent as OEM bytes, in that order.
pub fn encode_negotiate(flags: Flags, domain: &str, workstation: &str, version: OsVersion) -> Result<Vec<u8>, DecodeError> {
    let domain_bytes = domain.to_uppercase().into_bytes();
    let workstation_bytes = workstation.to_uppercase().into_bytes();

    let mut writer = MessageWriter::new(NEGOTIATE_MESSAGE_TYPE, NEGOTIATE_FIXED_LEN);
    writer.put_u32(flags.bits());
    writer.put_var_field(&domain_bytes)?;
    writer.put_var_field(&workstation_bytes)?;
    writer.put_bytes(&version.to_bytes());
    writer.finish()
}

/// Deserializes a Challenge message.
pub fn decode_challenge(bytes: &[u8]) -> Result<ChallengeMessage, DecodeError> {
    let mut reader = MessageReader::new(bytes);
    let signature = reader.take(NTLMSSP_SIGNATURE.len())?;
    let message_type = reader.u32()?;
    if signature != NTLMSSP_SIGNATURE || message_type != CHALLENGE_MESSAGE_TYPE {
        return Err(DecodeError::NotAChallenge { signature: signature.to_vec(), message_type });
    }
    decode_challenge_body(bytes, reader)
}

fn decode_challenge_body(bytes: &[u8], mut reader: MessageReader<'_>) -> Result<ChallengeMessage, DecodeError> {
    let target_name_field = reader.var_field()?;
    let flags = reader.flags()?;
    let server_challenge = reader.array()?;
    let context = reader.array()?;
    let target_info_field = reader.var_field()?;
    let first_payload = first_payload_offset(&[target_name_field, target_info_field], bytes.len());
    let os_version = reader.optional_os_version(flags, first_payload)?;

    let target_name = ntlm_bytes_to_string(flags, target_name_field.resolve(bytes)?)?;
    let target_info_raw = target_info_field.resolve(bytes)?.to_vec();
    let target_info = if target_info_raw.is_empty() {
        Vec::new()
    } else {
        decode_av_pairs(&target_info_raw)?
    };

    Ok(ChallengeMessage {
        target_name,
        flags,
        server_challenge,
        context,
        target_info_raw,
        target_info,
        os_version,
    })
}

/// Serializes an Authenticate message.
///
/// Only Unicode is supported for the string fields. The version flag is always cleared, as no
/// version block is sent.
pub fn encode_authenticate(msg: &AuthenticateMessage) -> Result<Vec<u8>, DecodeError> {
    if !msg.flags.contains(Flags::NEGOTIATE_UNICODE) {
        return Err(DecodeError::UnicodeRequired);
    }
    let flags = msg.flags.difference(Flags::NEGOTIATE_VERSION);

    let mut writer = MessageWriter::new(AUTHENTICATE_MESSAGE_TYPE, AUTHENTICATE_FIXED_LEN);
    writer.put_var_field(&msg.lm_response)?;
    writer.put_var_field(&msg.nt_response)?;
    writer.put_var_field(&string_to_utf16_le_bytes(&msg.target_name))?;
    writer.put_var_field(&string_to_utf16_le_bytes(&msg.user_name))?;
    writer.put_var_field(&string_to_utf16_le_bytes(&msg.workstation))?;
    // no session key
    writer.put_var_field(&[])?;
    writer.put_u32(flags.bits());
    writer.finish()
}


impl Message {
    /// Serializes the NTLM message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        match self {
            Message::Negotiate(t1m) => t1m.to_bytes(),
            Message::Challenge(t2m) => t2m.to_bytes(),
            Message::Authenticate(t3m) => encode_authenticate(t3m),
            Message::Other(msg_num, data) => {
                let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
                buf.extend_from_slice(&NTLMSSP_SIGNATURE);
                buf.extend_from_slice(&msg_num.to_le_bytes());
                buf.extend_from_slice(data);
                Ok(buf)
            },
        }
    }
}
impl TryFrom<&[u8]> for Message {
    type Error = DecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let mut reader = MessageReader::new(value);
        let message_type = read_header(&mut reader)?;
        match message_type {
            NEGOTIATE_MESSAGE_TYPE => decode_negotiate_body(value, reader)
                .map(Message::Negotiate),
            CHALLENGE_MESSAGE_TYPE => decode_challenge_body(value, reader)
                .map(Message::Challenge),
            AUTHENTICATE_MESSAGE_TYPE => decode_authenticate_body(value, reader)
                .map(Message::Authenticate),
            other_type => Ok(Message::Other(other_type, value[HEADER_LEN..].to_vec())),
        }
    }
}

impl NegotiateMessage {
    /// Serializes the Negotiate message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        encode_negotiate(self.flags, &self.supplied_domain, &self.supplied_workstation, self.os_version)
    }
}

fn decode_negotiate_body(bytes: &[u8], mut reader: MessageReader<'_>) -> Result<NegotiateMessage, DecodeError> {
    let flags = reader.flags()?;
    let domain_field = reader.var_field()?;
    let workstation_field = reader.var_field()?;
    let os_version = if reader.remaining() >= 8 {
        reader.os_version()?
    } else {
        OsVersion::default()
    };

    // both names are always OEM
    let supplied_domain = oem_bytes_to_string(domain_field.resolve(bytes)?);
    let supplied_workstation = oem_bytes_to_string(workstation_field.resolve(bytes)?);

    Ok(NegotiateMessage {
        flags,
        supplied_domain,
        supplied_workstation,
        os_version,
    })
}

impl ChallengeMessage {
    /// Serializes the Challenge message into bytes.
    ///
    /// The raw target information is written verbatim. A version block is written if the
    /// version flag is set.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let with_version = self.flags.contains(Flags::NEGOTIATE_VERSION);
        let fixed_len = if with_version { CHALLENGE_FIXED_LEN + 8 } else { CHALLENGE_FIXED_LEN };
        let target_name_bytes = if self.flags.contains(Flags::NEGOTIATE_UNICODE) {
            string_to_utf16_le_bytes(&self.target_name)
        } else {
            self.target_name.as_bytes().to_vec()
        };

        let mut writer = MessageWriter::new(CHALLENGE_MESSAGE_TYPE, fixed_len);
        writer.put_var_field(&target_name_bytes)?;
        writer.put_u32(self.flags.bits());
        writer.put_bytes(&self.server_challenge);
        writer.put_bytes(&self.context);
        writer.put_var_field(&self.target_info_raw)?;
        if with_version {
            writer.put_bytes(&self.os_version.unwrap_or_default().to_bytes());
        }
        writer.finish()
    }
}

fn decode_authenticate_body(bytes: &[u8], mut reader: MessageReader<'_>) -> Result<AuthenticateMessage, DecodeError> {
    let lm_field = reader.var_field()?;
    let nt_field = reader.var_field()?;
    let target_name_field = reader.var_field()?;
    let user_name_field = reader.var_field()?;
    let workstation_field = reader.var_field()?;
    let session_key_field = reader.var_field()?;
    let flags = reader.flags()?;

    // the session key is not used, but it must still lie within the message
    session_key_field.resolve(bytes)?;

    Ok(AuthenticateMessage {
        flags,
        lm_response: lm_field.resolve(bytes)?.to_vec(),
        nt_response: nt_field.resolve(bytes)?.to_vec(),
        target_name: ntlm_bytes_to_string(flags, target_name_field.resolve(bytes)?)?,
        user_name: ntlm_bytes_to_string(flags, user_name_field.resolve(bytes)?)?,
        workstation: ntlm_bytes_to_string(flags, workstation_field.resolve(bytes)?)?,
    })
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::message::DEFAULT_NEGOTIATE_FLAGS;

    // Challenge from a Windows domain controller: target "DOMAIN", no version block.
    const DOMAIN_CHALLENGE: [u8; 0x9e] = hex!(
        "4e544c4d53535000020000000c000c003000000001028100"
        "0123456789abcdef0000000000000000620062003c000000"
        "44004f004d00410049004e0002000c0044004f004d004100"
        "49004e0001000c0053004500520056004500520004001400"
        "64006f006d00610069006e002e0063006f006d0003002200"
        "7300650072007600650072002e0064006f006d0061006900"
        "6e002e0063006f006d0000000000"
    );

    #[test]
    fn test_decode_domain_challenge() {
        let challenge = decode_challenge(&DOMAIN_CHALLENGE)
            .expect("failed to decode challenge");

        assert_eq!(
            challenge.flags,
            Flags::NEGOTIATE_UNICODE
                | Flags::NEGOTIATE_NTLM
                | Flags::TARGET_TYPE_DOMAIN
                | Flags::NEGOTIATE_TARGET_INFO,
        );
        assert_eq!(challenge.target_name, "DOMAIN");
        assert_eq!(challenge.server_challenge, hex!("0123456789abcdef"));
        assert_eq!(challenge.os_version, None);
        assert_eq!(challenge.target_info_raw, &DOMAIN_CHALLENGE[0x3c..]);

        let ids: Vec<AvId> = challenge.target_info.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![AvId::NbDomainName, AvId::NbComputerName, AvId::DnsDomainName, AvId::DnsComputerName]);
        assert_eq!(challenge.target_info[1].to_string().unwrap(), "SERVER");
        assert_eq!(challenge.target_info[3].to_string().unwrap(), "server.domain.com");
        assert_eq!(challenge.timestamp(), None);
    }

    #[test]
    fn test_negotiate_layout() {
        let bytes = encode_negotiate(
            DEFAULT_NEGOTIATE_FLAGS | Flags::NEGOTIATE_OEM_DOMAIN_SUPPLIED,
            "corp",
            "",
            OsVersion::default(),
        ).unwrap();

        assert_eq!(bytes.len(), NEGOTIATE_FIXED_LEN + 4);
        assert_eq!(&bytes[0..12], &hex!("4e544c4d5353500001000000"));
        assert_eq!(&bytes[12..16], &0xA088_9201u32.to_le_bytes());
        // domain: length 4, offset 40
        assert_eq!(&bytes[16..24], &hex!("0400040028000000"));
        // workstation: empty, offset right after the domain
        assert_eq!(&bytes[24..32], &hex!("000000002c000000"));
        // Windows 7 SP1, revision 15
        assert_eq!(&bytes[32..40], &hex!("0601b11d0000000f"));
        assert_eq!(&bytes[40..], b"CORP");
    }

    #[test]
    fn test_negotiate_decodes_back() {
        let negotiate = NegotiateMessage::new("corp", "ws01", OsVersion::default());
        let bytes = negotiate.to_bytes().unwrap();
        let decoded = Message::try_from(bytes.as_slice()).unwrap();
        let expected = NegotiateMessage {
            supplied_domain: "CORP".to_owned(),
            supplied_workstation: "WS01".to_owned(),
            ..negotiate
        };
        assert_eq!(decoded, Message::Negotiate(expected));
    }

    #[test]
    fn test_challenge_fixture_round_trip() {
        let flags = Flags::NEGOTIATE_UNICODE
            | Flags::NEGOTIATE_NTLM
            | Flags::NEGOTIATE_TARGET_INFO
            | Flags::NEGOTIATE_VERSION;
        let original = ChallengeMessage::new(
            flags,
            hex!("1122334455667788"),
            "CORP",
            vec![
                AvPair::from_string(AvId::NbDomainName, "CORP"),
                AvPair::from_string(AvId::NbComputerName, "PROXY01"),
                AvPair::timestamp(133_000_000_000_000_000),
            ],
        ).unwrap();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(&bytes[12..20], &hex!("0800080038000000"));

        let decoded = decode_challenge(&bytes).unwrap();
        assert_eq!(decoded.flags, flags);
        assert_eq!(decoded.server_challenge, original.server_challenge);
        assert_eq!(decoded.target_info, original.target_info);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_challenge_without_target_info() {
        let original = ChallengeMessage::new(Flags::NEGOTIATE_UNICODE, [7; 8], "", Vec::new()).unwrap();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(bytes.len(), CHALLENGE_FIXED_LEN);

        let decoded = decode_challenge(&bytes).unwrap();
        assert!(decoded.target_info_raw.is_empty());
        assert!(decoded.target_info.is_empty());
    }

    #[test]
    fn test_oem_target_name() {
        let original = ChallengeMessage::new(Flags::NEGOTIATE_OEM, [0; 8], "WORKGROUP", Vec::new()).unwrap();
        let decoded = decode_challenge(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.target_name, "WORKGROUP");
    }

    #[test]
    fn test_not_a_challenge() {
        let negotiate = NegotiateMessage::new("", "", OsVersion::default()).to_bytes().unwrap();
        assert!(matches!(
            decode_challenge(&negotiate),
            Err(DecodeError::NotAChallenge { message_type: 1, .. }),
        ));

        let mut bad_signature = DOMAIN_CHALLENGE;
        bad_signature[0] = b'X';
        assert!(matches!(decode_challenge(&bad_signature), Err(DecodeError::NotAChallenge { .. })));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            decode_challenge(&DOMAIN_CHALLENGE[..30]),
            Err(DecodeError::BufferOverrun { buffer_len: 30, .. }),
        ));
        assert!(matches!(
            decode_challenge(&DOMAIN_CHALLENGE[..4]),
            Err(DecodeError::BufferOverrun { .. }),
        ));
    }

    #[test]
    fn test_var_field_overrun() {
        // target info claims 0x62 bytes at 0x3c, but the message ends early
        let truncated = &DOMAIN_CHALLENGE[..0x80];
        assert_eq!(
            decode_challenge(truncated),
            Err(DecodeError::BufferOverrun { offset: 0x3c, length: 0x62, buffer_len: 0x80 }),
        );

        // offset far outside the message
        let mut far = DOMAIN_CHALLENGE.to_vec();
        far[44..48].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode_challenge(&far), Err(DecodeError::BufferOverrun { .. })));
    }

    #[test]
    fn test_av_pair_overrun() {
        // entry claims eight bytes, only two follow
        let target_info = hex!("0700080001020000");
        assert!(matches!(decode_av_pairs(&target_info), Err(DecodeError::BufferOverrun { .. })));

        // no terminator
        let target_info = hex!("090002004100");
        assert!(matches!(decode_av_pairs(&target_info), Err(DecodeError::BufferOverrun { .. })));
    }

    #[test]
    fn test_odd_length_unicode_target_name() {
        let mut bytes = ChallengeMessage::new(Flags::NEGOTIATE_UNICODE, [0; 8], "AB", Vec::new()).unwrap()
            .to_bytes()
            .unwrap();
        // shorten target name to three bytes
        bytes[12] = 3;
        assert_eq!(decode_challenge(&bytes), Err(DecodeError::OddLengthUnicode { length: 3 }));
    }

    #[test]
    fn test_authenticate_layout() {
        let msg = AuthenticateMessage {
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM | Flags::NEGOTIATE_VERSION,
            lm_response: Vec::new(),
            nt_response: vec![0xAB; 20],
            target_name: "CORP".to_owned(),
            user_name: "alice".to_owned(),
            workstation: "WS".to_owned(),
        };
        let bytes = encode_authenticate(&msg).unwrap();

        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        // LM response: empty, at the start of the payload
        assert_eq!(&bytes[12..20], &hex!("0000000040000000"));
        // NT response
        assert_eq!(&bytes[20..28], &hex!("1400140040000000"));
        // target name, user name, workstation
        assert_eq!(&bytes[28..36], &hex!("0800080054000000"));
        assert_eq!(&bytes[36..44], &hex!("0a000a005c000000"));
        assert_eq!(&bytes[44..52], &hex!("0400040066000000"));
        // session key
        assert_eq!(&bytes[52..60], &hex!("000000006a000000"));
        // version flag cleared
        assert_eq!(&bytes[60..64], &0x0000_0201u32.to_le_bytes());
        assert_eq!(bytes.len(), 0x6a);

        let decoded = Message::try_from(bytes.as_slice()).unwrap();
        let expected = AuthenticateMessage {
            flags: Flags::NEGOTIATE_UNICODE | Flags::NEGOTIATE_NTLM,
            ..msg
        };
        assert_eq!(decoded, Message::Authenticate(expected));
    }

    #[test]
    fn test_authenticate_requires_unicode() {
        let msg = AuthenticateMessage {
            flags: Flags::NEGOTIATE_OEM | Flags::NEGOTIATE_NTLM,
            lm_response: Vec::new(),
            nt_response: Vec::new(),
            target_name: String::new(),
            user_name: "alice".to_owned(),
            workstation: String::new(),
        };
        assert_eq!(encode_authenticate(&msg), Err(DecodeError::UnicodeRequired));
    }

    #[test]
    fn test_other_message_type() {
        let mut bytes = NTLMSSP_SIGNATURE.to_vec();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(b"rest");
        let msg = Message::try_from(bytes.as_slice()).unwrap();
        assert_eq!(msg, Message::Other(9, b"rest".to_vec()));
        assert_eq!(msg.to_bytes().unwrap(), bytes);
    }
}
