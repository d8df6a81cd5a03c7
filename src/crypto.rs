//! NTLMv2 response calculation.
//!
//! NTLMv2 derives its key from the MD4 hash of the password. MD4 is broken and must not be used
//! for anything else; it appears here only because the protocol mandates it, and only inside
//! [`ntlm_hash`].


use chrono::{DateTime, Utc};
use digest::Digest;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::Credentials;
use crate::error::UnsupportedMode;
use crate::message::{AuthenticateMessage, ChallengeMessage, Flags};


/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch (1970-01-01).
const SECONDS_1601_TO_1970: i64 = 11_644_473_600;

/// FILETIME ticks (100 ns) per second.
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;


/// The responses to an NTLMv2 challenge.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChallengeResponse {
    /// The NTLMv2 response: the NT proof string followed by the client blob.
    pub nt_response: Vec<u8>,

    /// The LMv2 response; empty whenever the proxy sent target information.
    pub lm_response: Vec<u8>,
}


fn utf16_le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    let mut ret = [0u8; 16];
    ret.copy_from_slice(mac.finalize().into_bytes().as_slice());
    ret
}


/// Derives the NT hash from a password.
///
/// The password is encoded as UTF-16 in little-endian byte order (without the Byte Order Mark)
/// and hashed using MD4.
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    let mut md4_state = <Md4 as Digest>::new();
    md4_state.update(utf16_le_bytes(password));
    let mut ret = [0u8; 16];
    ret.copy_from_slice(md4_state.finalize().as_slice());
    ret
}

/// Derives the NTLMv2 key.
///
/// This is HMAC-MD5 keyed with the [`ntlm_hash`] of the password over the uppercase username
/// followed by the unchanged-case target, both encoded as UTF-16LE.
pub fn ntlmv2_hash(password: &str, username: &str, target: &str) -> [u8; 16] {
    let key = ntlm_hash(password);
    let mut identity = username.to_uppercase();
    identity.push_str(target);
    hmac_md5(&key, &[&utf16_le_bytes(&identity)])
}

/// Calculates the NTLMv2 and LMv2 responses to a server challenge.
///
/// The result only depends on the arguments. The LMv2 response is only calculated if
/// `target_info` is empty, matching what clients send to servers that provide target
/// information.
pub fn compute_responses(
    ntlmv2_hash: &[u8; 16],
    server_challenge: [u8; 8],
    client_challenge: [u8; 8],
    timestamp: [u8; 8],
    target_info: &[u8],
) -> ChallengeResponse {
    let mut temp = Vec::with_capacity(8 + 8 + 8 + 4 + target_info.len() + 4);
    temp.push(0x01); // response version
    temp.push(0x01); // highest response version understood
    temp.extend_from_slice(&[0; 6]);
    temp.extend_from_slice(&timestamp);
    temp.extend_from_slice(&client_challenge);
    temp.extend_from_slice(&[0; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0; 4]);

    let nt_proof_string = hmac_md5(ntlmv2_hash, &[&server_challenge, &temp]);

    let mut nt_response = Vec::with_capacity(16 + temp.len());
    nt_response.extend_from_slice(&nt_proof_string);
    nt_response.extend_from_slice(&temp);

    let lm_response = if target_info.is_empty() {
        let mut lm = Vec::with_capacity(16 + 8);
        lm.extend_from_slice(&hmac_md5(ntlmv2_hash, &[&server_challenge, &client_challenge]));
        lm.extend_from_slice(&client_challenge);
        lm
    } else {
        Vec::new()
    };

    ChallengeResponse {
        nt_response,
        lm_response,
    }
}

/// Generates a client challenge from the operating system's random number generator.
pub fn random_client_challenge() -> [u8; 8] {
    let mut client_challenge = [0u8; 8];
    OsRng.fill_bytes(&mut client_challenge);
    client_challenge
}

/// Converts a point in time into a Windows FILETIME (100 ns intervals since 1601-01-01 UTC).
///
/// Points in time before 1601 yield 0.
pub fn filetime_from(time: DateTime<Utc>) -> u64 {
    let seconds = time.timestamp() + SECONDS_1601_TO_1970;
    let ticks = seconds
        .saturating_mul(FILETIME_TICKS_PER_SECOND)
        .saturating_add(i64::from(time.timestamp_subsec_nanos() / 100));
    u64::try_from(ticks).unwrap_or(0)
}

/// Obtains the current time as a Windows FILETIME.
pub fn filetime_now() -> u64 {
    filetime_from(Utc::now())
}

/// Rejects challenges that ask for NTLM modes this implementation does not support.
pub fn check_policy(flags: Flags) -> Result<(), UnsupportedMode> {
    if flags.contains(Flags::NEGOTIATE_LM_KEY) {
        return Err(UnsupportedMode::V1Requested);
    }
    if flags.contains(Flags::NEGOTIATE_KEY_EXCH) {
        return Err(UnsupportedMode::KeyExchangeRequested);
    }
    Ok(())
}

/// Builds the Authenticate message answering `challenge`.
///
/// The server's `MsvAvTimestamp` is used as the response timestamp if the challenge carries one;
/// otherwise `fallback_timestamp` is. The NTLMv2 key is derived against the challenge's target
/// name, or against the credentials' domain if the proxy did not name a target. The
/// Authenticate message echoes the challenge's flags.
///
/// Clients that always use the challenge's target name verbatim derive against an empty target
/// in that case; the domain fallback intentionally differs from them.
pub fn respond_to_challenge(
    challenge: &ChallengeMessage,
    creds: &Credentials,
    client_challenge: [u8; 8],
    fallback_timestamp: u64,
    workstation: &str,
) -> Result<AuthenticateMessage, UnsupportedMode> {
    check_policy(challenge.flags)?;

    let timestamp = challenge.timestamp()
        .unwrap_or_else(|| fallback_timestamp.to_le_bytes());
    let target = if challenge.target_name.is_empty() {
        creds.domain.as_str()
    } else {
        challenge.target_name.as_str()
    };

    let key = ntlmv2_hash(&creds.password, &creds.username, target);
    let response = compute_responses(
        &key,
        challenge.server_challenge,
        client_challenge,
        timestamp,
        &challenge.target_info_raw,
    );

    Ok(AuthenticateMessage {
        flags: challenge.flags,
        lm_response: response.lm_response,
        nt_response: response.nt_response,
        target_name: target.to_owned(),
        user_name: creds.username.clone(),
        workstation: workstation.to_owned(),
    })
}
