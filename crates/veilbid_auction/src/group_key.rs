//! Pre-shared group key: rotation on departure and frame sealing.

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use tracing::{debug, warn};
use veilbid_primitives::constants::MSG_NEW_KEY;
use veilbid_tokens::CryptoError;

use crate::errors::FrameError;
use crate::messages::{Message, NewKeyMsg};
use crate::sealed::{Sealed, SymmetricKey};

pub type GroupKey = SymmetricKey;

/// Fresh group key wrapped once per remaining member.
pub fn rotate(members: &[RsaPublicKey]) -> Result<(GroupKey, NewKeyMsg), CryptoError> {
    let key = GroupKey::generate();
    let keys = members.iter().map(|pk| key.wrap(pk)).collect::<Result<Vec<_>, _>>()?;
    debug!(recipients = keys.len(), "group key rotated");
    Ok((key, NewKeyMsg { keys }))
}

/// Trial-decrypts every entry and returns the first that opens.
#[must_use]
pub fn adopt(msg: &NewKeyMsg, identity: &RsaPrivateKey) -> Option<GroupKey> {
    let found = msg.keys.iter().find_map(|k| GroupKey::unwrap_with(k, identity).ok());
    if found.is_none() {
        warn!(entries = msg.keys.len(), "no entry in new_key opens with our identity key");
    }
    found
}

/// Wire encoding: `new_key` travels in the clear, everything else is sealed
/// under the group key.
pub fn encode_frame(msg: &Message, key: Option<&GroupKey>) -> Result<String, FrameError> {
    if matches!(msg, Message::NewKey(_)) {
        return Ok(serde_json::to_string(msg)?);
    }
    let key = key.ok_or(FrameError::NoGroupKey)?;
    Ok(serde_json::to_string(&key.seal(&serde_json::to_vec(msg)?)?)?)
}

pub fn decode_frame(frame: &str, key: Option<&GroupKey>) -> Result<Message, FrameError> {
    let value: Value = serde_json::from_str(frame)?;
    if value.get("type").and_then(Value::as_str) == Some(MSG_NEW_KEY) {
        return Ok(serde_json::from_value(value)?);
    }
    let sealed: Sealed = serde_json::from_value(value)?;
    let key = key.ok_or(FrameError::NoGroupKey)?;
    Ok(serde_json::from_slice(&key.open(&sealed)?)?)
}
