//! Just enough of the contract ABI to talk to the FlightSurety app contract:
//! keccak selectors, static words, and a single dynamic `string`.

use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::models::{AccountHandle, Index, StatusRequest};

pub const WORD: usize = 32;

pub const REGISTRATION_FEE: &str = "REGISTRATION_FEE()";
pub const REGISTER_ORACLE: &str = "registerOracle()";
pub const GET_MY_INDEXES: &str = "getMyIndexes()";
pub const SUBMIT_ORACLE_RESPONSE: &str =
    "submitOracleResponse(uint8,address,string,uint256,uint8,uint256)";
pub const ORACLE_REQUEST_EVENT: &str = "OracleRequest(uint8,address,string,uint256)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("payload is {len} bytes, needed at least {needed}")]
    Truncated { needed: usize, len: usize },

    #[error("value does not fit in {0}")]
    Overflow(&'static str),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// A call argument.
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    Uint(u128),
    Address(&'a AccountHandle),
    String(&'a str),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// Builds `0x`-prefixed calldata for `signature` applied to `tokens`.
pub fn encode_call(signature: &str, tokens: &[Token<'_>]) -> Result<String, AbiError> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::Address(account) => head.extend_from_slice(&address_word(account)?),
            Token::String(value) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(value.len() as u128));
                tail.extend_from_slice(value.as_bytes());
                let padding = (WORD - value.len() % WORD) % WORD;
                tail.resize(tail.len() + padding, 0);
            }
        }
    }

    let mut calldata = selector(signature).to_vec();
    calldata.extend(head);
    calldata.extend(tail);
    Ok(format!("0x{}", hex::encode(calldata)))
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, AbiError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|err| AbiError::InvalidHex(err.to_string()))
}

/// Decodes the `uint8[3]` returned by `getMyIndexes()`.
pub fn decode_indexes(data: &[u8]) -> Result<[u8; 3], AbiError> {
    Ok([
        decode_u8(word(data, 0)?)?,
        decode_u8(word(data, 1)?)?,
        decode_u8(word(data, 2)?)?,
    ])
}

/// Decodes the non-indexed data of an `OracleRequest` log.
pub fn decode_oracle_request(data: &[u8]) -> Result<StatusRequest, AbiError> {
    let index = decode_u8(word(data, 0)?)?;
    let airline = decode_address(word(data, 1)?)?;
    let flight_offset = usize::try_from(decode_uint(word(data, 2)?)?)
        .map_err(|_| AbiError::Overflow("usize"))?;
    let timestamp = u64::try_from(decode_uint(word(data, 3)?)?)
        .map_err(|_| AbiError::Overflow("u64"))?;
    let flight = decode_string(data, flight_offset)?;

    Ok(StatusRequest {
        index: Index(index),
        airline,
        flight,
        timestamp,
    })
}

pub fn decode_uint(word: &[u8]) -> Result<u128, AbiError> {
    if word.len() != WORD {
        return Err(AbiError::Truncated {
            needed: WORD,
            len: word.len(),
        });
    }
    if word[..16].iter().any(|byte| *byte != 0) {
        return Err(AbiError::Overflow("u128"));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(buf))
}

fn word(data: &[u8], position: usize) -> Result<&[u8], AbiError> {
    let start = position * WORD;
    let end = start + WORD;
    data.get(start..end).ok_or(AbiError::Truncated {
        needed: end,
        len: data.len(),
    })
}

fn decode_u8(word: &[u8]) -> Result<u8, AbiError> {
    u8::try_from(decode_uint(word)?).map_err(|_| AbiError::Overflow("uint8"))
}

fn decode_address(word: &[u8]) -> Result<AccountHandle, AbiError> {
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(AbiError::InvalidAddress(hex::encode(word)));
    }
    Ok(AccountHandle::new(format!("0x{}", hex::encode(&word[12..]))))
}

fn decode_string(data: &[u8], offset: usize) -> Result<String, AbiError> {
    let len_end = offset.checked_add(WORD).ok_or(AbiError::Overflow("usize"))?;
    let len_word = data.get(offset..len_end).ok_or(AbiError::Truncated {
        needed: len_end,
        len: data.len(),
    })?;
    let len = usize::try_from(decode_uint(len_word)?).map_err(|_| AbiError::Overflow("usize"))?;
    let end = len_end.checked_add(len).ok_or(AbiError::Overflow("usize"))?;
    let bytes = data.get(len_end..end).ok_or(AbiError::Truncated {
        needed: end,
        len: data.len(),
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(account: &AccountHandle) -> Result<[u8; WORD], AbiError> {
    if !account.is_address() {
        return Err(AbiError::InvalidAddress(account.to_string()));
    }
    let bytes = decode_hex(account.as_str())?;
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airline() -> AccountHandle {
        AccountHandle::new("0x00000000000000000000000000000000000000aa")
    }

    #[test]
    fn known_selectors_and_hashes() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert!(event_topic(ORACLE_REQUEST_EVENT).starts_with("0x"));
        assert_eq!(event_topic(ORACLE_REQUEST_EVENT).len(), 66);
    }

    #[test]
    fn string_arguments_are_placed_after_the_head() {
        let airline = airline();
        let calldata = encode_call(
            "OracleRequest(uint8,address,string,uint256)",
            &[
                Token::Uint(7),
                Token::Address(&airline),
                Token::String("ND1309"),
                Token::Uint(1_600_000_000),
            ],
        )
        .unwrap();
        let bytes = decode_hex(&calldata).unwrap();
        let body = &bytes[4..];

        // four head words, then length word and one padded data word
        assert_eq!(body.len(), 6 * WORD);
        assert_eq!(decode_uint(&body[2 * WORD..3 * WORD]).unwrap(), 128);
        assert_eq!(decode_uint(&body[4 * WORD..5 * WORD]).unwrap(), 6);
        assert_eq!(&body[5 * WORD..5 * WORD + 6], b"ND1309");

        let request = decode_oracle_request(body).unwrap();
        assert_eq!(request.index, Index(7));
        assert_eq!(request.airline, airline);
        assert_eq!(request.flight, "ND1309");
        assert_eq!(request.timestamp, 1_600_000_000);
    }

    #[test]
    fn truncated_payloads_are_reported() {
        let err = decode_oracle_request(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, AbiError::Truncated { .. }));
    }

    #[test]
    fn oversized_index_words_are_rejected() {
        let mut data = vec![0u8; 3 * WORD];
        data[WORD - 2] = 1;
        assert_eq!(decode_indexes(&data), Err(AbiError::Overflow("uint8")));
    }

    #[test]
    fn invalid_addresses_cannot_be_encoded() {
        let bad = AccountHandle::new("0x1234");
        let err = encode_call(SUBMIT_ORACLE_RESPONSE, &[Token::Address(&bad)]).unwrap_err();
        assert!(matches!(err, AbiError::InvalidAddress(_)));
    }
}
