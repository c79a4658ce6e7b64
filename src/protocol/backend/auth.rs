//! Startup, authentication and asynchronous backend messages.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i32, read_u8, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication request sub-kinds.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    /// Authentication successful
    Ok,
    /// Server requests a cleartext password
    CleartextPassword,
    /// Server requests an MD5 hashed password with this salt
    Md5Password { salt: [u8; 4] },
    /// Server starts SASL with the given mechanisms
    Sasl { mechanisms: Vec<&'a str> },
    /// SASL challenge (server-first-message)
    SaslContinue { data: &'a [u8] },
    /// SASL completion (server-final-message)
    SaslFinal { data: &'a [u8] },
}

impl<'a> AuthenticationMessage<'a> {
    /// Parse an Authentication message payload.
    ///
    /// Sub-kinds other than the ones modeled here are protocol errors: the
    /// driver supports cleartext, MD5 and SCRAM only.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (specifier, rest) = read_i32(payload)?;
        match specifier {
            0 => {
                if !rest.is_empty() {
                    return Err(Error::Protocol("AuthenticationOk: trailing data".into()));
                }
                Ok(AuthenticationMessage::Ok)
            }
            3 => Ok(AuthenticationMessage::CleartextPassword),
            5 => {
                let (salt, rest) = read_bytes(rest, 4)?;
                if !rest.is_empty() {
                    return Err(Error::Protocol("AuthenticationMD5: trailing data".into()));
                }
                Ok(AuthenticationMessage::Md5Password {
                    salt: [salt[0], salt[1], salt[2], salt[3]],
                })
            }
            10 => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while !data.is_empty() && data[0] != 0 {
                    let (mechanism, rest) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = rest;
                }
                Ok(AuthenticationMessage::Sasl { mechanisms })
            }
            11 => Ok(AuthenticationMessage::SaslContinue { data: rest }),
            12 => Ok(AuthenticationMessage::SaslFinal { data: rest }),
            other => Err(Error::Protocol(format!(
                "unknown authentication specifier: {other}"
            ))),
        }
    }
}

/// BackendKeyData message - cancellation key for this backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// Backend process ID
    pub pid: u32,
    /// Secret key for CancelRequest
    pub secret_key: u32,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (secret_key, rest) = read_u32(rest)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("BackendKeyData: trailing data".into()));
        }
        Ok(Self { pid, secret_key })
    }
}

/// ParameterStatus message - a server parameter value.
#[derive(Debug)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, rest) = read_cstr(rest)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("ParameterStatus: trailing data".into()));
        }
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - the server awaits the next command.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (byte, rest) = read_u8(payload)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("ReadyForQuery: trailing data".into()));
        }
        let status = TransactionStatus::from_byte(byte).ok_or_else(|| {
            Error::Protocol(format!("invalid transaction status: {}", byte as char))
        })?;
        Ok(Self { status })
    }
}

/// NotificationResponse message - a LISTEN/NOTIFY event.
#[derive(Debug)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend process
    pub pid: u32,
    /// Channel name
    pub channel: &'a str,
    /// Notification payload (empty string if none was given)
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (notify_payload, rest) = read_cstr(rest)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("NotificationResponse: trailing data".into()));
        }
        Ok(Self {
            pid,
            channel,
            payload: notify_payload,
        })
    }
}
