//! Authentication messages and the SCRAM-SHA-256 client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute the MD5 password response.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash_hex = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);

    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

// === password preparation ===

/// Failure of a password preparation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepError {
    /// The password contains output prohibited by SASLprep.
    InvalidEncoding,
}

/// Password preparation strategy for the SCRAM exchange.
///
/// SASL requires SASLprep, but PostgreSQL stores whatever byte string the
/// password was when the role was created and accepts the raw bytes when
/// preparation is impossible. The client starts with [`saslprep`]; when
/// that strategy fails with [`PrepError::InvalidEncoding`] the exchange
/// swaps to [`raw_password`] and recomputes from the beginning (the nonce
/// is unchanged, so no extra round trip is needed). A different strategy
/// can be injected up front with [`ScramClient::set_prepare`].
pub type PreparePassword = fn(&str) -> Result<Vec<u8>, PrepError>;

/// RFC 4013 SASLprep, restricted to what passwords need: map the
/// non-ASCII space characters to space, drop the "commonly mapped to
/// nothing" characters, and reject prohibited output.
pub fn saslprep(password: &str) -> Result<Vec<u8>, PrepError> {
    let mut out = String::with_capacity(password.len());
    for c in password.chars() {
        if is_mapped_to_nothing(c) {
            continue;
        }
        if is_non_ascii_space(c) {
            out.push(' ');
            continue;
        }
        if is_prohibited(c) {
            return Err(PrepError::InvalidEncoding);
        }
        out.push(c);
    }
    Ok(out.into_bytes())
}

/// Identity preparation: the raw password bytes.
pub fn raw_password(password: &str) -> Result<Vec<u8>, PrepError> {
    Ok(password.as_bytes().to_vec())
}

fn is_non_ascii_space(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}' | '\u{1680}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
    )
}

fn is_mapped_to_nothing(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{1806}'
            | '\u{180B}'..='\u{180D}'
            | '\u{200B}'..='\u{200D}'
            | '\u{2060}'
            | '\u{FE00}'..='\u{FE0F}'
            | '\u{FEFF}'
    )
}

fn is_prohibited(c: char) -> bool {
    c.is_control()
        || c == '\u{FFFD}'
        // private use
        || matches!(c, '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}')
        // non-characters
        || matches!(c, '\u{FDD0}'..='\u{FDEF}')
        || (c as u32 & 0xFFFE) == 0xFFFE
}

// === SCRAM-SHA-256 ===

/// SCRAM-SHA-256 / SCRAM-SHA-256-PLUS client.
pub struct ScramClient {
    /// Client nonce (base64 text)
    nonce: String,
    /// GS2 header: "n,," or "p=tls-server-end-point,,"
    gs2_header: String,
    /// Raw channel binding data (certificate hash), empty without binding
    cb_data: Vec<u8>,
    /// Cleartext password as given by the caller
    password: String,
    /// Password preparation strategy
    prepare: PreparePassword,
    /// Auth message kept for server signature verification
    auth_message: Option<String>,
    /// Salted password kept for server signature verification
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a new SCRAM client without channel binding.
    pub fn new(password: &str) -> Self {
        Self::with_parts(password, "n,,".to_string(), Vec::new())
    }

    /// Create a new SCRAM client with tls-server-end-point channel binding.
    pub fn new_with_channel_binding(password: &str, channel_binding_data: &[u8]) -> Self {
        Self::with_parts(
            password,
            "p=tls-server-end-point,,".to_string(),
            channel_binding_data.to_vec(),
        )
    }

    fn with_parts(password: &str, gs2_header: String, cb_data: Vec<u8>) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);

        Self {
            nonce: BASE64.encode(nonce_bytes),
            gs2_header,
            cb_data,
            password: password.to_string(),
            prepare: saslprep,
            auth_message: None,
            salted_password: None,
        }
    }

    /// Replace the password preparation strategy. The default is [`saslprep`].
    pub fn set_prepare(&mut self, prepare: PreparePassword) {
        self.prepare = prepare;
    }

    /// Generate the client-first-message.
    ///
    /// The username is empty: PostgreSQL takes it from the startup message
    /// and ignores whatever SCRAM carries.
    pub fn client_first_message(&self) -> String {
        format!("{}n=,r={}", self.gs2_header, self.nonce)
    }

    fn client_first_message_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    fn prepared_password(&mut self) -> Vec<u8> {
        match (self.prepare)(&self.password) {
            Ok(bytes) => bytes,
            Err(PrepError::InvalidEncoding) => {
                // PostgreSQL accepts the raw bytes when the password cannot
                // be prepared; swap strategies and restart the computation
                tracing::debug!("password preparation failed, retrying with raw bytes");
                self.prepare = raw_password;
                match (self.prepare)(&self.password) {
                    Ok(bytes) => bytes,
                    Err(PrepError::InvalidEncoding) => self.password.as_bytes().to_vec(),
                }
            }
        }
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, String> {
        // server-first-message: r=<nonce>,s=<salt>,i=<iterations>
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse().ok();
            }
        }

        let combined_nonce = combined_nonce.ok_or("missing nonce in server-first-message")?;
        let salt_b64 = salt_b64.ok_or("missing salt in server-first-message")?;
        let iterations: u32 = iterations.ok_or("missing iterations in server-first-message")?;

        if !combined_nonce.starts_with(&self.nonce) {
            return Err("server nonce does not start with client nonce".to_string());
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| format!("invalid salt: {e}"))?;

        // SaltedPassword = Hi(prepare(password), salt, iterations)
        let password = self.prepared_password();
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&password, &salt, iterations, &mut salted_password);
        self.salted_password = Some(salted_password);

        // ClientKey = HMAC(SaltedPassword, "Client Key"); StoredKey = H(ClientKey)
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        // c=<base64(gs2-header || cb-data)>,r=<combined nonce>
        let mut cbind_input = self.gs2_header.as_bytes().to_vec();
        cbind_input.extend_from_slice(&self.cb_data);
        let client_final_without_proof =
            format!("c={},r={}", BASE64.encode(cbind_input), combined_nonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            client_final_without_proof
        );

        // ClientProof = ClientKey XOR HMAC(StoredKey, AuthMessage)
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        self.auth_message = Some(auth_message);

        let mut client_proof = [0u8; 32];
        for i in 0..32 {
            client_proof[i] = client_key[i] ^ client_signature[i];
        }

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        ))
    }

    /// Verify server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), String> {
        let server_signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or("invalid server-final-message format")?;

        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| format!("invalid server signature: {e}"))?;

        let salted_password = self.salted_password.ok_or("missing salted password")?;
        let auth_message = self.auth_message.as_ref().ok_or("missing auth message")?;

        // ServerSignature = HMAC(HMAC(SaltedPassword, "Server Key"), AuthMessage)
        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected.as_slice() {
            return Err("server signature verification failed".to_string());
        }

        Ok(())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|e| format!("HMAC error: {e}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

// === channel binding ===

// DER-encoded signature AlgorithmIdentifier OIDs that select a hash wider
// than SHA-256: sha384/sha512 with RSA, and ECDSA with SHA-384/SHA-512
const SHA384_SIGNATURE_OIDS: &[&[u8]] = &[
    &[0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0C],
    &[0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x03],
];
const SHA512_SIGNATURE_OIDS: &[&[u8]] = &[
    &[0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0D],
    &[0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x04],
];

/// Compute the RFC 5929 tls-server-end-point binding for a server
/// certificate: a digest of the DER bytes using the certificate's own
/// signature hash, where MD5 and SHA-1 (and anything unrecognized) map to
/// SHA-256.
///
/// The signature algorithm is located by scanning for its OID encoding;
/// the OID appears in the certificate only as its signature algorithm, so
/// a match is unambiguous.
pub fn tls_server_end_point(cert_der: &[u8]) -> Vec<u8> {
    use sha2::Sha384;
    use sha2::Sha512;

    let has_any = |oids: &[&[u8]]| {
        oids.iter()
            .any(|oid| memchr::memmem::find(cert_der, oid).is_some())
    };

    if has_any(SHA384_SIGNATURE_OIDS) {
        Sha384::digest(cert_der).to_vec()
    } else if has_any(SHA512_SIGNATURE_OIDS) {
        Sha512::digest(cert_der).to_vec()
    } else {
        Sha256::digest(cert_der).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password() {
        let result = md5_password("postgres", "password", &[0x01, 0x02, 0x03, 0x04]);
        assert!(result.starts_with("md5"));
        assert_eq!(result.len(), 35); // "md5" + 32 hex chars
    }

    #[test]
    fn test_password_message() {
        let mut buf = Vec::new();
        write_password(&mut buf, "secret");

        assert_eq!(buf[0], b'p');
        assert!(buf.ends_with(&[0]));
    }

    #[test]
    fn test_saslprep_plain() {
        assert_eq!(saslprep("secret").unwrap(), b"secret");
    }

    #[test]
    fn test_saslprep_maps_spaces_and_drops_soft_hyphen() {
        assert_eq!(saslprep("a\u{00A0}b").unwrap(), b"a b");
        assert_eq!(saslprep("pass\u{00AD}word").unwrap(), b"password");
    }

    #[test]
    fn test_saslprep_rejects_control_chars() {
        assert_eq!(saslprep("bad\u{0007}pwd"), Err(PrepError::InvalidEncoding));
    }

    #[test]
    fn test_scram_falls_back_to_raw_on_prohibited_output() {
        // a password with a control character cannot be SASL-prepped; the
        // client must still complete the exchange using the raw bytes
        let mut client = ScramClient::new("pwd\u{0001}");
        let first = client.client_first_message();
        assert!(first.starts_with("n,,n=,r="));

        let server_first = format!(
            "r={}srvnonce,s={},i=4096",
            &first["n,,n=,r=".len()..],
            BASE64.encode(b"salty")
        );
        let final_msg = client.process_server_first(&server_first).unwrap();
        assert!(final_msg.contains(",p="));
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut client = ScramClient::new("pw");
        let server_first = format!("r=somethingelse,s={},i=4096", BASE64.encode(b"salt"));
        assert!(client.process_server_first(&server_first).is_err());
    }

    #[test]
    fn test_channel_binding_header() {
        let client = ScramClient::new_with_channel_binding("pw", b"certhash");
        assert!(
            client
                .client_first_message()
                .starts_with("p=tls-server-end-point,,")
        );
    }

    #[test]
    fn test_prepare_strategy_is_injectable() {
        // the two strategies disagree on a password SASLprep would rewrite
        let password = "pass\u{00AD}word";
        assert_ne!(
            saslprep(password).unwrap(),
            raw_password(password).unwrap()
        );

        // an injected raw strategy still completes the exchange
        let mut client = ScramClient::new(password);
        client.set_prepare(raw_password);
        let first = client.client_first_message();
        let server_first = format!(
            "r={}srv,s={},i=4096",
            &first["n,,n=,r=".len()..],
            BASE64.encode(b"salt")
        );
        assert!(client.process_server_first(&server_first).is_ok());
    }

    #[test]
    fn test_tls_server_end_point_hash_selection() {
        // a blob carrying the sha384WithRSAEncryption OID hashes to 48 bytes
        let mut cert = b"certificate".to_vec();
        cert.extend_from_slice(SHA384_SIGNATURE_OIDS[0]);
        assert_eq!(tls_server_end_point(&cert).len(), 48);

        let mut cert = b"certificate".to_vec();
        cert.extend_from_slice(SHA512_SIGNATURE_OIDS[1]);
        assert_eq!(tls_server_end_point(&cert).len(), 64);

        // no recognized OID (covers MD5/SHA-1 signatures): SHA-256
        let digest = tls_server_end_point(b"certificate");
        assert_eq!(digest, Sha256::digest(b"certificate").to_vec());
    }
}
