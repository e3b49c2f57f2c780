//! SRP-6a handshake driver over the ACP message layer.
//!
//! Four `Auth` messages carry CFL dictionaries:
//!
//! ```text
//! -> {state: 1, username: "admin"}
//! <- {salt, generator, publicKey, modulus}
//! -> {iv, publicKey, state: 3, response: M1}
//! <- {response: M2, iv}
//! ```
//!
//! A verified M2 installs the encryption context before the next outbound
//! byte; a mismatch leaves the session unencrypted so the caller can retry
//! with another password.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use acp_codec::cflbinary::{self, Value};
use acp_codec::message::Message;
use acp_core::error::{AuthError, ProtocolError, Result};
use acp_crypto::srp::{self, SrpChallenge, SrpClient};
use acp_crypto::stream::EncryptionContext;

use crate::session::Session;

pub(crate) async fn run_handshake(session: &Session, password: &str) -> Result<()> {
    let password = password.to_string();
    session
        .exchange(move |mut handle| async move {
            let hello = Value::Dict(vec![
                ("state".to_string(), Value::Int(1)),
                ("username".to_string(), Value::String("admin".to_string())),
            ]);
            let request = Message::auth(&password, cflbinary::compose(&hello));
            handle.send(&request.compose()).await?;

            let reply = handle.receive_message().await?;
            if reply.error_code != 0 {
                return Err(ProtocolError {
                    code: reply.error_code,
                }
                .into());
            }
            let challenge = cflbinary::parse(&reply.body.unwrap_or_default())?;
            expect_state(&challenge, 2)?;

            let modulus = data_field(&challenge, "modulus")?;
            if modulus != srp::modulus_bytes() {
                return Err(AuthError::WrongModulus.into());
            }
            let generator = data_field(&challenge, "generator")?;
            if !srp::is_expected_generator(&generator) {
                return Err(AuthError::WrongGenerator.into());
            }

            let client = SrpClient::new(password.as_bytes());
            let proof = client.process_challenge(&SrpChallenge {
                salt: data_field(&challenge, "salt")?,
                server_public_key: data_field(&challenge, "publicKey")?,
            })?;

            let mut client_iv = [0u8; 16];
            OsRng.fill_bytes(&mut client_iv);
            let response = Value::Dict(vec![
                ("iv".to_string(), Value::Data(client_iv.to_vec())),
                ("publicKey".to_string(), Value::Data(client.public_key())),
                ("state".to_string(), Value::Int(3)),
                (
                    "response".to_string(),
                    Value::Data(proof.client_proof.clone()),
                ),
            ]);
            let request = Message::auth(&password, cflbinary::compose(&response));
            handle.send(&request.compose()).await?;

            let reply = handle.receive_message().await?;
            if reply.error_code != 0 {
                return Err(ProtocolError {
                    code: reply.error_code,
                }
                .into());
            }
            let confirmation = cflbinary::parse(&reply.body.unwrap_or_default())?;
            let server_proof = data_field(&confirmation, "response")?;
            if !client.verify_server_proof(&server_proof, &proof.expected_server_proof) {
                return Err(AuthError::ProofMismatch.into());
            }

            let server_iv: [u8; 16] = data_field(&confirmation, "iv")?
                .try_into()
                .map_err(|_| AuthError::MalformedField("iv"))?;

            handle.enable_encryption(EncryptionContext::new(
                &proof.shared_secret,
                client_iv,
                server_iv,
            ))?;
            debug!("authenticated; session encryption installed");
            Ok(())
        })
        .await
}

fn data_field(value: &Value, key: &'static str) -> Result<Vec<u8>> {
    value
        .get(key)
        .and_then(Value::as_data)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| AuthError::MissingField(key).into())
}

fn expect_state(value: &Value, expected: u64) -> Result<()> {
    if let Some(state) = value.get("state").and_then(Value::as_int) {
        if state as u64 != expected {
            return Err(AuthError::UnexpectedState {
                expected,
                got: state as u64,
            }
            .into());
        }
    }
    Ok(())
}
