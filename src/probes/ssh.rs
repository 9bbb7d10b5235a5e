use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::Disconnect;
use russh_keys::key::PublicKey;
use tokio::time::timeout_at;
use tracing::debug;

use super::helper::{connect_with_deadline, Deadline};
use super::Probe;
use crate::error::ProbeError;
use crate::types::{Credentials, Evidence, ProbeResult, Target};

/// Bound on keyboard-interactive rounds before giving up on a chatty server.
const MAX_INTERACTIVE_ROUNDS: usize = 4;

/// Transport handshake, authentication and one session channel. No command runs.
pub struct SshProbe;

struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait]
impl Probe for SshProbe {
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeResult {
        let credentials = target
            .credentials
            .clone()
            .ok_or_else(|| ProbeError::Protocol("no credentials supplied".to_string()))?;
        let deadline = Deadline::after(timeout);
        match timeout_at(deadline.instant(), session_check(target, &credentials, deadline)).await {
            Ok(res) => res,
            Err(_) => Err(ProbeError::timeout("ssh session", timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

async fn session_check(target: &Target, credentials: &Credentials, deadline: Deadline) -> ProbeResult {
    let stream = connect_with_deadline(&target.host, target.port, deadline).await?;
    let config = Arc::new(client::Config {
        inactivity_timeout: Some(deadline.budget()),
        ..Default::default()
    });
    let mut handle = client::connect_stream(config, stream, AcceptAnyHostKey)
        .await
        .map_err(|e| ProbeError::Protocol(format!("handshake: {}", e)))?;

    let method = authenticate(&mut handle, credentials).await?;
    debug!(target = %target, method, "Authenticated to SSH server");

    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ProbeError::Protocol(format!("open session: {}", e)))?;
    let _ = channel.close().await;
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await;

    Ok(Evidence::new("ssh", target)
        .with_line("auth", method)
        .with_line("session", "opened"))
}

/// Keyboard-interactive first, answering every prompt with the password
/// captured for this call, then plain password authentication.
async fn authenticate(
    handle: &mut client::Handle<AcceptAnyHostKey>,
    credentials: &Credentials,
) -> Result<&'static str, ProbeError> {
    let auth_err = |e: russh::Error| ProbeError::Protocol(format!("authentication: {}", e));

    let mut response = handle
        .authenticate_keyboard_interactive_start(credentials.username.clone(), None::<String>)
        .await
        .map_err(auth_err)?;
    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok("keyboard-interactive"),
            KeyboardInteractiveAuthResponse::Failure => break,
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers = prompts.iter().map(|_| credentials.password.clone()).collect();
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(auth_err)?;
            }
        }
    }

    let accepted = handle
        .authenticate_password(credentials.username.clone(), credentials.password.clone())
        .await
        .map_err(auth_err)?;
    if accepted {
        Ok("password")
    } else {
        Err(ProbeError::Protocol(format!(
            "authentication rejected for user {}",
            credentials.username
        )))
    }
}
