// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push the public key into every database pod's authorized keys

use tracing::{debug, info, warn};

use crate::cluster::{ClusterMember, RemoteShell};
use crate::context::RetrySettings;
use crate::error::{ClusterError, Result, ServicesError};

/// Directory holding the authorized keys inside a database pod
pub const SSH_DIR: &str = "/var/lib/cassandra/data/.ssh";

/// Ordered commands installing `public_key` as the only authorized key
pub fn authorized_keys_commands(public_key: &str) -> Vec<String> {
    let authorized_keys = format!("{}/authorized_keys", SSH_DIR);
    vec![
        format!("mkdir -p {}/", SSH_DIR),
        format!("rm -rf {}", authorized_keys),
        format!("echo '{}' > {}", public_key, authorized_keys),
        format!("chmod -R 700 {}", SSH_DIR),
        format!("chmod 600 {}", authorized_keys),
    ]
}

/// Install the key on every member, one member at a time
///
/// Each member gets `tries_count` attempts at the whole command sequence. A
/// member that runs out of attempts fails the propagation, and members after
/// it are left untouched.
pub async fn propagate(
    shell: &dyn RemoteShell,
    members: &[ClusterMember],
    public_key: &str,
    retry: RetrySettings,
) -> Result<()> {
    if members.is_empty() {
        debug!("No cluster members to propagate keys to");
        return Ok(());
    }

    let commands = authorized_keys_commands(public_key);
    let tries = retry.tries_count.max(1);

    for member in members {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match run_sequence(shell, member, &commands).await {
                Ok(()) => break,
                Err((command, e)) if attempt >= tries => {
                    return Err(ServicesError::PropagationExhausted {
                        member: member.name.clone(),
                        attempts: attempt,
                        command: redact(command, public_key),
                        message: e.to_string(),
                    });
                }
                Err((command, e)) => {
                    warn!(
                        member = %member.name,
                        attempt,
                        tries,
                        command = %redact(command, public_key),
                        error = %e,
                        "Authorized keys command failed, trying again"
                    );
                    if !retry.retry_timeout.is_zero() {
                        tokio::time::sleep(retry.retry_timeout).await;
                    }
                }
            }
        }

        debug!(member = %member.name, attempts = attempt, "Authorized keys propagated");
    }

    info!(members = members.len(), "Backup keys propagated to all cluster members");
    Ok(())
}

/// Run every command in order, stopping at the first failure
async fn run_sequence<'c>(
    shell: &dyn RemoteShell,
    member: &ClusterMember,
    commands: &'c [String],
) -> std::result::Result<(), (&'c str, ClusterError)> {
    for command in commands {
        shell
            .exec(member, command)
            .await
            .map_err(|e| (command.as_str(), e))?;
    }
    Ok(())
}

fn redact(command: &str, public_key: &str) -> String {
    if public_key.is_empty() {
        command.to_string()
    } else {
        command.replace(public_key, "<public key>")
    }
}
