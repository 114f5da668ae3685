use anyhow::Context;
use neoom_connect::config::{ENV_BEAAM_KEY, ENV_CLOUD_TOKEN};
use neoom_connect::{Connection, ConnectionConfig, Entity, UpdateStatus};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting neoom connect");
    let config = ConnectionConfig::from_env().context("Reading configuration from environment")?;
    let connection = Connection::setup(config)
        .await
        .context("Connecting to the Ntuity cloud")?;

    let mut cloud_updates = connection.cloud().subscribe();
    let mut local_updates = connection.local().subscribe();
    let mut local_status = connection.local().subscribe_status();
    let mut cloud_status = connection.cloud().subscribe_status();
    log_states(&connection);

    loop {
        tokio::select! {
            changed = cloud_updates.changed() => {
                if changed.is_err() {
                    break;
                }
                log_states(&connection);
            }
            changed = local_updates.changed() => {
                if changed.is_err() {
                    break;
                }
                log_states(&connection);
            }
            changed = local_status.changed() => {
                if changed.is_err() {
                    break;
                }
                warn_if_halted(&local_status.borrow_and_update(), ENV_BEAAM_KEY);
            }
            changed = cloud_status.changed() => {
                if changed.is_err() {
                    break;
                }
                warn_if_halted(&cloud_status.borrow_and_update(), ENV_CLOUD_TOKEN);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    connection.teardown().await;
    Ok(())
}

/// Hint for the operator once a coordinator stopped on rejected credentials
fn halt_hint(status: &UpdateStatus, credential: &str) -> Option<String> {
    match status {
        UpdateStatus::AuthInvalid(reason) => {
            Some(format!("{reason}; set a new {credential} and restart"))
        }
        _ => None,
    }
}

fn warn_if_halted(status: &UpdateStatus, credential: &str) {
    if let Some(hint) = halt_hint(status, credential) {
        warn!("{hint}");
    }
}

fn log_states(connection: &Connection) {
    let cloud = connection.cloud().data();
    let local = connection.local().data();
    let states = local.as_ref().map(|snapshot| &snapshot.states);

    for entity in connection.entities() {
        let kind = match entity {
            Entity::Cloud(_) | Entity::Sensor(_) => "sensor",
            Entity::Number(_) => "number",
            Entity::Select(_) => "select",
        };
        info!(
            "{kind} {} ({}): {}",
            entity.name(),
            entity.unique_id(),
            entity.state(cloud.as_deref(), states)
        );
    }
}
