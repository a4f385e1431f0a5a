//! Cross-field validation applied after parsing.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{Config, ConnectionConfig, DownloadClientConfig, MediaManagerConfig};

const SUPPORTED_CLIENT_KIND: &str = "deluge";
const SUPPORTED_CONNECTION_KIND: &str = "web";

/// Validate references and required values across the configuration tree.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    for manager in &config.media_managers {
        validate_manager(manager)?;
    }
    for (name, client) in &config.download_clients {
        validate_client(name, client)?;
    }
    for (name, connection) in &config.connections {
        validate_connection(config, name, connection)?;
    }
    for (field, value) in [
        ("tick_interval_secs", config.tunables.tick_interval_secs),
        ("call_timeout_secs", config.tunables.call_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidField {
                section: "tunables".to_string(),
                field: field.to_string(),
                value: Some(value.to_string()),
                reason: "value must be positive",
            });
        }
    }
    if config.tunables.transfer_workers == 0 {
        return Err(ConfigError::InvalidField {
            section: "tunables".to_string(),
            field: "transfer_workers".to_string(),
            value: Some("0".to_string()),
            reason: "value must be positive",
        });
    }
    Ok(())
}

fn validate_manager(manager: &MediaManagerConfig) -> ConfigResult<()> {
    ensure_filled("media_managers", "host", &manager.host)?;
    ensure_filled("media_managers", "api_key", &manager.api_key)
}

fn validate_client(name: &str, client: &DownloadClientConfig) -> ConfigResult<()> {
    let section = format!("download_clients.{name}");
    if client.kind != SUPPORTED_CLIENT_KIND {
        return Err(ConfigError::InvalidField {
            section,
            field: "kind".to_string(),
            value: Some(client.kind.clone()),
            reason: "unsupported download client kind",
        });
    }
    if client.connection_kind != SUPPORTED_CONNECTION_KIND {
        return Err(ConfigError::InvalidField {
            section,
            field: "connection_kind".to_string(),
            value: Some(client.connection_kind.clone()),
            reason: "unsupported connection kind",
        });
    }
    ensure_filled(&section, "host", &client.host)?;
    if client.port == 0 {
        return Err(ConfigError::InvalidField {
            section,
            field: "port".to_string(),
            value: Some(client.port.to_string()),
            reason: "port must be non-zero",
        });
    }
    Ok(())
}

fn validate_connection(
    config: &Config,
    name: &str,
    connection: &ConnectionConfig,
) -> ConfigResult<()> {
    let section = format!("connections.{name}");
    if connection.from == connection.to {
        return Err(ConfigError::InvalidField {
            section,
            field: "to".to_string(),
            value: Some(connection.to.clone()),
            reason: "a connection cannot route an endpoint to itself",
        });
    }
    for (field, endpoint) in [("from", &connection.from), ("to", &connection.to)] {
        if !config.download_clients.contains_key(endpoint) {
            return Err(ConfigError::UnknownReference {
                section,
                field: field.to_string(),
                value: endpoint.clone(),
            });
        }
    }
    for (field, value) in [
        ("source_metainfo_dir", &connection.source_metainfo_dir),
        ("source_payload_dir", &connection.source_payload_dir),
        ("target_metainfo_tmp_dir", &connection.target_metainfo_tmp_dir),
        ("target_payload_dir", &connection.target_payload_dir),
    ] {
        ensure_filled(&section, field, value)?;
    }
    Ok(())
}

fn ensure_filled(section: &str, field: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            section: section.to_string(),
            field: field.to_string(),
            value: None,
            reason: "value must not be empty",
        });
    }
    Ok(())
}
