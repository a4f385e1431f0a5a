//! JSON file loading for the configuration tree.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::Config;
use crate::validate::validate_config;

/// Load and validate a configuration file.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not valid JSON, or
/// fails cross-field validation.
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_config(&config)?;
    info!(
        path = %path.display(),
        managers = config.media_managers.len(),
        clients = config.download_clients.len(),
        connections = config.connections.len(),
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_document() -> serde_json::Value {
        serde_json::json!({
            "media_managers": [
                {"kind": "movies", "host": "localhost", "port": 7878, "api_key": "abc"}
            ],
            "download_clients": {
                "src": {
                    "kind": "deluge", "connection_kind": "web",
                    "host": "127.0.0.1", "port": 8112, "password": "deluge"
                },
                "dst": {
                    "kind": "deluge", "connection_kind": "web",
                    "host": "10.0.0.2", "port": 8112, "password": "deluge"
                }
            },
            "connections": {
                "main": {
                    "from": "src", "to": "dst",
                    "transfer_config": {
                        "from": {"kind": "local"},
                        "to": {"kind": "sftp", "sftp": {"host": "10.0.0.2", "username": "sb", "password": "pw"}}
                    },
                    "source_metainfo_dir": "/var/lib/deluge/state",
                    "source_payload_dir": "/downloads",
                    "target_metainfo_tmp_dir": "/tmp/metainfo",
                    "target_payload_dir": "/data/downloads"
                }
            }
        })
    }

    fn write_config(dir: &TempDir, document: &serde_json::Value) -> std::path::PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, serde_json::to_string_pretty(document).expect("encode"))
            .expect("write config");
        path
    }

    #[test]
    fn loads_a_complete_document() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, &sample_document());

        let config = load_config(&path).expect("config should load");
        assert_eq!(config.download_clients.len(), 2);
        assert_eq!(config.connections["main"].from, "src");
        assert_eq!(config.tunables.transfer_workers, 3);
        assert!(config.history.enabled);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = load_config(&dir.path().join("absent.json")).expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_config(&path).expect_err("bad json");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn self_referencing_connection_is_rejected() {
        let mut document = sample_document();
        document["connections"]["main"]["to"] = serde_json::json!("src");
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, &document);
        let err = load_config(&path).expect_err("from == to");
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn dangling_endpoint_reference_is_rejected() {
        let mut document = sample_document();
        document["connections"]["main"]["to"] = serde_json::json!("nowhere");
        let dir = TempDir::new().expect("tempdir");
        let path = write_config(&dir, &document);
        let err = load_config(&path).expect_err("unknown endpoint");
        assert!(matches!(err, ConfigError::UnknownReference { .. }));
    }
}
