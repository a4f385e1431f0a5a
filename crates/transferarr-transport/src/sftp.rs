//! SFTP transport backed by libssh2.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{ErrorCode, Session, Sftp};
use ssh2_config::{ParseRule, SshConfig};
use tracing::{debug, info};
use transferarr_config::SftpAddressing;

use crate::error::{TransportError, TransportResult};
use crate::{DirEntry, EntryMeta, Transport};

/// SFTP status for a path that does not exist.
const SFTP_NO_SUCH_FILE: i32 = 2;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How an SFTP session authenticates.
#[derive(Debug, Clone)]
pub enum SftpAuth {
    /// Password authentication.
    Password(String),
    /// Private-key authentication.
    PrivateKey(PathBuf),
}

/// Resolved connection settings for one SFTP host.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Account name.
    pub username: String,
    /// Authentication material.
    pub auth: SftpAuth,
    /// Timeout applied to connection setup and blocking calls.
    pub timeout: Duration,
}

impl SftpSettings {
    /// Resolve settings from a configuration descriptor. Alias addressing is
    /// resolved through the SSH client configuration file at build time so a
    /// bad alias fails fast instead of mid-copy.
    ///
    /// # Errors
    ///
    /// Returns an error when the alias cannot be resolved to a host, user,
    /// and key, or when credentials carry no usable authentication material.
    pub fn from_addressing(addressing: &SftpAddressing) -> TransportResult<Self> {
        match addressing {
            SftpAddressing::Credentials {
                host,
                port,
                username,
                password,
                private_key,
            } => {
                let auth = match (password, private_key) {
                    (_, Some(key)) => SftpAuth::PrivateKey(key.clone()),
                    (Some(password), None) => SftpAuth::Password(password.clone()),
                    (None, None) => {
                        return Err(TransportError::Auth {
                            host: host.clone(),
                            detail: "neither password nor private key configured".to_string(),
                        });
                    }
                };
                Ok(Self {
                    host: host.clone(),
                    port: *port,
                    username: username.clone(),
                    auth,
                    timeout: DEFAULT_TIMEOUT,
                })
            }
            SftpAddressing::Alias {
                ssh_config_file,
                ssh_config_host,
            } => resolve_alias(ssh_config_file.as_deref(), ssh_config_host),
        }
    }
}

fn resolve_alias(config_file: Option<&Path>, alias: &str) -> TransportResult<SftpSettings> {
    let path = config_file.map_or_else(default_ssh_config_path, Path::to_path_buf);
    debug!(alias, config = %path.display(), "resolving ssh alias");

    let file = File::open(&path).map_err(|err| TransportError::Alias {
        alias: alias.to_string(),
        detail: format!("cannot open {}: {err}", path.display()),
    })?;
    let mut reader = BufReader::new(file);
    let config = SshConfig::default()
        .parse(&mut reader, ParseRule::ALLOW_UNKNOWN_FIELDS)
        .map_err(|err| TransportError::Alias {
            alias: alias.to_string(),
            detail: format!("cannot parse {}: {err}", path.display()),
        })?;

    let params = config.query(alias);
    let username = params.user.ok_or_else(|| TransportError::Alias {
        alias: alias.to_string(),
        detail: "alias does not define a user".to_string(),
    })?;
    let key = params
        .identity_file
        .as_ref()
        .and_then(|keys| keys.first().cloned())
        .ok_or_else(|| TransportError::Alias {
            alias: alias.to_string(),
            detail: "alias does not define an identity file".to_string(),
        })?;

    Ok(SftpSettings {
        host: params.host_name.unwrap_or_else(|| alias.to_string()),
        port: params.port.unwrap_or(22),
        username,
        auth: SftpAuth::PrivateKey(key),
        timeout: DEFAULT_TIMEOUT,
    })
}

fn default_ssh_config_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(".ssh/config"),
        |home| PathBuf::from(home).join(".ssh").join("config"),
    )
}

struct LiveSession {
    _session: Session,
    sftp: Sftp,
}

/// Transport whose paths live behind an SFTP session.
///
/// The session is established lazily on first use and re-established by
/// [`Transport::reconnect`] after an I/O failure.
pub struct SftpTransport {
    settings: SftpSettings,
    live: Option<LiveSession>,
}

impl SftpTransport {
    /// A new transport; the session is opened on first operation.
    #[must_use]
    pub const fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            live: None,
        }
    }

    fn session_error(&self, err: &ssh2::Error) -> TransportError {
        TransportError::Session {
            host: self.settings.host.clone(),
            detail: err.to_string(),
        }
    }

    fn connect(settings: &SftpSettings) -> TransportResult<LiveSession> {
        let address = (settings.host.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|err| TransportError::Session {
                host: settings.host.clone(),
                detail: format!("address resolution failed: {err}"),
            })?
            .next()
            .ok_or_else(|| TransportError::Session {
                host: settings.host.clone(),
                detail: "host resolved to no addresses".to_string(),
            })?;

        let tcp = TcpStream::connect_timeout(&address, settings.timeout).map_err(|err| {
            TransportError::Session {
                host: settings.host.clone(),
                detail: format!("tcp connect failed: {err}"),
            }
        })?;

        let mut session = Session::new().map_err(|err| TransportError::Session {
            host: settings.host.clone(),
            detail: err.to_string(),
        })?;
        session.set_timeout(u32::try_from(settings.timeout.as_millis()).unwrap_or(30_000));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|err| TransportError::Session {
            host: settings.host.clone(),
            detail: format!("handshake failed: {err}"),
        })?;

        match &settings.auth {
            SftpAuth::Password(password) => session
                .userauth_password(&settings.username, password)
                .map_err(|err| TransportError::Auth {
                    host: settings.host.clone(),
                    detail: err.to_string(),
                })?,
            SftpAuth::PrivateKey(key) => session
                .userauth_pubkey_file(&settings.username, None, key, None)
                .map_err(|err| TransportError::Auth {
                    host: settings.host.clone(),
                    detail: err.to_string(),
                })?,
        }
        if !session.authenticated() {
            return Err(TransportError::Auth {
                host: settings.host.clone(),
                detail: "server rejected authentication".to_string(),
            });
        }

        let sftp = session.sftp().map_err(|err| TransportError::Session {
            host: settings.host.clone(),
            detail: format!("sftp channel failed: {err}"),
        })?;
        info!(host = %settings.host, port = settings.port, "sftp session established");
        Ok(LiveSession {
            _session: session,
            sftp,
        })
    }

    fn sftp(&mut self) -> TransportResult<&Sftp> {
        if self.live.is_none() {
            self.live = Some(Self::connect(&self.settings)?);
        }
        Ok(&self.live.as_ref().expect("session just established").sftp)
    }
}

impl Transport for SftpTransport {
    fn kind(&self) -> &'static str {
        "sftp"
    }

    fn stat(&mut self, path: &Path) -> TransportResult<Option<EntryMeta>> {
        let result = self.sftp()?.stat(path);
        match result {
            Ok(stat) => Ok(Some(EntryMeta {
                size: stat.size.unwrap_or(0),
                is_dir: stat.is_dir(),
            })),
            Err(err) if matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => Ok(None),
            Err(err) => Err(self.session_error(&err)),
        }
    }

    fn list_dir(&mut self, path: &Path) -> TransportResult<Vec<DirEntry>> {
        let result = self.sftp()?.readdir(path);
        let listing = result.map_err(|err| self.session_error(&err))?;
        let mut entries: Vec<DirEntry> = listing
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                entry_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .map(|name| DirEntry {
                        name,
                        is_dir: stat.is_dir(),
                        size: stat.size.unwrap_or(0),
                    })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_read(&mut self, path: &Path) -> TransportResult<Box<dyn Read + Send>> {
        let result = self.sftp()?.open(path);
        let file = result.map_err(|err| self.session_error(&err))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &Path) -> TransportResult<Box<dyn Write + Send>> {
        let result = self.sftp()?.create(path);
        let file = result.map_err(|err| self.session_error(&err))?;
        Ok(Box::new(file))
    }

    fn create_dir_all(&mut self, path: &Path) -> TransportResult<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if current.as_os_str().is_empty() || current == Path::new("/") {
                continue;
            }
            match self.stat(&current)? {
                Some(meta) if meta.is_dir => continue,
                Some(_) => {
                    return Err(TransportError::Session {
                        host: self.settings.host.clone(),
                        detail: format!("{} exists and is not a directory", current.display()),
                    });
                }
                None => {
                    let result = self.sftp()?.mkdir(&current, 0o755);
                    if let Err(err) = result {
                        // Another worker may have created it in between.
                        if self.stat(&current)?.is_none_or(|meta| !meta.is_dir) {
                            return Err(self.session_error(&err));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> TransportResult<()> {
        debug!(host = %self.settings.host, "re-establishing sftp session");
        self.live = None;
        self.sftp().map(|_| ())
    }
}
