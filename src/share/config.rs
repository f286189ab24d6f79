//! Configuration resolution for the sharing server.
//!
//! Values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided command line value (highest priority)
//! 2. **Environment Variable** - Value from environment variable (or `.env`)
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SHARESSH_PORT` | 2222 | Listening port |
//! | `SHARESSH_BIND` | 0.0.0.0 | Listening address |
//! | `SHARESSH_SHELL` | `$SHELL`, then `bash` | Shell started for each session |
//! | `SHARESSH_KEYS_URL` | `https://github.com` | Base URL serving `<account>.keys` |
//! | `SHARESSH_HOST_KEY` | unset | OpenSSH private key used as host key |
//! | `SHARESSH_DEBUG` | false | Enable debug logging |
//!
//! The resolved values end up in a [`ServerConfig`], built once at startup and
//! handed to [`crate::share::server::serve`].

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::share::error::ShareError;

/// Default listening port
pub(crate) const DEFAULT_PORT: u16 = 2222;

/// Default listening address (all interfaces)
pub(crate) const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Shell used when neither a parameter nor `SHARESSH_SHELL`/`SHELL` is set
pub(crate) const DEFAULT_SHELL: &str = "bash";

/// Host serving `<account>.keys`
pub(crate) const DEFAULT_KEYS_URL: &str = "https://github.com";

/// Environment variable name for the listening port
pub(crate) const PORT_ENV_VAR: &str = "SHARESSH_PORT";

/// Environment variable name for the listening address
pub(crate) const BIND_ENV_VAR: &str = "SHARESSH_BIND";

/// Environment variable name for the shell program
pub(crate) const SHELL_ENV_VAR: &str = "SHARESSH_SHELL";

/// The invoking user's login shell
pub(crate) const LOGIN_SHELL_ENV_VAR: &str = "SHELL";

/// Environment variable name for the key list base URL
pub(crate) const KEYS_URL_ENV_VAR: &str = "SHARESSH_KEYS_URL";

/// Environment variable name for the host key path
pub(crate) const HOST_KEY_ENV_VAR: &str = "SHARESSH_HOST_KEY";

/// Environment variable name for debug logging
pub(crate) const DEBUG_ENV_VAR: &str = "SHARESSH_DEBUG";

/// Where the server's host key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeySource {
    /// A fresh Ed25519 key generated for this run only.
    Ephemeral,
    /// An OpenSSH private key file without passphrase.
    File(PathBuf),
}

/// Everything the listener needs, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// GitHub account whose published keys may connect.
    pub account: String,
    pub bind_address: String,
    pub port: u16,
    /// Program launched inside each session's PTY.
    pub shell: String,
    pub host_key: HostKeySource,
}

impl ServerConfig {
    /// Socket address to bind, from `bind_address` and `port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ShareError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ShareError::Address(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Resolve the listening port with priority: parameter -> env var -> default
pub fn resolve_port(port_param: Option<u16>) -> u16 {
    // Priority 1: Use parameter if provided
    if let Some(port) = port_param {
        return port;
    }

    // Priority 2: Use environment variable if set
    if let Ok(env_port) = env::var(PORT_ENV_VAR)
        && let Ok(port) = env_port.parse::<u16>()
    {
        return port;
    }

    // Priority 3: Default value
    DEFAULT_PORT
}

/// Resolve the listening address with priority: parameter -> env var -> default
pub fn resolve_bind_address(bind_param: Option<String>) -> String {
    if let Some(bind) = bind_param {
        return bind;
    }

    if let Ok(env_bind) = env::var(BIND_ENV_VAR)
        && !env_bind.trim().is_empty()
    {
        return env_bind.trim().to_string();
    }

    DEFAULT_BIND_ADDRESS.to_string()
}

/// Resolve the shell program with priority: parameter -> `SHARESSH_SHELL` ->
/// `SHELL` -> `bash`
pub fn resolve_shell(shell_param: Option<String>) -> String {
    if let Some(shell) = shell_param {
        return shell;
    }

    for var in [SHELL_ENV_VAR, LOGIN_SHELL_ENV_VAR] {
        if let Ok(shell) = env::var(var)
            && !shell.trim().is_empty()
        {
            return shell;
        }
    }

    DEFAULT_SHELL.to_string()
}

/// Resolve the key list base URL with priority: parameter -> env var ->
/// default. Trailing slashes are stripped so the account can be appended.
pub fn resolve_keys_url(url_param: Option<String>) -> String {
    let url = url_param
        .or_else(|| env::var(KEYS_URL_ENV_VAR).ok())
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_KEYS_URL.to_string());

    url.trim().trim_end_matches('/').to_string()
}

/// Resolve the host key source with priority: parameter -> env var ->
/// ephemeral key
pub fn resolve_host_key(path_param: Option<PathBuf>) -> HostKeySource {
    if let Some(path) = path_param {
        return HostKeySource::File(path);
    }

    match env::var(HOST_KEY_ENV_VAR) {
        Ok(path) if !path.trim().is_empty() => HostKeySource::File(PathBuf::from(path)),
        _ => HostKeySource::Ephemeral,
    }
}

/// Resolve debug logging: the flag wins when set, otherwise env var -> false
pub fn resolve_debug(debug_flag: bool) -> bool {
    if debug_flag {
        return true;
    }

    if let Ok(env_debug) = env::var(DEBUG_ENV_VAR) {
        return env_debug.eq_ignore_ascii_case("true") || env_debug == "1";
    }

    false
}
