use serde::Deserialize;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::receiver::error::ReceiverError;

// Top-level configuration file layout.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ConnectionSpec,
    #[serde(default)]
    pub receiver: ReceiverOptions,
}

/// Mailbox connection parameters. Constructed once by the config
/// loader, validated eagerly, and immutable afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSpec {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    pub username: String,
    pub password: String,
    /// Declared sender identity. Required by the configuration surface
    /// but not consumed by the fetch pipeline itself.
    pub from: String,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ReceiverOptions {
    #[serde(default)]
    pub max_results: Option<u32>,
}

fn default_port() -> u16 {
    993
}

fn default_use_ssl() -> bool {
    true
}

impl ConnectionSpec {
    /// Required-field check, run before any network I/O is attempted.
    pub fn validate(&self) -> Result<(), ReceiverError> {
        let required = [
            ("host", &self.host),
            ("username", &self.username),
            ("password", &self.password),
            ("from", &self.from),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ReceiverError::Configuration(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

pub fn load_settings(path: &Path) -> Result<Config, ReceiverError> {
    let file = File::open(path).map_err(|e| {
        ReceiverError::Configuration(format!("cannot open settings file {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);

    let config: Config = serde_yaml::from_reader(reader).map_err(|e| {
        ReceiverError::Configuration(format!(
            "cannot parse settings file {}: {}",
            path.display(),
            e
        ))
    })?;
    config.imap.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(host: &str, username: &str, password: &str, from: &str) -> ConnectionSpec {
        ConnectionSpec {
            host: host.to_string(),
            port: 993,
            use_ssl: true,
            username: username.to_string(),
            password: password.to_string(),
            from: from.to_string(),
        }
    }

    #[test]
    fn port_and_ssl_default_when_omitted() {
        let yaml = "imap:\n  host: imap.example.com\n  username: user\n  password: secret\n  from: user@example.com\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.imap.port, 993);
        assert!(config.imap.use_ssl);
        assert_eq!(config.receiver.max_results, None);
    }

    #[test]
    fn explicit_values_are_kept() {
        let yaml = "imap:\n  host: mail.example.com\n  port: 143\n  use_ssl: false\n  username: user\n  password: secret\n  from: user@example.com\nreceiver:\n  max_results: 25\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.imap.port, 143);
        assert!(!config.imap.use_ssl);
        assert_eq!(config.receiver.max_results, Some(25));
    }

    #[test]
    fn empty_required_fields_fail_validation() {
        for bad in [
            spec("", "user", "secret", "user@example.com"),
            spec("imap.example.com", "", "secret", "user@example.com"),
            spec("imap.example.com", "user", "", "user@example.com"),
            spec("imap.example.com", "user", "secret", ""),
        ] {
            assert!(matches!(
                bad.validate(),
                Err(ReceiverError::Configuration(_))
            ));
        }
    }

    #[test]
    fn complete_spec_passes_validation() {
        let good = spec("imap.example.com", "user", "secret", "user@example.com");
        assert!(good.validate().is_ok());
    }
}
