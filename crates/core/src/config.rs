//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the
//! services; no environment variables are read during request handling. The
//! store and the mail transport are explicitly owned resources injected at
//! construction time, not process-wide globals.

use std::path::{Path, PathBuf};

use crate::{ServiceError, ServiceResult};

/// SMTP transport settings for the plan-by-mail notifier.
#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Urgencias <urgencias@hospital.example>`.
    pub from_address: String,
}

/// Configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_path: PathBuf,
    smtp: Option<SmtpSettings>,
}

impl CoreConfig {
    /// Creates a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if SMTP settings are present but
    /// incomplete (blank host or sender address).
    pub fn new(database_path: PathBuf, smtp: Option<SmtpSettings>) -> ServiceResult<Self> {
        if let Some(settings) = &smtp {
            if settings.host.trim().is_empty() || settings.from_address.trim().is_empty() {
                return Err(ServiceError::Validation(
                    "la configuración SMTP requiere host y remitente".into(),
                ));
            }
        }

        Ok(Self {
            database_path,
            smtp,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// SMTP settings, or `None` when mail delivery is not configured.
    pub fn smtp(&self) -> Option<&SmtpSettings> {
        self.smtp.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_without_smtp_is_valid() {
        let cfg = CoreConfig::new(PathBuf::from("urgencias.db"), None).expect("should build");
        assert!(cfg.smtp().is_none());
        assert_eq!(cfg.database_path(), Path::new("urgencias.db"));
    }

    #[test]
    fn test_config_rejects_blank_smtp_host() {
        let err = CoreConfig::new(
            PathBuf::from("urgencias.db"),
            Some(SmtpSettings {
                host: "   ".into(),
                port: 587,
                username: None,
                password: None,
                from_address: "urgencias@hospital.example".into(),
            }),
        )
        .expect_err("blank host should be rejected");

        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
