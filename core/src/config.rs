//! Configuration management for registration services.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::RegistrationError;
use crate::workflow::{Workflow, WorkflowConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub database: DatabaseConfig,
    /// Registration rules configuration
    pub registration: RegistrationConfig,
    /// Log filter directive (`RUST_LOG`)
    pub log_level: String,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL; `None` selects the in-memory store
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Registration rules configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Id of the workflow to enforce
    pub workflow_id: String,
    /// Optional TOML file holding the workflow definition
    pub workflow_file: Option<PathBuf>,
    /// Forbid principals from completing their own registrations
    pub prevent_complete_own: bool,
    /// Include the waitlist status in the standard workflow
    pub waitlist_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
                max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            registration: RegistrationConfig {
                workflow_id: lookup("REGISTRATION_WORKFLOW_ID")
                    .unwrap_or_else(|| WorkflowConfig::DEFAULT_ID.to_string()),
                workflow_file: lookup("REGISTRATION_WORKFLOW_FILE").map(PathBuf::from),
                prevent_complete_own: lookup("REGISTRATION_PREVENT_COMPLETE_OWN")
                    .and_then(|s| parse_flag(&s))
                    .unwrap_or(false),
                waitlist_enabled: lookup("REGISTRATION_WAITLIST_ENABLED")
                    .and_then(|s| parse_flag(&s))
                    .unwrap_or(true),
            },
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "registration=info".to_string()),
        }
    }
}

impl RegistrationConfig {
    /// Load and compile the configured workflow.
    ///
    /// Without a workflow file only the standard workflow id is known.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::MissingWorkflow`] if the file cannot be
    /// read or does not define the configured id, and
    /// [`RegistrationError::InvalidWorkflow`] if the definition is invalid.
    pub fn load_workflow(&self) -> Result<Workflow, RegistrationError> {
        let Some(path) = &self.workflow_file else {
            if self.workflow_id == WorkflowConfig::DEFAULT_ID {
                return Ok(Workflow::standard(self.waitlist_enabled));
            }
            return Err(RegistrationError::MissingWorkflow(self.workflow_id.clone()));
        };

        let source = std::fs::read_to_string(path).map_err(|e| {
            RegistrationError::MissingWorkflow(format!("{}: {e}", path.display()))
        })?;
        let config = WorkflowConfig::from_toml_str(&source)?;
        if config.id != self.workflow_id {
            return Err(RegistrationError::MissingWorkflow(format!(
                "{} (found '{}' in {})",
                self.workflow_id,
                config.id,
                path.display()
            )));
        }

        let workflow = Workflow::compile(config)?;
        tracing::info!(
            workflow_id = workflow.id(),
            path = %path.display(),
            transitions = workflow.transitions().len(),
            "Loaded registration workflow"
        );
        Ok(workflow)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.registration.workflow_id, "registration");
        assert!(config.registration.waitlist_enabled);
        assert!(!config.registration.prevent_complete_own);
        assert_eq!(config.log_level, "registration=info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/registration"),
            ("DATABASE_MAX_CONNECTIONS", "3"),
            ("REGISTRATION_PREVENT_COMPLETE_OWN", "yes"),
            ("REGISTRATION_WAITLIST_ENABLED", "0"),
        ]));
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/registration")
        );
        assert_eq!(config.database.max_connections, 3);
        assert!(config.registration.prevent_complete_own);
        assert!(!config.registration.waitlist_enabled);
    }

    #[test]
    fn test_unknown_workflow_without_file_is_missing() {
        let config = Config::from_lookup(lookup(&[("REGISTRATION_WORKFLOW_ID", "seminar")]));
        let error = config.registration.load_workflow().unwrap_err();
        assert!(matches!(error, RegistrationError::MissingWorkflow(_)));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_standard_workflow_follows_waitlist_flag() {
        let config = Config::from_lookup(lookup(&[("REGISTRATION_WAITLIST_ENABLED", "false")]));
        let workflow = config.registration.load_workflow().unwrap();
        assert!(!workflow.waitlist_enabled());
    }

    #[test]
    fn test_workflow_file_is_loaded_and_validated() {
        let dir =
            std::env::temp_dir().join(format!("registration-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let valid = dir.join("valid.toml");
        std::fs::write(
            &valid,
            r#"
id = "seminar"
label = "Seminar"

[[transition]]
id = "confirm"
label = "Confirm"
from = ["pending"]
to = "complete"
"#,
        )
        .unwrap();
        let registration = RegistrationConfig {
            workflow_id: "seminar".to_string(),
            workflow_file: Some(valid),
            prevent_complete_own: false,
            waitlist_enabled: true,
        };
        let workflow = registration.load_workflow().unwrap();
        assert_eq!(workflow.permission_for("confirm"), Some("use seminar confirm transition"));

        let invalid = dir.join("invalid.toml");
        std::fs::write(
            &invalid,
            r#"
id = "seminar"
label = "Seminar"

[[transition]]
id = "reopen"
label = "Reopen"
from = ["canceled"]
to = "pending"
"#,
        )
        .unwrap();
        let registration = RegistrationConfig {
            workflow_file: Some(invalid),
            ..registration
        };
        assert!(matches!(
            registration.load_workflow(),
            Err(RegistrationError::InvalidWorkflow(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
