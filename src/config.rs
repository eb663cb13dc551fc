//! Worker configuration (ambient, §2.1/§6): MIME whitelist, the
//! key/validator table, the debug body-logging flag, and the FastCGI
//! control socket path.
//!
//! Grounded on the teacher's `UploadedRegionInfo::parse` /
//! `uploadimpostor.rs::AssetUploadArray` pattern: a small `Deserialize`
//! struct loaded with `serde_json::from_str`.

use anyhow::Error;
use serde::Deserialize;

/// One entry of the key/validator table loaded from config: a key name and
/// the name of the stock validator to run against it (resolved to a
/// function pointer by [`WorkerConfig::validator_table`]).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidatorEntry {
    pub key: String,
    pub validator: String,
}

/// Runtime knobs for one worker invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerConfig {
    /// Content types recognized for `content-type-index` resolution.
    #[serde(default)]
    pub mime_whitelist: Vec<String>,
    /// Per-key validators to run during validator dispatch (§4.9).
    #[serde(default)]
    pub validators: Vec<ValidatorEntry>,
    /// When set, bodies are hex-escaped and logged to standard error (§6).
    #[serde(default)]
    pub debug_log_bodies: bool,
    /// FastCGI mode only: path to the control socket. `None` means CGI mode.
    #[serde(default)]
    pub fastcgi_socket_path: Option<String>,
}

impl WorkerConfig {
    /// Parse a `WorkerConfig` from a JSON sidecar file's contents.
    pub fn parse(s: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(s)?)
    }

    /// Resolve `validators` into the [`crate::validate::FieldValidator`]
    /// table the dispatch loop consumes, dropping any entry naming an
    /// unrecognized validator (logged).
    pub fn validator_table(&self) -> Vec<crate::validate::FieldValidator> {
        self.validators
            .iter()
            .filter_map(|entry| {
                let validator: crate::validate::Validator = match entry.validator.as_str() {
                    "string" => crate::validate::valid_string,
                    "stringne" => crate::validate::valid_stringne,
                    "email" => crate::validate::valid_email,
                    "int" => crate::validate::valid_int,
                    "uint" => crate::validate::valid_uint,
                    "double" => crate::validate::valid_double,
                    "udouble" => crate::validate::valid_udouble,
                    "date" => crate::validate::valid_date,
                    other => {
                        log::warn!("unknown validator name in config: {other}");
                        return None;
                    }
                };
                Some(crate::validate::FieldValidator { key: entry.key.clone().into_bytes(), validator })
            })
            .collect()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mime_whitelist: Vec::new(),
            validators: Vec::new(),
            debug_log_bodies: false,
            fastcgi_socket_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_json() {
        let cfg = WorkerConfig::parse(r#"{"mime_whitelist": ["text/plain"]}"#).unwrap();
        assert_eq!(cfg.mime_whitelist, vec!["text/plain".to_string()]);
        assert!(!cfg.debug_log_bodies);
    }

    #[test]
    fn resolves_validator_table_skipping_unknown_names() {
        let cfg = WorkerConfig {
            validators: vec![
                ValidatorEntry { key: "age".to_string(), validator: "uint".to_string() },
                ValidatorEntry { key: "mystery".to_string(), validator: "no-such-thing".to_string() },
            ],
            ..Default::default()
        };
        let table = cfg.validator_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].key, b"age".to_vec());
    }
}
