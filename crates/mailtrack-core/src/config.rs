//! Handler configuration.

use crate::attributes::AttributeMap;
use crate::error::ConfigError;
use crate::identity::AccountLimits;
use crate::keywords::{Field, KeywordMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Header consulted for the destination project when none is requested.
pub const DEFAULT_PROJECT_HEADER: &str = "X-Mailtrack-Project";

/// Prefix of the message ids the tracker puts on its own notifications.
pub const DEFAULT_MESSAGE_ID_PREFIX: &str = "mailtrack";

/// Ingestion settings shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Keyword locales besides English (`fr`, `de`, `es`, `ja`).
    pub locales: Vec<String>,
    /// Additional keyword spellings per field.
    pub extra_keywords: BTreeMap<Field, Vec<String>>,
    /// Custom field names recognized as keywords.
    pub custom_fields: Vec<String>,
    /// Body delimiter lines; the body is cut at the first one found.
    pub delimiters: Vec<String>,
    /// Values applied to new items when nothing else sets the field.
    pub default_attributes: AttributeMap,
    /// Project used when neither a request nor the header names one.
    pub default_project: Option<String>,
    /// Header naming the destination project; `None` disables it.
    pub project_header: Option<String>,
    /// Address the tracker sends from; mail from it is ignored.
    pub emission_address: Option<String>,
    /// Prefix of message ids emitted by the tracker.
    pub message_id_prefix: String,
    /// Allow `Assigned to` to name a group.
    pub group_assignment: bool,
    /// Limits for derived accounts.
    pub account: AccountLimits,
    /// Subjects are truncated to this many characters.
    pub subject_max_length: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            locales: Vec::new(),
            extra_keywords: BTreeMap::new(),
            custom_fields: Vec::new(),
            delimiters: Vec::new(),
            default_attributes: AttributeMap::new(),
            default_project: None,
            project_header: Some(DEFAULT_PROJECT_HEADER.to_string()),
            emission_address: None,
            message_id_prefix: DEFAULT_MESSAGE_ID_PREFIX.to_string(),
            group_assignment: false,
            account: AccountLimits::default(),
            subject_max_length: 255,
        }
    }
}

impl IngestConfig {
    /// Parses a JSON configuration. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the configuration shape.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Builds the keyword map for the configured locales.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown locale or an invalid spelling.
    pub fn keyword_map(&self) -> Result<KeywordMap, ConfigError> {
        KeywordMap::new(&self.locales, &self.extra_keywords, &self.custom_fields)
    }

    /// Returns true if `address` is the emission address.
    #[must_use]
    pub fn is_emission_address(&self, address: &str) -> bool {
        self.emission_address
            .as_deref()
            .is_some_and(|own| own.trim().eq_ignore_ascii_case(address.trim()))
    }
}
