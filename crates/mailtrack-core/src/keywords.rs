//! Keyword lines: localized `Field: value` lines at the top of a body.
//!
//! A [`KeywordMap`] knows every accepted spelling of every canonical
//! [`Field`]. [`extract`] scans the leading block of a cleaned body, removes
//! the keyword lines it recognizes and returns their raw values.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical field a keyword line can set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    /// Item tracker.
    Tracker,
    /// Destination project (routing only).
    Project,
    /// Item status.
    Status,
    /// Item priority.
    Priority,
    /// Item category.
    Category,
    /// Target version.
    FixedVersion,
    /// Start date.
    StartDate,
    /// Due date.
    DueDate,
    /// Estimated hours.
    EstimatedHours,
    /// Percent done.
    DoneRatio,
    /// Assignee.
    AssignedTo,
    /// Custom field, by name.
    Custom(String),
}

const CUSTOM_PREFIX: &str = "custom_field:";

impl Field {
    /// Every built-in field, in display order.
    pub const BUILT_IN: [Self; 11] = [
        Self::Tracker,
        Self::Project,
        Self::Status,
        Self::Priority,
        Self::Category,
        Self::FixedVersion,
        Self::StartDate,
        Self::DueDate,
        Self::EstimatedHours,
        Self::DoneRatio,
        Self::AssignedTo,
    ];

    /// Parse a canonical name (`status`, `custom_field:Severity`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix(CUSTOM_PREFIX) {
            let name = name.trim();
            return (!name.is_empty()).then(|| Self::Custom(name.to_string()));
        }

        Some(match s.to_lowercase().as_str() {
            "tracker" => Self::Tracker,
            "project" => Self::Project,
            "status" => Self::Status,
            "priority" => Self::Priority,
            "category" => Self::Category,
            "fixed_version" => Self::FixedVersion,
            "start_date" => Self::StartDate,
            "due_date" => Self::DueDate,
            "estimated_hours" => Self::EstimatedHours,
            "done_ratio" => Self::DoneRatio,
            "assigned_to" => Self::AssignedTo,
            _ => return None,
        })
    }

    /// Canonical name for built-in fields; `None` for custom fields.
    #[must_use]
    pub const fn as_str(&self) -> Option<&'static str> {
        Some(match self {
            Self::Tracker => "tracker",
            Self::Project => "project",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::Category => "category",
            Self::FixedVersion => "fixed_version",
            Self::StartDate => "start_date",
            Self::DueDate => "due_date",
            Self::EstimatedHours => "estimated_hours",
            Self::DoneRatio => "done_ratio",
            Self::AssignedTo => "assigned_to",
            Self::Custom(_) => return None,
        })
    }

    /// Returns true for custom fields.
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "{CUSTOM_PREFIX}{name}"),
            other => f.write_str(other.as_str().unwrap_or_default()),
        }
    }
}

impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

impl TryFrom<String> for Field {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.to_string()
    }
}

/// Built-in keyword locales.
pub const LOCALES: [&str; 5] = ["en", "fr", "de", "es", "ja"];

/// Spellings of the built-in fields for one locale, in [`Field::BUILT_IN`]
/// order.
fn locale_spellings(locale: &str) -> Option<[&'static [&'static str]; 11]> {
    let table: [&'static [&'static str]; 11] = match locale {
        "en" => [
            &["Tracker"],
            &["Project"],
            &["Status"],
            &["Priority"],
            &["Category"],
            &["Target version", "Fixed version", "Version"],
            &["Start date"],
            &["Due date"],
            &["Estimated time", "Estimated hours"],
            &["% Done", "Done ratio"],
            &["Assignee", "Assigned to"],
        ],
        "fr" => [
            &["Tracker"],
            &["Projet"],
            &["Statut"],
            &["Priorité"],
            &["Catégorie"],
            &["Version cible"],
            &["Début"],
            &["Échéance"],
            &["Temps estimé"],
            &["% réalisé"],
            &["Assigné à"],
        ],
        "de" => [
            &["Tracker"],
            &["Projekt"],
            &["Status"],
            &["Priorität"],
            &["Kategorie"],
            &["Zielversion"],
            &["Beginn"],
            &["Abgabedatum"],
            &["Geschätzter Aufwand"],
            &["% erledigt"],
            &["Zugewiesen an"],
        ],
        "es" => [
            &["Tipo"],
            &["Proyecto"],
            &["Estado"],
            &["Prioridad"],
            &["Categoría"],
            &["Versión prevista"],
            &["Fecha de inicio"],
            &["Fecha fin"],
            &["Tiempo estimado"],
            &["% Realizado"],
            &["Asignado a"],
        ],
        "ja" => [
            &["トラッカー"],
            &["プロジェクト"],
            &["ステータス"],
            &["優先度"],
            &["カテゴリ"],
            &["対象バージョン"],
            &["開始日"],
            &["期日"],
            &["予定工数"],
            &["進捗率", "進捗 %"],
            &["担当者"],
        ],
        _ => return None,
    };
    Some(table)
}

/// Accepted spellings per canonical field.
///
/// English spellings are always present. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct KeywordMap {
    fields: Vec<Field>,
    spellings: Vec<Vec<String>>,
    pattern: Regex,
}

impl KeywordMap {
    /// Builds a map from locales, extra spellings and custom field names.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown locale or if the combined pattern
    /// does not compile.
    pub fn new(
        locales: &[String],
        extra: &BTreeMap<Field, Vec<String>>,
        custom_fields: &[String],
    ) -> Result<Self, ConfigError> {
        let mut table: BTreeMap<Field, Vec<String>> = BTreeMap::new();

        let mut add = |field: &Field, spelling: &str| {
            let spelling = spelling.trim();
            if spelling.is_empty() {
                return;
            }
            let entry = table.entry(field.clone()).or_default();
            if !entry.iter().any(|s| s.to_lowercase() == spelling.to_lowercase()) {
                entry.push(spelling.to_string());
            }
        };

        let locales = std::iter::once("en").chain(locales.iter().map(String::as_str));
        for locale in locales {
            let spellings = locale_spellings(locale.trim())
                .ok_or_else(|| ConfigError::UnknownLocale(locale.to_string()))?;
            for (field, words) in Field::BUILT_IN.iter().zip(spellings) {
                for &word in words {
                    add(field, word);
                }
            }
        }

        for name in custom_fields {
            add(&Field::Custom(name.trim().to_string()), name.as_str());
        }

        for (field, words) in extra {
            for word in words {
                add(field, word.as_str());
            }
        }

        let (fields, spellings): (Vec<_>, Vec<_>) = table.into_iter().unzip();
        let pattern = build_pattern(&spellings)?;

        Ok(Self {
            fields,
            spellings,
            pattern,
        })
    }

    /// English-only map without custom fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn english() -> Result<Self, ConfigError> {
        Self::new(&[], &BTreeMap::new(), &[])
    }

    /// Accepted spellings of a field.
    #[must_use]
    pub fn spellings(&self, field: &Field) -> &[String] {
        self.fields
            .iter()
            .position(|f| f == field)
            .map_or(&[], |i| self.spellings[i].as_slice())
    }

    /// Matches one line, returning the field and its trimmed value.
    #[must_use]
    pub fn match_line<'t>(&self, line: &'t str) -> Option<(&Field, &'t str)> {
        let captures = self.pattern.captures(line)?;
        let index = (0..self.fields.len()).find(|i| captures.name(&format!("k{i}")).is_some())?;
        let value = captures.name("value").map_or("", |m| m.as_str().trim());
        Some((&self.fields[index], value))
    }
}

/// One alternation group per field; longer spellings first so that
/// `Start date` is tried before a shorter prefix.
fn build_pattern(spellings: &[Vec<String>]) -> Result<Regex, regex::Error> {
    let groups: Vec<String> = spellings
        .iter()
        .enumerate()
        .map(|(i, words)| {
            let mut words: Vec<&String> = words.iter().collect();
            words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
            let alternatives: Vec<String> = words
                .iter()
                .map(|w| regex::escape(w).replace(' ', r"[ \t]+"))
                .collect();
            format!("(?P<k{i}>{})", alternatives.join("|"))
        })
        .collect();

    Regex::new(&format!(
        r"(?i)^[ \t]*(?:{})[ \t]*:[ \t]*(?P<value>.*)$",
        groups.join("|")
    ))
}

/// Raw keyword values in first-occurrence order; a repeated field keeps its
/// position and takes the later value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawValues {
    entries: Vec<(Field, String)>,
}

impl RawValues {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value, replacing an earlier one for the same field.
    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    /// Value recorded for a field.
    #[must_use]
    pub fn get(&self, field: &Field) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates entries in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&Field, &str)> {
        self.entries.iter().map(|(f, v)| (f, v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keyword line was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of [`extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Body text without the keyword lines.
    pub residual: String,
    /// Values of the recognized keyword lines.
    pub values: RawValues,
}

/// Extracts keyword lines from the top of a cleaned body.
///
/// Blank lines are skipped; the first other non-keyword line ends the
/// keyword block. Matched lines are removed, every other line is kept, and
/// blank lines left at the top are trimmed.
#[must_use]
pub fn extract(text: &str, keywords: &KeywordMap) -> Extraction {
    let mut values = RawValues::new();
    let mut kept: Vec<&str> = Vec::new();
    let mut in_block = true;

    for line in text.lines() {
        if in_block {
            if line.trim().is_empty() {
                kept.push(line);
                continue;
            }
            if let Some((field, value)) = keywords.match_line(line) {
                values.insert(field.clone(), value);
                continue;
            }
            in_block = false;
        }
        kept.push(line);
    }

    let start = kept
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(kept.len());

    Extraction {
        residual: kept[start..].join("\n"),
        values,
    }
}
