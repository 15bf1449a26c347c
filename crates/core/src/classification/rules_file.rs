//! TOML-based classification rule file reader/writer.
//!
//! The rule file format:
//!
//! ```toml
//! [default]
//! classfyname = "其他"
//! classfy = "QT"
//!
//! [[classification_rules]]
//! channel_id = "2240"
//! classfyname = "新闻头条"
//! classfy = "XWTT"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

const FALLBACK_NAME: &str = "其他";
const FALLBACK_CODE: &str = "QT";

/// A channel's archive classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationRule {
    pub channel_id: String,
    pub classfyname: String,
    pub classfy: String,
}

/// A fully loaded rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    pub rules: BTreeMap<String, ClassificationRule>,
    pub default_rule: ClassificationRule,
    /// Modification time of the file this table was read from.
    pub modified: Option<SystemTime>,
}

/// Channel ids appear both quoted and bare in hand-edited files.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ChannelKey {
    Text(String),
    Number(i64),
}

impl ChannelKey {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRule {
    channel_id: Option<ChannelKey>,
    classfyname: Option<String>,
    classfy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDefault {
    classfyname: Option<String>,
    classfy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRulesFile {
    #[serde(default)]
    classification_rules: Vec<RawRule>,
    default: Option<RawDefault>,
}

#[derive(Debug, Serialize)]
struct RuleEntry<'a> {
    channel_id: &'a str,
    classfyname: &'a str,
    classfy: &'a str,
}

#[derive(Debug, Serialize)]
struct DefaultEntry<'a> {
    classfyname: &'a str,
    classfy: &'a str,
}

#[derive(Debug, Serialize)]
struct RulesFileOut<'a> {
    default: DefaultEntry<'a>,
    classification_rules: Vec<RuleEntry<'a>>,
}

/// Utilities for loading and saving the classification rule file.
pub struct RulesFile;

impl RulesFile {
    /// Load the rule file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RuleTable, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading classification rules");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let modified = std::fs::metadata(path)?.modified().ok();
        let mut table = Self::parse(&contents)?;
        table.modified = modified;

        debug!(count = table.rules.len(), "loaded classification rules");
        Ok(table)
    }

    /// Parse rule file contents. The returned table has no modification
    /// marker.
    pub fn parse(contents: &str) -> Result<RuleTable, ConfigError> {
        let raw: RawRulesFile =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let default = raw.default.ok_or_else(|| ConfigError::InvalidValue {
            field: "default".into(),
            detail: "a [default] classification is required".into(),
        })?;
        let default_rule = ClassificationRule {
            channel_id: "default".into(),
            classfyname: default.classfyname.unwrap_or_else(|| FALLBACK_NAME.into()),
            classfy: default.classfy.unwrap_or_else(|| FALLBACK_CODE.into()),
        };

        let mut rules = BTreeMap::new();
        for (index, rule) in raw.classification_rules.into_iter().enumerate() {
            let channel_id = rule
                .channel_id
                .map(ChannelKey::into_string)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: format!("classification_rules[{index}].channel_id"),
                    detail: "missing channel_id".into(),
                })?;
            rules.insert(
                channel_id.clone(),
                ClassificationRule {
                    channel_id,
                    classfyname: rule.classfyname.unwrap_or_else(|| FALLBACK_NAME.into()),
                    classfy: rule.classfy.unwrap_or_else(|| FALLBACK_CODE.into()),
                },
            );
        }

        Ok(RuleTable {
            rules,
            default_rule,
            modified: None,
        })
    }

    /// Save the table back to disk and return the file's new modification
    /// time.
    pub fn save<P: AsRef<Path>>(
        path: P,
        table: &RuleTable,
    ) -> Result<Option<SystemTime>, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "saving classification rules");

        let out = RulesFileOut {
            default: DefaultEntry {
                classfyname: &table.default_rule.classfyname,
                classfy: &table.default_rule.classfy,
            },
            classification_rules: table
                .rules
                .values()
                .map(|rule| RuleEntry {
                    channel_id: &rule.channel_id,
                    classfyname: &rule.classfyname,
                    classfy: &rule.classfy,
                })
                .collect(),
        };

        let toml_str =
            toml::to_string_pretty(&out).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_str)?;

        debug!(count = table.rules.len(), "saved classification rules");
        Ok(std::fs::metadata(path)?.modified().ok())
    }
}
