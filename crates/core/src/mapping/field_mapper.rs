//! Source fields to archive fields.
//!
//! [`FieldMapper`] applies a fixed mapping:
//!
//! | source            | archive             |
//! |-------------------|---------------------|
//! | `RECID`           | `did`               |
//! | `DOCTITLE`        | `title`             |
//! | `TXY`, `DOCAUTHOR`| `author`            |
//! | `CRUSER`          | `bly`               |
//! | `CRDEPT`          | `fillingdepartment` |
//! | `DOCFIRSTPUBTIME` | `docdate`, `year`   |
//! | `CHANNELID`       | `classfyname`, `classfy` |
//!
//! The site name and domain come from configuration, never from the source.

use std::sync::Arc;

use tracing::debug;

use super::coerce;
use crate::classification::ClassificationResolver;
use crate::config::SiteConfig;
use crate::errors::ValidationError;
use crate::message::SourceFields;
use crate::models::{NormalizedFields, RETENTION_PERIOD};

const MAX_RETENTION: u32 = 100;

pub struct FieldMapper {
    classification: Arc<ClassificationResolver>,
    site_name: String,
    site_domain: String,
}

impl FieldMapper {
    pub fn new(classification: Arc<ClassificationResolver>, site: &SiteConfig) -> Self {
        Self {
            classification,
            site_name: site.name.clone(),
            site_domain: site.domain.clone(),
        }
    }

    /// Map and validate.
    pub fn map(&self, fields: &SourceFields) -> Result<NormalizedFields, ValidationError> {
        let mapped = self.map_unchecked(fields);
        self.validate(&mapped)?;
        Ok(mapped)
    }

    /// Map without validating. Fields that could not be derived are left
    /// empty.
    pub fn map_unchecked(&self, fields: &SourceFields) -> NormalizedFields {
        let text = |value: &Option<String>| value.as_deref().map(coerce::clean_string).unwrap_or_default();

        let author = match text(&fields.txy) {
            a if a.is_empty() => text(&fields.doc_author),
            a => a,
        };

        let docdate = fields
            .doc_first_pub_time
            .as_deref()
            .map(coerce::normalize_date)
            .unwrap_or_default();
        let year = if docdate.is_empty() {
            String::new()
        } else {
            coerce::extract_year(&docdate)
        };

        let channel_id = fields.channel_id.as_deref().unwrap_or("").trim();
        let classification = self.classification.resolve(channel_id);
        debug!(
            channel_id,
            channel_name = fields.chnl_name.as_deref().unwrap_or(""),
            classfy = %classification.code,
            "resolved classification"
        );

        // A source retention value is honored by the parser but the archive
        // always receives the fixed period.
        if let Some(raw) = fields.retention_period.as_deref() {
            let parsed = coerce::parse_retention(raw);
            if parsed != RETENTION_PERIOD {
                debug!(parsed, fixed = RETENTION_PERIOD, "overriding source retention period");
            }
        }

        NormalizedFields {
            did: text(&fields.rec_id),
            wzmc: self.site_name.clone(),
            dn: self.site_domain.clone(),
            classfyname: classification.name,
            classfy: classification.code,
            title: text(&fields.doc_title),
            author,
            docdate,
            year,
            retentionperiod: RETENTION_PERIOD,
            fillingdepartment: text(&fields.cr_dept),
            bly: text(&fields.cr_user),
        }
    }

    /// Check required fields and value ranges.
    ///
    /// Every empty required field is reported at once; range and format
    /// checks run only once all required fields are present.
    pub fn validate(&self, fields: &NormalizedFields) -> Result<(), ValidationError> {
        let required = [
            ("did", fields.did.is_empty()),
            ("title", fields.title.is_empty()),
            ("wzmc", fields.wzmc.is_empty()),
            ("dn", fields.dn.is_empty()),
            ("classfyname", fields.classfyname.is_empty()),
            ("classfy", fields.classfy.is_empty()),
            ("docdate", fields.docdate.is_empty()),
            ("year", fields.year.is_empty()),
            ("retentionperiod", fields.retentionperiod == 0),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, empty)| *empty)
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { fields: missing });
        }

        if fields.retentionperiod > MAX_RETENTION {
            return Err(ValidationError::invalid(
                "retentionperiod",
                format!("{} exceeds {MAX_RETENTION} years", fields.retentionperiod),
            ));
        }

        if !coerce::is_strict_date(&fields.docdate) {
            return Err(ValidationError::invalid(
                "docdate",
                format!("'{}' is not YYYY-MM-DD", fields.docdate),
            ));
        }

        match fields.year.parse::<i32>() {
            Ok(y) if (coerce::MIN_YEAR..=coerce::MAX_YEAR).contains(&y) => Ok(()),
            Ok(y) => Err(ValidationError::invalid(
                "year",
                format!("{y} is outside {}..={}", coerce::MIN_YEAR, coerce::MAX_YEAR),
            )),
            Err(_) => Err(ValidationError::invalid(
                "year",
                format!("'{}' is not a number", fields.year),
            )),
        }
    }
}
