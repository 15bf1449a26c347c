//! Transform coordination: one source message in, one archive submission out.
//!
//! The [`TransformCoordinator`] runs each transform through fixed stages:
//!
//! 1. Pre-validate the source (upstream success flag, title, publish URL).
//! 2. Merge the document, channel and envelope sections into one field set.
//! 3. Map and validate the archive fields.
//! 4. Resolve attachments from the structured message.
//! 5. Assemble the submission with the configured envelope constants.
//! 6. Re-validate the assembled submission.
//!
//! Every call, successful or not, is counted in [`TransformStats`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachment::AttachmentResolver;
use crate::classification::ClassificationResolver;
use crate::config::{AppConfig, ArchiveConfig};
use crate::errors::{TransformError, ValidationError};
use crate::mapping::FieldMapper;
use crate::message::SourceMessage;
use crate::models::{ArchiveData, ArchiveSubmission, Attachment};

/// Running counters over every transform call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransformStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub validation_failures: u64,
    pub transformation_failures: u64,
    /// Successful transforms whose attachment list fell back to body-only.
    pub degraded: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
}

impl TransformStats {
    /// Fraction of attempts that succeeded, `0.0` before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }
}

/// The transform engine.
///
/// Holds no per-message state, so a shared reference can serve concurrent
/// callers; only the statistics sit behind a mutex.
pub struct TransformCoordinator {
    archive: ArchiveConfig,
    max_attachments: usize,
    classification: Arc<ClassificationResolver>,
    field_mapper: FieldMapper,
    attachments: AttachmentResolver,
    stats: Mutex<TransformStats>,
}

impl TransformCoordinator {
    pub fn new(config: &AppConfig, classification: Arc<ClassificationResolver>) -> Self {
        info!(
            site = %config.site.domain,
            max_attachments = config.transform.max_attachments,
            "initializing transform coordinator"
        );
        Self {
            archive: config.archive.clone(),
            max_attachments: config.transform.max_attachments,
            field_mapper: FieldMapper::new(Arc::clone(&classification), &config.site),
            attachments: AttachmentResolver::new(&config.site.domain),
            classification,
            stats: Mutex::new(TransformStats::default()),
        }
    }

    pub fn classification(&self) -> &ClassificationResolver {
        &self.classification
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Transform one source message.
    ///
    /// A [`TransformError::Validation`] means the message itself is unusable
    /// and should be dead-lettered; a [`TransformError::Transformation`] is
    /// an internal failure the caller may retry.
    pub fn transform(&self, msg: &SourceMessage) -> Result<ArchiveSubmission, TransformError> {
        let started = Instant::now();
        let result = self.do_transform(msg);
        self.record(&result, started.elapsed());
        result
    }

    /// Decode a raw JSON message and transform it. A message that does not
    /// decode is a validation failure.
    pub fn transform_json(&self, raw: &str) -> Result<ArchiveSubmission, TransformError> {
        let started = Instant::now();
        let result = SourceMessage::from_json(raw)
            .map_err(TransformError::from)
            .and_then(|msg| self.do_transform(&msg));
        self.record(&result, started.elapsed());
        result
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TransformStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = TransformStats::default();
        debug!("transform statistics reset");
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn do_transform(&self, msg: &SourceMessage) -> Result<ArchiveSubmission, TransformError> {
        let doc_id = msg.document_id();
        debug!(doc_id, channel_id = msg.channel_id(), "starting transform");

        Self::pre_validate(msg)?;

        let source_fields = msg.source_fields();
        let fields = self.field_mapper.map(&source_fields)?;
        debug!(doc_id, did = %fields.did, classfy = %fields.classfy, "mapped fields");

        let (attachments, degraded) = self.resolve_attachments(msg)?;

        let submission = ArchiveSubmission {
            app_id: self.archive.app_id.clone(),
            app_token: self.archive.app_token.clone(),
            company_name: self.archive.company_name.clone(),
            archive_type: self.archive.archive_type.clone(),
            archive_data: ArchiveData {
                fields,
                attachment: attachments,
            },
        };

        self.post_validate(&submission)?;

        if degraded {
            self.with_stats(|s| s.degraded += 1);
        }
        info!(
            doc_id,
            did = %submission.archive_data.fields.did,
            attachments = submission.archive_data.attachment.len(),
            "transformed source message"
        );
        Ok(submission)
    }

    fn pre_validate(msg: &SourceMessage) -> Result<(), ValidationError> {
        if !msg.succeeded() {
            let reason = if msg.msg.trim().is_empty() {
                format!("ISSUCCESS={:?}", msg.is_success)
            } else {
                msg.msg.trim().to_string()
            };
            return Err(ValidationError::SourceRejected(reason));
        }

        let mut missing = Vec::new();
        if msg.title().trim().is_empty() {
            missing.push("DOCTITLE".to_string());
        }
        if msg.publish_url().trim().is_empty() {
            missing.push("DOCPUBURL".to_string());
        }
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { fields: missing });
        }
        Ok(())
    }

    /// Resolve and cap attachments. Returns whether the list degraded to
    /// body-only.
    fn resolve_attachments(
        &self,
        msg: &SourceMessage,
    ) -> Result<(Vec<Attachment>, bool), TransformError> {
        let doc_id = msg.document_id();
        let (list, degraded) = match self.attachments.resolve(msg) {
            Ok(resolution) => {
                let failed = resolution.failures().count();
                if failed > 0 {
                    debug!(doc_id, failed, "some attachment sources yielded nothing");
                }
                (resolution.attachments, false)
            }
            Err(e) if e.is_fatal() => {
                return Err(TransformError::transformation(
                    "failed to build body attachment",
                    e,
                ));
            }
            Err(e) => {
                warn!(doc_id, error = %e, "attachment resolution degraded to body only");
                let body = self
                    .attachments
                    .body_only(msg)
                    .map_err(|e| TransformError::transformation("failed to build body attachment", e))?;
                (body, true)
            }
        };

        if list.len() > self.max_attachments {
            warn!(
                doc_id,
                found = list.len(),
                max = self.max_attachments,
                "attachment cap applied"
            );
        }
        Ok((AttachmentResolver::cap(list, self.max_attachments), degraded))
    }

    fn post_validate(&self, submission: &ArchiveSubmission) -> Result<(), ValidationError> {
        let envelope = [
            ("AppId", &submission.app_id),
            ("AppToken", &submission.app_token),
            ("CompanyName", &submission.company_name),
            ("ArchiveType", &submission.archive_type),
        ];
        let missing: Vec<String> = envelope
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { fields: missing });
        }

        let data = &submission.archive_data;
        self.field_mapper.validate(&data.fields)?;

        if data.attachment.is_empty() {
            return Err(ValidationError::invalid(
                "attachment",
                "at least the body attachment is required",
            ));
        }
        AttachmentResolver::check(&data.attachment)
            .map_err(|e| ValidationError::invalid("attachment", e.to_string()))?;
        if data.attachment.len() > self.max_attachments {
            warn!(
                count = data.attachment.len(),
                max = self.max_attachments,
                "submission carries more attachments than the cap"
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    fn with_stats(&self, update: impl FnOnce(&mut TransformStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }

    fn record(&self, result: &Result<ArchiveSubmission, TransformError>, elapsed: Duration) {
        if let Err(e) = result {
            warn!(kind = e.kind(), retryable = e.is_retryable(), error = %e, "transform failed");
        }
        self.with_stats(|s| {
            s.attempted += 1;
            match result {
                Ok(_) => s.succeeded += 1,
                Err(e) => {
                    s.failed += 1;
                    match e {
                        TransformError::Validation(_) => s.validation_failures += 1,
                        TransformError::Transformation { .. } => s.transformation_failures += 1,
                    }
                }
            }
            s.last_run_at = Some(Utc::now());
            s.last_duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::RulesFile;
    use serde_json::{json, Value};

    fn coordinator() -> TransformCoordinator {
        let table = RulesFile::parse(
            r#"
[default]
classfyname = "其他"
classfy = "QT"

[[classification_rules]]
channel_id = "2240"
classfyname = "新闻头条"
classfy = "XWTT"
"#,
        )
        .unwrap();
        let resolver = Arc::new(ClassificationResolver::in_memory(table));
        TransformCoordinator::new(&AppConfig::default(), resolver)
    }

    fn raw_message() -> Value {
        json!({
            "MSG": "操作成功",
            "ISSUCCESS": "true",
            "DATA": {
                "DOCID": "84085",
                "CHANNELID": "2240",
                "DATA": {
                    "RECID": "84085",
                    "DOCTITLE": "裸眼3D看云能",
                    "DOCPUBURL": "https://example.com/t.html"
                },
                "CHNLDOC": {"DOCFIRSTPUBTIME": "2025-04-09 10:30:00"}
            }
        })
    }

    fn message(raw: Value) -> SourceMessage {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_transform_success_and_stats() {
        let c = coordinator();
        let submission = c.transform(&message(raw_message())).unwrap();
        assert_eq!(submission.app_id, "NEWS");
        assert_eq!(submission.archive_type, "17");
        assert_eq!(submission.archive_data.fields.classfy, "XWTT");
        assert_eq!(submission.archive_data.attachment.len(), 1);

        let stats = c.stats();
        assert_eq!((stats.attempted, stats.succeeded, stats.failed), (1, 1, 0));
        assert!(stats.last_run_at.is_some());
        assert!(stats.last_duration_ms.is_some());
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[test]
    fn test_rejected_source() {
        let mut raw = raw_message();
        raw["ISSUCCESS"] = json!("false");
        raw["MSG"] = json!("发布失败");
        let err = coordinator().transform(&message(raw)).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Validation(ValidationError::SourceRejected(ref m)) if m == "发布失败"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pre_validation_lists_missing_fields() {
        let mut raw = raw_message();
        raw["DATA"]["DATA"]["DOCTITLE"] = json!(" ");
        raw["DATA"]["DATA"]["DOCPUBURL"] = json!("");
        let err = coordinator().transform(&message(raw)).unwrap_err();
        match err {
            TransformError::Validation(ValidationError::MissingFields { fields }) => {
                assert_eq!(fields, vec!["DOCTITLE", "DOCPUBURL"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_publish_url_is_transformation_error() {
        let mut raw = raw_message();
        raw["DATA"]["DATA"]["DOCPUBURL"] = json!("not a url");
        let c = coordinator();
        let err = c.transform(&message(raw)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transformation");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(c.stats().transformation_failures, 1);
    }

    #[test]
    fn test_attachment_cap() {
        let mut raw = raw_message();
        let images: String = (0..15).map(|i| format!("<img src=\"/p/{i}.jpg\">")).collect();
        raw["DATA"]["DATA"]["DOCHTMLCON"] = json!(images);
        let submission = coordinator().transform(&message(raw)).unwrap();
        let attachments = &submission.archive_data.attachment;
        assert_eq!(attachments.len(), 10);
        assert_eq!(attachments[0].category, crate::models::AttachmentCategory::Body);
        assert_eq!(attachments[9].file, "http://www.cnyeig.com/p/8.jpg");
    }

    #[test]
    fn test_transform_json_garbage_is_validation() {
        let c = coordinator();
        let err = c.transform_json("{\"DATA\": 5").unwrap_err();
        assert!(matches!(
            err,
            TransformError::Validation(ValidationError::MalformedMessage(_))
        ));
        let stats = c.stats();
        assert_eq!((stats.attempted, stats.validation_failures), (1, 1));
    }

    #[test]
    fn test_reset_stats() {
        let c = coordinator();
        let _ = c.transform(&message(raw_message()));
        let _ = c.transform_json("[]");
        assert_eq!(c.stats().attempted, 2);
        c.reset_stats();
        assert_eq!(c.stats(), TransformStats::default());
    }

    #[test]
    fn test_post_validate_rejects_empty_envelope() {
        let mut config = AppConfig::default();
        config.archive.app_token = String::new();
        let table = RulesFile::parse("[default]\nclassfyname = \"其他\"\nclassfy = \"QT\"\n").unwrap();
        let c = TransformCoordinator::new(&config, Arc::new(ClassificationResolver::in_memory(table)));
        let err = c.transform(&message(raw_message())).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Validation(ValidationError::MissingFields { ref fields }) if fields == &["AppToken"]
        ));
    }
}
