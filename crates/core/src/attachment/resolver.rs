//! Attachment resolution across every source of a message.
//!
//! The body attachment is built first and is mandatory. The optional
//! sources follow in a fixed order; each one's outcome lands in the
//! [`Resolution`] report, and a failing source contributes nothing without
//! affecting the others. The merged list is deduplicated by resolved URL
//! (first occurrence wins) and stably sorted by category priority.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::source::{AttachmentSource, SourceKind};
use super::url::{validate_publish_url, UrlResolver};
use crate::errors::{AttachmentError, SourceError};
use crate::message::SourceMessage;
use crate::models::{Attachment, AttachmentCategory};

/// Outcome of one optional source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub kind: SourceKind,
    /// Number of candidates extracted, or why the source yielded none.
    pub outcome: Result<usize, SourceError>,
    /// Entries without a usable URL.
    pub skipped: usize,
}

/// A resolved attachment list together with its per-source report.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub attachments: Vec<Attachment>,
    pub report: Vec<SourceReport>,
    /// Candidates dropped because an earlier one had the same URL.
    pub duplicates: usize,
}

impl Resolution {
    /// Sources that failed outright.
    pub fn failures(&self) -> impl Iterator<Item = (SourceKind, &SourceError)> {
        self.report
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.kind, e)))
    }
}

pub struct AttachmentResolver {
    urls: UrlResolver,
}

impl AttachmentResolver {
    /// `domain` is the host relative paths resolve against.
    pub fn new(domain: &str) -> Self {
        Self {
            urls: UrlResolver::new(domain),
        }
    }

    /// The mandatory body attachment pointing at the published page.
    pub fn body(&self, msg: &SourceMessage) -> Result<Attachment, AttachmentError> {
        let publish_url = msg.publish_url();
        validate_publish_url(publish_url)?;
        let file = self
            .urls
            .absolutize(publish_url)
            .ok_or(AttachmentError::EmptyPublishUrl)?;

        let title = msg.title().trim();
        let name = if title.is_empty() {
            "正文".to_string()
        } else {
            format!("{title}(正文)")
        };
        Ok(Attachment {
            name,
            ext: AttachmentCategory::Body.default_extension().to_string(),
            file,
            category: AttachmentCategory::Body,
        })
    }

    /// Resolve every attachment of `msg`.
    ///
    /// Only a missing or malformed publish URL, or an assembled list that
    /// fails [`check`](Self::check), is an error.
    pub fn resolve(&self, msg: &SourceMessage) -> Result<Resolution, AttachmentError> {
        let mut candidates = vec![self.body(msg)?];
        let mut report = Vec::new();

        for source in AttachmentSource::collect(msg) {
            let kind = source.kind();
            match source.extract(&self.urls) {
                Ok(extraction) => {
                    debug!(
                        source = %kind,
                        found = extraction.attachments.len(),
                        skipped = extraction.skipped,
                        "extracted attachment candidates"
                    );
                    report.push(SourceReport {
                        kind,
                        outcome: Ok(extraction.attachments.len()),
                        skipped: extraction.skipped,
                    });
                    candidates.extend(extraction.attachments);
                }
                Err(e) => {
                    warn!(
                        doc_id = msg.document_id(),
                        source = %kind,
                        error = %e,
                        "attachment source failed, skipping it"
                    );
                    report.push(SourceReport {
                        kind,
                        outcome: Err(e),
                        skipped: 0,
                    });
                }
            }
        }

        let total = candidates.len();
        let mut attachments = dedup_by_file(candidates);
        let duplicates = total - attachments.len();
        attachments.sort_by_key(|a| a.category.priority());

        Self::check(&attachments)?;
        debug!(
            doc_id = msg.document_id(),
            count = attachments.len(),
            duplicates,
            "resolved attachments"
        );
        Ok(Resolution {
            attachments,
            report,
            duplicates,
        })
    }

    /// A list holding only the body attachment.
    pub fn body_only(&self, msg: &SourceMessage) -> Result<Vec<Attachment>, AttachmentError> {
        Ok(vec![self.body(msg)?])
    }

    /// Keep the first `max` attachments of a priority-ordered list.
    pub fn cap(mut attachments: Vec<Attachment>, max: usize) -> Vec<Attachment> {
        attachments.truncate(max);
        attachments
    }

    /// Attachment count per category, in priority order.
    pub fn summary(attachments: &[Attachment]) -> Vec<(AttachmentCategory, usize)> {
        let mut counts: Vec<(AttachmentCategory, usize)> = Vec::new();
        for attachment in attachments {
            match counts.iter_mut().find(|(c, _)| *c == attachment.category) {
                Some((_, n)) => *n += 1,
                None => counts.push((attachment.category, 1)),
            }
        }
        counts.sort_by_key(|(c, _)| c.priority());
        counts
    }

    /// Check the invariants of a resolved list: the body comes first, every
    /// URL is non-empty and unique, and categories are in priority order.
    pub fn check(attachments: &[Attachment]) -> Result<(), AttachmentError> {
        match attachments.first() {
            Some(first) if first.category == AttachmentCategory::Body => {}
            _ => return Err(AttachmentError::Inconsistent("body attachment is not first".into())),
        }
        let mut seen = HashSet::new();
        for attachment in attachments {
            if attachment.file.is_empty() {
                return Err(AttachmentError::Inconsistent(format!(
                    "attachment '{}' has no URL",
                    attachment.name
                )));
            }
            if !seen.insert(attachment.file.as_str()) {
                return Err(AttachmentError::Inconsistent(format!(
                    "duplicate URL {}",
                    attachment.file
                )));
            }
        }
        if attachments
            .windows(2)
            .any(|w| w[0].category.priority() > w[1].category.priority())
        {
            return Err(AttachmentError::Inconsistent("attachments out of priority order".into()));
        }
        Ok(())
    }
}

fn dedup_by_file(candidates: Vec<Attachment>) -> Vec<Attachment> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|a| seen.insert(a.file.clone()))
        .collect()
}
