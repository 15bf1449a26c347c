//! Domain model types for the archive side of the bridge.
//!
//! These types are what the transform produces and what the HTTP submission
//! layer serializes.

use serde::{Deserialize, Serialize};

/// The retention period written into every submission, in years. Any value
/// present in the source is parsed and then discarded in favor of this.
pub const RETENTION_PERIOD: u32 = 30;

// ---------------------------------------------------------------------------
// Attachment category
// ---------------------------------------------------------------------------

/// Attachment category, serialized with the archive system's labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttachmentCategory {
    #[serde(rename = "正文")]
    Body,
    #[serde(rename = "视频")]
    Video,
    #[serde(rename = "图片")]
    Image,
    #[serde(rename = "音频")]
    Audio,
    #[serde(rename = "文档")]
    Document,
    #[serde(rename = "压缩包")]
    Archive,
    #[serde(rename = "Flash")]
    Flash,
    #[serde(rename = "其他")]
    Other,
}

impl AttachmentCategory {
    /// Sort rank; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Body => 1,
            Self::Video => 2,
            Self::Image => 3,
            Self::Audio => 4,
            Self::Document => 5,
            Self::Other => 6,
            Self::Archive => 7,
            Self::Flash => 8,
        }
    }

    /// The archive system's label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Body => "正文",
            Self::Video => "视频",
            Self::Image => "图片",
            Self::Audio => "音频",
            Self::Document => "文档",
            Self::Archive => "压缩包",
            Self::Flash => "Flash",
            Self::Other => "其他",
        }
    }

    /// Extension used when the URL carries none.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Body => ".html",
            Self::Video => ".mp4",
            Self::Image => ".jpg",
            Self::Audio => ".mp3",
            Self::Document => ".pdf",
            Self::Archive | Self::Flash | Self::Other => ".file",
        }
    }
}

impl std::fmt::Display for AttachmentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// One attachment of an archive submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// Lower-case extension with a leading dot.
    pub ext: String,
    /// Fully resolved absolute URL.
    pub file: String,
    #[serde(rename = "type")]
    pub category: AttachmentCategory,
}

// ---------------------------------------------------------------------------
// Normalized fields
// ---------------------------------------------------------------------------

/// Archive fields produced by the field mapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedFields {
    pub did: String,
    /// Site name.
    pub wzmc: String,
    /// Site domain.
    pub dn: String,
    pub classfyname: String,
    pub classfy: String,
    pub title: String,
    pub author: String,
    /// Always `YYYY-MM-DD` once validated.
    pub docdate: String,
    pub year: String,
    pub retentionperiod: u32,
    pub fillingdepartment: String,
    /// Editor.
    pub bly: String,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// The `ArchiveData` object of a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveData {
    #[serde(flatten)]
    pub fields: NormalizedFields,
    pub attachment: Vec<Attachment>,
}

/// The request body posted to the archive system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveSubmission {
    pub app_id: String,
    pub app_token: String,
    pub company_name: String,
    pub archive_type: String,
    pub archive_data: ArchiveData,
}

impl ArchiveSubmission {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> ArchiveSubmission {
        ArchiveSubmission {
            app_id: "NEWS".into(),
            app_token: "token".into(),
            company_name: "公司".into(),
            archive_type: "17".into(),
            archive_data: ArchiveData {
                fields: NormalizedFields {
                    did: "84085".into(),
                    docdate: "2025-04-09".into(),
                    year: "2025".into(),
                    retentionperiod: RETENTION_PERIOD,
                    ..Default::default()
                },
                attachment: vec![Attachment {
                    name: "标题(正文)".into(),
                    ext: ".html".into(),
                    file: "https://example.com/t.html".into(),
                    category: AttachmentCategory::Body,
                }],
            },
        }
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(submission()).unwrap();
        assert_eq!(value["AppId"], "NEWS");
        assert_eq!(value["ArchiveType"], "17");
        let data = &value["ArchiveData"];
        assert_eq!(data["did"], "84085");
        assert_eq!(data["retentionperiod"], 30);
        assert_eq!(data["attachment"][0]["type"], "正文");
        assert_eq!(data["attachment"][0]["ext"], ".html");
        assert!(data.get("fields").is_none());
    }

    #[test]
    fn test_category_priority_order() {
        use AttachmentCategory::*;
        let ordered = [Body, Video, Image, Audio, Document, Other, Archive, Flash];
        for pair in ordered.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn test_category_labels_match_serde() {
        use AttachmentCategory::*;
        for cat in [Body, Video, Image, Audio, Document, Archive, Flash, Other] {
            let json = serde_json::to_string(&cat).unwrap();
            assert_eq!(json, format!("\"{}\"", cat.label()));
        }
    }
}
