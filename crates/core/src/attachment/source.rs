//! The optional attachment-bearing locations of a source message.

use std::fmt;

use serde_json::Value;

use super::category::{self, VIDEO_PAGE_FLAG};
use super::markup::{self, MarkupRef};
use super::url::{extension_or_default, UrlResolver};
use crate::errors::SourceError;
use crate::message::{AppendixEntry, AttachmentEntry, SourceMessage};
use crate::models::Attachment;

pub const RELATED_VIDEO: &str = "DOCUMENT_RELATED_VIDEO";
pub const CONTENT_VIDEO: &str = "DOCUMENT_CONTENT_VIDEO";
pub const RELATED_PIC: &str = "DOCUMENT_RELATED_PIC";

/// Identifies a source in resolution reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Markup,
    SideChannel(&'static str),
    Legacy,
    Parallel,
    Newest,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Markup => f.write_str("DOCHTMLCON"),
            Self::SideChannel(field) => f.write_str(field),
            Self::Legacy => f.write_str("APPENDIX"),
            Self::Parallel => f.write_str("Appdix"),
            Self::Newest => f.write_str("attachments"),
        }
    }
}

/// One attachment-bearing location, borrowed from the message.
#[derive(Debug, Clone, Copy)]
pub enum AttachmentSource<'a> {
    /// Rendered document HTML.
    Markup(&'a str),
    /// A JSON-encoded list of `{APPDESC, APPURL, APPENDIXID}`.
    SideChannel { field: &'static str, json: &'a str },
    /// `APPENDIX`: file plus type flag.
    Legacy {
        entries: &'a [Value],
        title: &'a str,
    },
    /// `Appdix`: same shape as `APPENDIX`.
    Parallel {
        entries: &'a [Value],
        title: &'a str,
    },
    /// `attachments`: description, URL and id.
    Newest(&'a [Value]),
}

/// Candidates from one source, plus the count of entries that carried no
/// usable URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub attachments: Vec<Attachment>,
    pub skipped: usize,
}

impl<'a> AttachmentSource<'a> {
    /// The sources present in `msg`, in extraction order.
    pub fn collect(msg: &'a SourceMessage) -> Vec<Self> {
        let document = &msg.data.document;
        let title = msg.title();
        let mut sources = Vec::new();

        if !document.doc_html_con.trim().is_empty() {
            sources.push(Self::Markup(&document.doc_html_con));
        }
        for (field, value) in [
            (RELATED_VIDEO, &document.related_video),
            (CONTENT_VIDEO, &document.content_video),
            (RELATED_PIC, &document.related_pic),
        ] {
            if let Some(json) = value.as_deref().filter(|s| !s.trim().is_empty()) {
                sources.push(Self::SideChannel { field, json });
            }
        }
        if !msg.data.appendix.is_empty() {
            sources.push(Self::Legacy {
                entries: &msg.data.appendix,
                title,
            });
        }
        if !msg.data.appdix.is_empty() {
            sources.push(Self::Parallel {
                entries: &msg.data.appdix,
                title,
            });
        }
        if !msg.data.attachments.is_empty() {
            sources.push(Self::Newest(&msg.data.attachments));
        }
        sources
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Markup(_) => SourceKind::Markup,
            Self::SideChannel { field, .. } => SourceKind::SideChannel(*field),
            Self::Legacy { .. } => SourceKind::Legacy,
            Self::Parallel { .. } => SourceKind::Parallel,
            Self::Newest(_) => SourceKind::Newest,
        }
    }

    /// Extract candidates. All URLs go through `urls`.
    ///
    /// A malformed entry fails the whole source it belongs to.
    pub fn extract(&self, urls: &UrlResolver) -> Result<Extraction, SourceError> {
        let kind = self.kind();
        match *self {
            Self::Markup(html) => Ok(from_markup(&markup::scan(html)?, urls)),
            Self::SideChannel { field, json } => from_side_channel(field, json, urls),
            Self::Legacy { entries, title } => {
                let entries = decode_entries(kind, entries, AppendixEntry::from_value)?;
                Ok(from_appendix(&entries, title, "附件", urls))
            }
            Self::Parallel { entries, title } => {
                let entries = decode_entries(kind, entries, AppendixEntry::from_value)?;
                Ok(from_appendix(&entries, title, "Appdix附件", urls))
            }
            Self::Newest(entries) => {
                let entries = decode_entries(kind, entries, AttachmentEntry::from_value)?;
                Ok(from_newest(&entries, urls))
            }
        }
    }
}

fn decode_entries<T>(
    kind: SourceKind,
    entries: &[Value],
    decode: fn(&Value) -> Result<T, serde_json::Error>,
) -> Result<Vec<T>, SourceError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, value)| {
            decode(value).map_err(|e| SourceError::MalformedEntry {
                field: kind.to_string(),
                index,
                detail: e.to_string(),
            })
        })
        .collect()
}

fn candidate(
    urls: &UrlResolver,
    raw: &str,
    name: String,
    flag: Option<&str>,
) -> Option<Attachment> {
    let file = urls.absolutize(raw)?;
    let category = category::infer(flag, &file);
    Some(Attachment {
        name,
        ext: extension_or_default(&file, category),
        file,
        category,
    })
}

fn collect_candidates<I>(items: I) -> Extraction
where
    I: IntoIterator<Item = Option<Attachment>>,
{
    let mut out = Extraction::default();
    for item in items {
        match item {
            Some(attachment) => out.attachments.push(attachment),
            None => out.skipped += 1,
        }
    }
    out
}

fn from_markup(refs: &[MarkupRef], urls: &UrlResolver) -> Extraction {
    collect_candidates(
        refs.iter()
            .filter(|r| r.kind != markup::MarkupKind::Link || category::is_anchor_attachment(&r.url))
            .map(|r| candidate(urls, &r.url, format!("{}附件", r.kind.label()), None)),
    )
}

fn from_side_channel(
    field: &'static str,
    json: &str,
    urls: &UrlResolver,
) -> Result<Extraction, SourceError> {
    let invalid = |detail: String| SourceError::InvalidJson {
        field: field.to_string(),
        detail,
    };
    let value: Value = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(invalid("expected a list of attachment entries".into()));
    };
    let entries = decode_entries(
        SourceKind::SideChannel(field),
        &items,
        AttachmentEntry::from_value,
    )?;

    Ok(collect_candidates(entries.iter().map(|entry| {
        let desc = entry.app_desc.trim();
        let name = if desc.is_empty() {
            format!("{field}附件")
        } else {
            desc.to_string()
        };
        candidate(urls, &entry.app_url, name, None)
    })))
}

fn from_appendix(
    entries: &[AppendixEntry],
    title: &str,
    prefix: &str,
    urls: &UrlResolver,
) -> Extraction {
    collect_candidates(entries.iter().enumerate().map(|(i, entry)| {
        let flag = entry.app_flag.trim();
        let name = if flag == VIDEO_PAGE_FLAG {
            format!("{title}_视频播放页")
        } else {
            format!("{prefix}{}", i + 1)
        };
        candidate(urls, &entry.app_file, name, Some(flag))
    }))
}

fn from_newest(entries: &[AttachmentEntry], urls: &UrlResolver) -> Extraction {
    collect_candidates(entries.iter().enumerate().map(|(i, entry)| {
        let desc = entry.app_desc.trim();
        let name = if desc.is_empty() {
            format!("附件{}", i + 1)
        } else {
            desc.to_string()
        };
        candidate(urls, &entry.app_url, name, None)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentCategory;
    use serde_json::json;

    fn urls() -> UrlResolver {
        UrlResolver::new("www.cnyeig.com")
    }

    fn message(data: Value) -> SourceMessage {
        serde_json::from_value(json!({"ISSUCCESS": "true", "DATA": data})).unwrap()
    }

    #[test]
    fn test_collect_order_and_presence() {
        let msg = message(json!({
            "DATA": {
                "DOCTITLE": "t",
                "DOCHTMLCON": "<p>x</p>",
                "DOCUMENT_RELATED_VIDEO": "",
                "DOCUMENT_RELATED_PIC": "[]"
            },
            "APPENDIX": [{"APPFILE": "/a.pdf", "APPFLAG": "40"}],
            "Appdix": [],
            "attachments": [{"APPURL": "/b.mp3"}]
        }));
        let kinds: Vec<_> = AttachmentSource::collect(&msg).iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Markup,
                SourceKind::SideChannel(RELATED_PIC),
                SourceKind::Legacy,
                SourceKind::Newest,
            ]
        );
    }

    #[test]
    fn test_markup_filters_page_links() {
        let html = r#"<a href="/news/next.html">next</a><a href="/f/a.docx">doc</a><img src="/p/1.png">"#;
        let out = AttachmentSource::Markup(html).extract(&urls()).unwrap();
        let names: Vec<_> = out.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["link附件", "image附件"]);
        assert_eq!(out.attachments[0].file, "http://www.cnyeig.com/f/a.docx");
        assert_eq!(out.attachments[0].category, AttachmentCategory::Document);
        assert_eq!(out.attachments[1].ext, ".png");
    }

    #[test]
    fn test_side_channel_entries() {
        let json = r#"[
            {"APPDESC": "宣传片", "APPURL": "/v/promo.mp4", "APPENDIXID": 7},
            {"APPURL": "https://cdn.example.com/v/clip"},
            {"APPDESC": "no url"},
            {"APPURL": null}
        ]"#;
        let source = AttachmentSource::SideChannel {
            field: RELATED_VIDEO,
            json,
        };
        let out = source.extract(&urls()).unwrap();
        assert_eq!(out.skipped, 2);
        assert_eq!(out.attachments[0].name, "宣传片");
        assert_eq!(out.attachments[0].category, AttachmentCategory::Video);
        assert_eq!(out.attachments[1].name, "DOCUMENT_RELATED_VIDEO附件");
        assert_eq!(out.attachments[1].category, AttachmentCategory::Other);
        assert_eq!(out.attachments[1].ext, ".file");
    }

    #[test]
    fn test_side_channel_bad_json() {
        let source = AttachmentSource::SideChannel {
            field: RELATED_PIC,
            json: "{not json",
        };
        assert!(matches!(
            source.extract(&urls()),
            Err(SourceError::InvalidJson { ref field, .. }) if field == RELATED_PIC
        ));

        let source = AttachmentSource::SideChannel {
            field: RELATED_PIC,
            json: r#"{"APPURL": "/a.jpg"}"#,
        };
        assert!(source.extract(&urls()).is_err());

        let source = AttachmentSource::SideChannel {
            field: RELATED_PIC,
            json: r#"[{"APPURL": "/a.jpg"}, {"APPURL": 42}]"#,
        };
        assert_eq!(
            source.extract(&urls()),
            Err(SourceError::MalformedEntry {
                field: RELATED_PIC.into(),
                index: 1,
                detail: "expected a URL string, found 42".into(),
            })
        );
    }

    #[test]
    fn test_appendix_flags_and_names() {
        let entries = vec![
            json!({"APPFILE": "/f/a.bin", "APPFLAG": "20"}),
            json!({"APPFILE": "", "APPFLAG": "40"}),
            json!({"APPFILE": "/play/123", "APPFLAG": 140}),
            json!({"APPFILE": "/f/b.zip", "APPFLAG": "70"}),
        ];
        let out = AttachmentSource::Legacy {
            entries: &entries,
            title: "年会",
        }
        .extract(&urls())
        .unwrap();

        assert_eq!(out.skipped, 1);
        let a = &out.attachments;
        assert_eq!((a[0].name.as_str(), a[0].category), ("附件1", AttachmentCategory::Image));
        assert_eq!(a[0].ext, ".bin");
        assert_eq!(a[1].name, "年会_视频播放页");
        assert_eq!(a[1].category, AttachmentCategory::Video);
        assert_eq!(a[1].ext, ".mp4");
        assert_eq!((a[2].name.as_str(), a[2].category), ("附件4", AttachmentCategory::Archive));

        let out = AttachmentSource::Parallel {
            entries: &entries[..1],
            title: "年会",
        }
        .extract(&urls())
        .unwrap();
        assert_eq!(out.attachments[0].name, "Appdix附件1");
    }

    #[test]
    fn test_newest_entries() {
        let entries = vec![
            json!({"APPURL": "/a/x.wav"}),
            json!({"APPDESC": "说明", "APPURL": "/a/y.pdf", "APPENDIXID": "9"}),
        ];
        let out = AttachmentSource::Newest(&entries).extract(&urls()).unwrap();
        assert_eq!(out.attachments[0].name, "附件1");
        assert_eq!(out.attachments[0].category, AttachmentCategory::Audio);
        assert_eq!(out.attachments[1].name, "说明");
        assert_eq!(out.attachments[1].category, AttachmentCategory::Document);
    }

    #[test]
    fn test_malformed_entry_fails_only_its_source() {
        let entries = vec![
            json!({"APPFILE": "/f/a.pdf", "APPFLAG": "40"}),
            json!(["not", "an", "entry"]),
        ];
        let err = AttachmentSource::Legacy {
            entries: &entries,
            title: "t",
        }
        .extract(&urls())
        .unwrap_err();
        assert!(matches!(
            err,
            SourceError::MalformedEntry { ref field, index: 1, .. } if field == "APPENDIX"
        ));

        let good = vec![json!({"APPURL": "/a/z.mp3"})];
        let out = AttachmentSource::Newest(&good).extract(&urls()).unwrap();
        assert_eq!(out.attachments.len(), 1);
    }
}
