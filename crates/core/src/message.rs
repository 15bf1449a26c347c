//! Source message model: the CMS publish event as delivered upstream.
//!
//! Only the keys the engine reads are declared; everything else in the
//! (very wide) CMS payload is ignored during deserialization.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One CMS publish notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Upstream status text.
    #[serde(rename = "MSG", default)]
    pub msg: String,

    /// `"true"` / `"false"` / `"1"` / `"0"`.
    #[serde(rename = "ISSUCCESS", default)]
    pub is_success: String,

    #[serde(rename = "DATA")]
    pub data: MessageData,
}

impl SourceMessage {
    /// Decode a raw JSON message.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::MalformedMessage(e.to_string()))
    }

    /// Whether the upstream publish succeeded.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.is_success.trim().to_ascii_lowercase().as_str(),
            "true" | "1"
        )
    }

    pub fn document_id(&self) -> &str {
        &self.data.doc_id
    }

    pub fn channel_id(&self) -> &str {
        &self.data.channel_id
    }

    pub fn title(&self) -> &str {
        self.data.document.fields.doc_title.as_deref().unwrap_or("")
    }

    pub fn publish_url(&self) -> &str {
        &self.data.document.doc_pub_url
    }

    /// Merge the three nested sections into one flat field set.
    ///
    /// Precedence, lowest to highest: document body, channel doc, envelope.
    pub fn source_fields(&self) -> SourceFields {
        [
            self.data.document.fields.clone(),
            self.data.channel_doc.fields.clone(),
            self.data.envelope_fields(),
        ]
        .into_iter()
        .fold(SourceFields::default(), SourceFields::overlay)
    }
}

/// The `DATA` section: routing envelope, nested document sections and the
/// three attachment arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(rename = "DOCID", default)]
    pub doc_id: String,

    #[serde(rename = "CHANNELID", default)]
    pub channel_id: String,

    #[serde(rename = "SITENAME", default)]
    pub site_name: Option<String>,

    #[serde(rename = "CRUSER", default)]
    pub cr_user: Option<String>,

    #[serde(rename = "CRTIME", default)]
    pub cr_time: Option<String>,

    #[serde(rename = "DATA", default)]
    pub document: DocumentData,

    #[serde(rename = "CHNLDOC", default)]
    pub channel_doc: ChannelDoc,

    /// Legacy attachment array of [`AppendixEntry`] objects.
    ///
    /// The three arrays keep their entries undecoded so that one bad entry
    /// only fails its own source during attachment extraction.
    #[serde(rename = "APPENDIX", default, deserialize_with = "entry_list")]
    pub appendix: Vec<Value>,

    /// Newer attachment array with the legacy shape.
    #[serde(rename = "Appdix", default, deserialize_with = "entry_list")]
    pub appdix: Vec<Value>,

    /// Newest attachment array of [`AttachmentEntry`] objects.
    #[serde(default, deserialize_with = "entry_list")]
    pub attachments: Vec<Value>,
}

impl MessageData {
    /// The envelope's own contribution to the flat field set.
    fn envelope_fields(&self) -> SourceFields {
        SourceFields {
            channel_id: (!self.channel_id.is_empty()).then(|| self.channel_id.clone()),
            cr_user: self.cr_user.clone(),
            ..SourceFields::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Nested sections
// ---------------------------------------------------------------------------

/// `DATA.DATA`: the document body.
///
/// Keys the field mapper reads (title included) live in the flattened
/// [`SourceFields`]; serde hands a key to only one of the two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentData {
    #[serde(rename = "DOCPUBURL", default)]
    pub doc_pub_url: String,

    #[serde(rename = "DOCHTMLCON", default)]
    pub doc_html_con: String,

    #[serde(rename = "CRTIME", default)]
    pub cr_time: Option<String>,

    #[serde(rename = "DOCRELTIME", default)]
    pub doc_rel_time: Option<String>,

    #[serde(rename = "DOCUMENT_RELATED_VIDEO", default)]
    pub related_video: Option<String>,

    #[serde(rename = "DOCUMENT_CONTENT_VIDEO", default)]
    pub content_video: Option<String>,

    #[serde(rename = "DOCUMENT_RELATED_PIC", default)]
    pub related_pic: Option<String>,

    #[serde(flatten)]
    pub fields: SourceFields,
}

/// `DATA.CHNLDOC`: channel routing for the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDoc {
    #[serde(rename = "DOCPUBURL", default)]
    pub doc_pub_url: Option<String>,

    #[serde(flatten)]
    pub fields: SourceFields,
}

/// Legacy / newer attachment entry: raw file reference plus a type flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppendixEntry {
    #[serde(rename = "APPFILE", default, deserialize_with = "url_text")]
    pub app_file: String,

    /// Numeric in some exports.
    #[serde(rename = "APPFLAG", default, deserialize_with = "scalar_text")]
    pub app_flag: String,
}

impl AppendixEntry {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// Description / URL / id triplet, used both by the newest array and by the
/// JSON-encoded side channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentEntry {
    #[serde(rename = "APPDESC", default, deserialize_with = "scalar_text")]
    pub app_desc: String,

    #[serde(rename = "APPURL", default, deserialize_with = "url_text")]
    pub app_url: String,

    #[serde(rename = "APPENDIXID", default)]
    pub appendix_id: Option<Value>,
}

impl AttachmentEntry {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

// ---------------------------------------------------------------------------
// Flattened field view
// ---------------------------------------------------------------------------

/// The keys the field mapper reads, as contributed by one section or as the
/// merged result of all of them.
///
/// `Some` means the key was present in that section, even if empty, so a
/// later section can override an earlier one with an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFields {
    #[serde(
        rename = "RECID",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub rec_id: Option<String>,

    #[serde(
        rename = "DOCTITLE",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub doc_title: Option<String>,

    #[serde(
        rename = "TXY",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub txy: Option<String>,

    #[serde(
        rename = "DOCAUTHOR",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub doc_author: Option<String>,

    #[serde(
        rename = "CRUSER",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cr_user: Option<String>,

    #[serde(
        rename = "CRDEPT",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cr_dept: Option<String>,

    #[serde(
        rename = "CHANNELID",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<String>,

    #[serde(
        rename = "CHNLNAME",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub chnl_name: Option<String>,

    #[serde(
        rename = "DOCFIRSTPUBTIME",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub doc_first_pub_time: Option<String>,

    #[serde(
        rename = "RETENTIONPERIOD",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub retention_period: Option<String>,
}

impl SourceFields {
    /// Overlay `top` onto `self`: every key present in `top` wins.
    pub fn overlay(self, top: SourceFields) -> SourceFields {
        SourceFields {
            rec_id: top.rec_id.or(self.rec_id),
            doc_title: top.doc_title.or(self.doc_title),
            txy: top.txy.or(self.txy),
            doc_author: top.doc_author.or(self.doc_author),
            cr_user: top.cr_user.or(self.cr_user),
            cr_dept: top.cr_dept.or(self.cr_dept),
            channel_id: top.channel_id.or(self.channel_id),
            chnl_name: top.chnl_name.or(self.chnl_name),
            doc_first_pub_time: top.doc_first_pub_time.or(self.doc_first_pub_time),
            retention_period: top.retention_period.or(self.retention_period),
        }
    }
}

/// An attachment array. `null` reads as empty and a lone value as a
/// one-entry array.
fn entry_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(other) => vec![other],
    })
}

/// Strings and numbers as text; `null` reads as empty.
fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(D::Error::custom(format!("expected text, found {other}"))),
    }
}

/// A URL or path must be a string; `null` reads as empty.
fn url_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(D::Error::custom(format!("expected a URL string, found {other}"))),
    }
}

/// Accept strings, numbers and booleans; `null` and structured values read
/// as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "MSG": "操作成功",
            "ISSUCCESS": "true",
            "DATA": {
                "DOCID": "84085",
                "CHANNELID": "2240",
                "CRUSER": "envelope-user",
                "SITENAME": "集团门户",
                "DATA": {
                    "RECID": "84085",
                    "DOCTITLE": "裸眼3D看云能",
                    "DOCPUBURL": "https://example.com/t.html",
                    "CHANNELID": "1111",
                    "CRUSER": "doc-user",
                    "TXY": "",
                    "DOCAUTHOR": "张三",
                    "SOMETHING_UNKNOWN": [1, 2, 3]
                },
                "CHNLDOC": {
                    "RECID": "99999",
                    "DOCFIRSTPUBTIME": "2025-04-09 10:30:00",
                    "CRDEPT": "宣传部",
                    "CRUSER": "chnl-user"
                },
                "APPENDIX": [{"APPFILE": "/a.pdf", "APPFLAG": "40"}]
            }
        })
    }

    #[test]
    fn test_deserialize_ignores_unknown_keys() {
        let msg: SourceMessage = serde_json::from_value(sample()).unwrap();
        assert_eq!(msg.document_id(), "84085");
        assert_eq!(msg.title(), "裸眼3D看云能");
        assert_eq!(msg.publish_url(), "https://example.com/t.html");
        assert_eq!(msg.data.appendix.len(), 1);
        assert!(msg.data.appdix.is_empty());
        assert!(msg.succeeded());
    }

    #[test]
    fn test_merge_precedence() {
        let msg: SourceMessage = serde_json::from_value(sample()).unwrap();
        let fields = msg.source_fields();

        // Channel doc overrides document body.
        assert_eq!(fields.rec_id.as_deref(), Some("99999"));
        // Envelope overrides both.
        assert_eq!(fields.cr_user.as_deref(), Some("envelope-user"));
        assert_eq!(fields.channel_id.as_deref(), Some("2240"));
        // Keys present in only one section survive.
        assert_eq!(fields.doc_title.as_deref(), Some("裸眼3D看云能"));
        assert_eq!(fields.cr_dept.as_deref(), Some("宣传部"));
        assert_eq!(fields.txy.as_deref(), Some(""));
        assert_eq!(fields.doc_author.as_deref(), Some("张三"));
        assert!(fields.retention_period.is_none());
    }

    #[test]
    fn test_overlay_keeps_present_empty_values() {
        let low = SourceFields {
            cr_dept: Some("宣传部".into()),
            ..Default::default()
        };
        let high = SourceFields {
            cr_dept: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(low.overlay(high).cr_dept.as_deref(), Some(""));
    }

    #[test]
    fn test_success_flag_variants() {
        let mut msg: SourceMessage = serde_json::from_value(sample()).unwrap();
        for (flag, expected) in [("TRUE", true), ("1", true), ("false", false), ("0", false), ("", false)] {
            msg.is_success = flag.into();
            assert_eq!(msg.succeeded(), expected, "flag {flag:?}");
        }
    }

    #[test]
    fn test_numeric_fields_read_as_text() {
        let raw = json!({
            "ISSUCCESS": "1",
            "DATA": {
                "DOCID": "1",
                "DATA": {"RECID": 84085, "DOCTITLE": "t", "RETENTIONPERIOD": 10},
                "CHNLDOC": {"CRDEPT": null}
            }
        });
        let msg: SourceMessage = serde_json::from_value(raw).unwrap();
        let fields = msg.source_fields();
        assert_eq!(fields.rec_id.as_deref(), Some("84085"));
        assert_eq!(fields.retention_period.as_deref(), Some("10"));
        assert!(fields.cr_dept.is_none());
    }

    #[test]
    fn test_attachment_arrays_decode_per_entry() {
        let raw = json!({
            "ISSUCCESS": "true",
            "DATA": {
                "DATA": {"DOCTITLE": "t"},
                "APPENDIX": [{"APPFILE": "/a.pdf", "APPFLAG": 40}, "oops"],
                "Appdix": null,
                "attachments": {"APPURL": 5}
            }
        });
        let msg: SourceMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.data.appendix.len(), 2);
        assert!(msg.data.appdix.is_empty());
        assert_eq!(msg.data.attachments.len(), 1);

        let entry = AppendixEntry::from_value(&msg.data.appendix[0]).unwrap();
        assert_eq!(entry.app_flag, "40");
        assert!(AppendixEntry::from_value(&msg.data.appendix[1]).is_err());
        assert!(AttachmentEntry::from_value(&msg.data.attachments[0]).is_err());

        let entry = AttachmentEntry::from_value(&json!({"APPDESC": 7, "APPURL": null})).unwrap();
        assert_eq!((entry.app_desc.as_str(), entry.app_url.as_str()), ("7", ""));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = SourceMessage::from_json("{not json");
        assert!(matches!(result, Err(ValidationError::MalformedMessage(_))));
    }
}
