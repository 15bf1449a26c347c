//! Category inference from CMS type flags and file extensions.

use crate::models::AttachmentCategory;

/// `APPFLAG` of a video playback page.
pub const VIDEO_PAGE_FLAG: &str = "140";

const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff"];
const VIDEO: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm"];
const AUDIO: &[&str] = &["mp3", "wav", "aac", "flac", "ogg", "m4a"];
const DOCUMENT: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt",
];
const ARCHIVE: &[&str] = &["zip", "rar", "7z", "tar", "gz"];
const FLASH: &[&str] = &["swf", "fla"];

/// Extensions that make an `<a href>` an attachment rather than a page link.
const ANCHOR_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "jpg", "jpeg", "png", "gif", "bmp",
    "webp", "mp4", "avi", "mov", "wmv", "flv", "mkv", "mp3", "wav", "aac", "flac", "ogg", "zip",
    "rar",
];

/// Category named by an `APPFLAG`, if the flag is specific.
///
/// Flag 70 ("other") and unknown flags return `None` so the caller can fall
/// back to the extension.
pub fn from_flag(flag: &str) -> Option<AttachmentCategory> {
    match flag.trim() {
        "20" => Some(AttachmentCategory::Image),
        "30" => Some(AttachmentCategory::Audio),
        "40" => Some(AttachmentCategory::Document),
        "50" | "90" | VIDEO_PAGE_FLAG => Some(AttachmentCategory::Video),
        "60" => Some(AttachmentCategory::Archive),
        "80" => Some(AttachmentCategory::Flash),
        _ => None,
    }
}

/// Category for a lower-case extension without the dot.
pub fn from_extension(ext: &str) -> AttachmentCategory {
    let tables = [
        (IMAGE, AttachmentCategory::Image),
        (VIDEO, AttachmentCategory::Video),
        (AUDIO, AttachmentCategory::Audio),
        (DOCUMENT, AttachmentCategory::Document),
        (ARCHIVE, AttachmentCategory::Archive),
        (FLASH, AttachmentCategory::Flash),
    ];
    tables
        .iter()
        .find(|(exts, _)| exts.contains(&ext))
        .map_or(AttachmentCategory::Other, |(_, category)| *category)
}

/// Category of a URL, preferring an explicit flag.
pub fn infer(flag: Option<&str>, url: &str) -> AttachmentCategory {
    flag.and_then(from_flag).unwrap_or_else(|| {
        super::url::extension(url).map_or(AttachmentCategory::Other, |ext| from_extension(&ext))
    })
}

pub fn is_anchor_attachment(url: &str) -> bool {
    super::url::extension(url).is_some_and(|ext| ANCHOR_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttachmentCategory::*;

    #[test]
    fn test_flag_table() {
        assert_eq!(from_flag("20"), Some(Image));
        assert_eq!(from_flag("30"), Some(Audio));
        assert_eq!(from_flag("40"), Some(Document));
        assert_eq!(from_flag("50"), Some(Video));
        assert_eq!(from_flag("60"), Some(Archive));
        assert_eq!(from_flag("80"), Some(Flash));
        assert_eq!(from_flag("90"), Some(Video));
        assert_eq!(from_flag(" 140 "), Some(Video));
        assert_eq!(from_flag("70"), None);
        assert_eq!(from_flag("999"), None);
    }

    #[test]
    fn test_extension_table() {
        assert_eq!(from_extension("tiff"), Image);
        assert_eq!(from_extension("webm"), Video);
        assert_eq!(from_extension("m4a"), Audio);
        assert_eq!(from_extension("xlsx"), Document);
        assert_eq!(from_extension("7z"), Archive);
        assert_eq!(from_extension("swf"), Flash);
        assert_eq!(from_extension("exe"), Other);
    }

    #[test]
    fn test_infer_prefers_flag() {
        assert_eq!(infer(Some("50"), "/a/b.pdf"), Video);
        assert_eq!(infer(Some("70"), "/a/b.pdf"), Document);
        assert_eq!(infer(None, "/a/b.MP3?x=1"), Audio);
        assert_eq!(infer(None, "/a/b"), Other);
    }

    #[test]
    fn test_anchor_allow_list() {
        assert!(is_anchor_attachment("/files/report.PDF"));
        assert!(is_anchor_attachment("http://a.com/x.rar"));
        assert!(!is_anchor_attachment("/news/other.html"));
        assert!(!is_anchor_attachment("/files/a.7z"));
        assert!(!is_anchor_attachment("#top"));
    }
}
