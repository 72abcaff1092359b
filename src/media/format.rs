use serde::Serialize;
use std::fmt;

/// Media kind, used for logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// Every media format accepted as input and produced as output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Png,
    Jpeg,
    Gif,
    Svg,
    Webp,
    Mp4,
    Mkv,
    Wmv,
    Avi,
    Mp3,
    Wav,
    Flac,
    Aiff,
    Aac,
}

impl MediaFormat {
    pub const ALL: [MediaFormat; 14] = [
        MediaFormat::Png,
        MediaFormat::Jpeg,
        MediaFormat::Gif,
        MediaFormat::Svg,
        MediaFormat::Webp,
        MediaFormat::Mp4,
        MediaFormat::Mkv,
        MediaFormat::Wmv,
        MediaFormat::Avi,
        MediaFormat::Mp3,
        MediaFormat::Wav,
        MediaFormat::Flac,
        MediaFormat::Aiff,
        MediaFormat::Aac,
    ];

    /// Look up a format by file extension (case-insensitive, leading dot allowed)
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let format = match extension.as_str() {
            "png" => MediaFormat::Png,
            "jpg" | "jpeg" => MediaFormat::Jpeg,
            "gif" => MediaFormat::Gif,
            "svg" => MediaFormat::Svg,
            "webp" => MediaFormat::Webp,
            "mp4" => MediaFormat::Mp4,
            "mkv" => MediaFormat::Mkv,
            "wmv" => MediaFormat::Wmv,
            "avi" => MediaFormat::Avi,
            "mp3" => MediaFormat::Mp3,
            "wav" => MediaFormat::Wav,
            "flac" => MediaFormat::Flac,
            "aiff" => MediaFormat::Aiff,
            "aac" => MediaFormat::Aac,
            _ => return None,
        };
        Some(format)
    }

    /// Canonical MIME type; uploads must declare exactly this value
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaFormat::Png => "image/png",
            MediaFormat::Jpeg => "image/jpeg",
            MediaFormat::Gif => "image/gif",
            MediaFormat::Svg => "image/svg+xml",
            MediaFormat::Webp => "image/webp",
            MediaFormat::Mp4 => "video/mp4",
            MediaFormat::Mkv => "video/x-matroska",
            MediaFormat::Wmv => "video/x-ms-wmv",
            MediaFormat::Avi => "video/x-msvideo",
            MediaFormat::Mp3 => "audio/mpeg",
            MediaFormat::Wav => "audio/wav",
            MediaFormat::Flac => "audio/flac",
            MediaFormat::Aiff => "audio/x-aiff",
            MediaFormat::Aac => "audio/aac",
        }
    }

    pub fn kind(self) -> MediaKind {
        match self {
            MediaFormat::Png
            | MediaFormat::Jpeg
            | MediaFormat::Gif
            | MediaFormat::Svg
            | MediaFormat::Webp => MediaKind::Image,
            MediaFormat::Mp4 | MediaFormat::Mkv | MediaFormat::Wmv | MediaFormat::Avi => {
                MediaKind::Video
            }
            MediaFormat::Mp3
            | MediaFormat::Wav
            | MediaFormat::Flac
            | MediaFormat::Aiff
            | MediaFormat::Aac => MediaKind::Audio,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_lookup_ignores_case_and_dot() {
        assert_eq!(MediaFormat::from_extension("PNG"), Some(MediaFormat::Png));
        assert_eq!(MediaFormat::from_extension(".webp"), Some(MediaFormat::Webp));
        assert_eq!(MediaFormat::from_extension("Mkv"), Some(MediaFormat::Mkv));
    }

    #[test]
    fn jpg_and_jpeg_share_a_mime_type() {
        let jpg = MediaFormat::from_extension("jpg").unwrap();
        let jpeg = MediaFormat::from_extension("jpeg").unwrap();
        assert_eq!(jpg, jpeg);
        assert_eq!(jpg.mime_type(), "image/jpeg");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert_eq!(MediaFormat::from_extension("exe"), None);
        assert_eq!(MediaFormat::from_extension(""), None);
        assert_eq!(MediaFormat::from_extension("tar.gz"), None);
    }

    #[test]
    fn mime_types_are_unique_per_format() {
        let mut seen = std::collections::HashSet::new();
        for format in MediaFormat::ALL {
            assert!(seen.insert(format.mime_type()), "duplicate mime for {:?}", format);
        }
    }

    #[test]
    fn kinds_cover_images_video_and_audio() {
        assert_eq!(MediaFormat::Svg.kind(), MediaKind::Image);
        assert_eq!(MediaFormat::Avi.kind(), MediaKind::Video);
        assert_eq!(MediaFormat::Aac.kind(), MediaKind::Audio);
    }
}
