//! Content sniffing: classify a file by its leading bytes, never by its name.

/// Number of leading bytes inspected when sniffing an upload
pub const SAMPLE_LEN: usize = 2048;

/// Reported when no signature matches
pub const UNKNOWN_MIME: &str = "application/octet-stream";

const EBML_HEADER_ID: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const DOC_TYPE_ID: [u8; 2] = [0x42, 0x82];

/// Classify a leading byte sample and return a canonical MIME type
///
/// Binary formats are detected from magic bytes with `infer`. SVG has no
/// binary signature, so it is recognised from its markup first. `infer`
/// only knows one Matroska header layout and reports every other EBML file
/// as WebM, so EBML answers are settled by the header's DocType. It also
/// misses MP3 frames without an ID3 tag unless they are MPEG-1 without CRC,
/// which the Layer III frame sync check covers. The MIME names `infer`
/// reports are normalized to the ones in
/// [`MediaFormat::mime_type`](super::MediaFormat::mime_type).
pub fn sniff_mime(sample: &[u8]) -> &'static str {
    if is_svg(sample) {
        return "image/svg+xml";
    }

    match infer::get(sample) {
        Some(kind) if sample.starts_with(&EBML_HEADER_ID) => match ebml_doc_type(sample) {
            Some(b"matroska") => "video/x-matroska",
            Some(b"webm") => "video/webm",
            _ => normalize(kind.mime_type()),
        },
        Some(kind) => normalize(kind.mime_type()),
        None if is_mpeg_layer3(sample) => "audio/mpeg",
        None => UNKNOWN_MIME,
    }
}

fn normalize(mime: &'static str) -> &'static str {
    match mime {
        "audio/x-flac" => "audio/flac",
        "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "audio/wav",
        "audio/aiff" => "audio/x-aiff",
        "audio/x-aac" => "audio/aac",
        "image/jpg" => "image/jpeg",
        other => other,
    }
}

fn is_svg(sample: &[u8]) -> bool {
    let text = String::from_utf8_lossy(sample);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    let lowered = text.to_ascii_lowercase();

    if lowered.starts_with("<svg") {
        return true;
    }

    let markup_prologue = lowered.starts_with("<?xml")
        || lowered.starts_with("<!doctype svg")
        || lowered.starts_with("<!--");
    markup_prologue && lowered.contains("<svg")
}

/// MPEG audio frame sync (11 set bits) with the layer field set to Layer III
///
/// Any MPEG version and either CRC setting is accepted. ADTS (AAC) frames
/// carry layer `00` and never match.
fn is_mpeg_layer3(sample: &[u8]) -> bool {
    match sample {
        [0xFF, b1, b2, ..] => {
            let bitrate = b2 >> 4;
            let sample_rate = (b2 >> 2) & 0b11;
            b1 & 0xE6 == 0xE2 && bitrate != 0xF && sample_rate != 0b11
        }
        _ => false,
    }
}

/// Value of the DocType element inside the leading EBML header
///
/// Walks the header's children instead of assuming fixed offsets: muxers
/// differ in how wide they write the header size and in element order.
fn ebml_doc_type(sample: &[u8]) -> Option<&[u8]> {
    let rest = sample.strip_prefix(&EBML_HEADER_ID[..])?;
    let (header_len, width) = read_vint(rest)?;
    let body = &rest[width..];
    let mut body = &body[..header_len.min(body.len())];

    while !body.is_empty() {
        let id_width = vint_width(body[0])?;
        let id = body.get(..id_width)?;
        let (len, width) = read_vint(body.get(id_width..)?)?;
        let start = id_width + width;
        let end = start.checked_add(len)?;
        let data = body.get(start..end)?;
        if id == DOC_TYPE_ID {
            // String elements may be padded with NULs
            let trimmed = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            return Some(&data[..trimmed]);
        }
        body = &body[end..];
    }
    None
}

fn vint_width(first: u8) -> Option<usize> {
    match first.leading_zeros() {
        8 => None,
        zeros => Some(zeros as usize + 1),
    }
}

/// Decode an EBML variable-length size, returning it with its encoded width
fn read_vint(bytes: &[u8]) -> Option<(usize, usize)> {
    let first = *bytes.first()?;
    let width = vint_width(first)?;
    let tail = bytes.get(1..width)?;
    let value = tail
        .iter()
        .fold(u64::from(first & (0x7F >> (width - 1))), |acc, b| {
            (acc << 8) | u64::from(*b)
        });
    Some((usize::try_from(value).ok()?, width))
}
