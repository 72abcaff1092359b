pub mod format;
pub mod sniff;

pub use format::MediaFormat;
pub use sniff::{sniff_mime, SAMPLE_LEN};
