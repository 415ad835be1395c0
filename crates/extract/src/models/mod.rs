mod detection;
mod warning;
mod work;

pub use self::detection::{Classification, Detection, PatternTag};
pub use self::warning::{ResourceWarning, WarningReason};
pub use self::work::{Work, WorkKind};

fn sanitize(s: impl AsRef<str>) -> String {
    s.as_ref().trim().to_lowercase().replace(['-', '_', ' '], "")
}
