use crate::types::{RiskAssessment, RiskTier};

pub const DANGEROUS_EXTENSIONS: [&str; 18] = [
    "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js", "jar", "msi", "dmg", "app", "ps1", "py",
    "pl", "sh", "elf", "dll",
];

pub const SAFE_EXTENSIONS: [&str; 23] = [
    "txt", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "jpg", "jpeg", "png", "gif", "bmp",
    "svg", "mp3", "mp4", "avi", "mov", "zip", "rar", "7z", "tar", "gz",
];

/// Maps a bare extension to a risk tier. Total: anything unlisted is medium.
pub fn classify(extension: &str) -> RiskAssessment {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();

    let (tier, reason) = if DANGEROUS_EXTENSIONS.contains(&ext.as_str()) {
        (RiskTier::High, "Executable or script file")
    } else if SAFE_EXTENSIONS.contains(&ext.as_str()) {
        (RiskTier::Low, "Common safe file type")
    } else {
        (RiskTier::Medium, "Unknown file type")
    };

    RiskAssessment {
        tier,
        reason: reason.to_string(),
    }
}
