//! Content heuristics for script-like uploads.
//!
//! Additive scoring: every distinct suspicious pattern is worth 10, a large
//! base64 blob 15, and a burst of URLs 5. The sum is clamped to 100.

use crate::types::{Finding, FindingDetail, FindingKind, Severity};

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions whose content is worth reading as text.
pub const SCRIPT_EXTENSIONS: [&str; 6] = ["txt", "js", "vbs", "bat", "ps1", "py"];

pub const PATTERN_SCORE: u32 = 10;
pub const ENCODED_SCORE: u32 = 15;
pub const URL_SCORE: u32 = 5;
pub const ENCODED_MIN_LEN: usize = 1000;
pub const URL_THRESHOLD: usize = 5;
pub const MALICIOUS_CONTENT_SCORE: u8 = 20;

// (label, pattern)
const SUSPICIOUS: [(&str, &str); 14] = [
    ("eval(", r"(?i)eval\s*\("),
    ("document.write(", r"(?i)document\.write\s*\("),
    ("window.open(", r"(?i)window\.open\s*\("),
    ("RegExp(", r"(?i)RegExp\s*\("),
    ("Function(", r"(?i)Function\s*\("),
    ("setTimeout(", r"(?i)setTimeout\s*\("),
    ("setInterval(", r"(?i)setInterval\s*\("),
    ("ActiveXObject", r"(?i)ActiveXObject"),
    ("WScript.Shell", r"(?i)WScript\.Shell"),
    ("cmd.exe", r"(?i)cmd\.exe"),
    ("powershell", r"(?i)powershell"),
    ("rundll32", r"(?i)rundll32"),
    ("regsvr32", r"(?i)regsvr32"),
    ("certutil", r"(?i)certutil"),
];

static SUSPICIOUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SUSPICIOUS
        .iter()
        .map(|(label, pattern)| (*label, Regex::new(pattern).expect("static pattern")))
        .collect()
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("static pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentAnalysis {
    pub score: u8,
    pub malicious: bool,
    pub findings: Vec<Finding>,
}

pub fn is_script_like(extension: &str) -> bool {
    SCRIPT_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
}

pub fn check_indicators(content: &str) -> ContentAnalysis {
    let mut score = 0u32;
    let mut findings = Vec::new();

    for (label, pattern) in SUSPICIOUS_PATTERNS.iter() {
        if pattern.is_match(content) {
            score += PATTERN_SCORE;
            findings.push(
                Finding::new(FindingKind::SuspiciousPattern, Severity::Medium)
                    .with_detail(FindingDetail::Text(label.to_string())),
            );
        }
    }

    if content.contains("base64") && content.chars().count() > ENCODED_MIN_LEN {
        score += ENCODED_SCORE;
        findings.push(Finding::new(FindingKind::EncodedContent, Severity::High));
    }

    let urls = URL_PATTERN.find_iter(content).count();
    if urls > URL_THRESHOLD {
        score += URL_SCORE;
        findings.push(
            Finding::new(FindingKind::MultipleUrls, Severity::Low)
                .with_detail(FindingDetail::Count(urls)),
        );
    }

    let score = score.min(100) as u8;
    ContentAnalysis {
        score,
        malicious: score > MALICIOUS_CONTENT_SCORE,
        findings,
    }
}

/// Scans raw bytes. Anything that is not valid UTF-8 gets the neutral result.
pub fn check_bytes(bytes: &[u8]) -> ContentAnalysis {
    match std::str::from_utf8(bytes) {
        Ok(text) => check_indicators(text),
        Err(_) => ContentAnalysis::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clean_content_scores_zero() {
        let result = check_indicators("hello world, nothing to see here");
        assert_eq!(result, ContentAnalysis::default());
    }

    #[test]
    fn repeated_pattern_counts_once() {
        let result = check_indicators("eval(x); eval(x); EVAL (x)");
        assert_eq!(result.score, 10);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(
            result.findings[0].detail,
            Some(FindingDetail::Text("eval(".to_string()))
        );
        assert!(!result.malicious);
    }

    #[test]
    fn distinct_patterns_accumulate() {
        let result = check_indicators(
            "var s = new ActiveXObject('WScript.Shell'); s.Run('cmd.exe /c powershell');",
        );
        assert_eq!(result.score, 40);
        assert!(result.malicious);
        assert!(result
            .findings
            .iter()
            .all(|f| f.kind == FindingKind::SuspiciousPattern && f.severity == Severity::Medium));
    }

    #[test]
    fn base64_needs_long_content() {
        assert_eq!(check_indicators("base64").score, 0);

        let long = format!("base64,{}", "A".repeat(1000));
        let result = check_indicators(&long);
        assert_eq!(result.score, 15);
        assert_eq!(result.findings[0].kind, FindingKind::EncodedContent);
        assert_eq!(result.findings[0].severity, Severity::High);
    }

    #[test]
    fn more_than_five_urls() {
        let five = "http://a.example https://b.example http://c http://d http://e";
        assert_eq!(check_indicators(five).score, 0);

        let six = format!("{} https://f.example/path", five);
        let result = check_indicators(&six);
        assert_eq!(result.score, 5);
        assert_eq!(result.findings[0].detail, Some(FindingDetail::Count(6)));
    }

    #[test]
    fn every_pattern_together_is_clamped() {
        let mut content: String = SUSPICIOUS.iter().map(|(label, _)| *label).collect::<Vec<_>>().join(" ");
        content.push_str(" base64 ");
        content.push_str(&"x".repeat(1000));
        for i in 0..6 {
            content.push_str(&format!(" http://host{}.example", i));
        }
        let result = check_indicators(&content);
        assert_eq!(result.score, 100);
        assert_eq!(result.findings.len(), 16);
    }

    #[test]
    fn binary_content_is_neutral() {
        assert_eq!(check_bytes(&[0xff, 0xfe, 0x00, 0x65]), ContentAnalysis::default());
        assert_eq!(check_bytes(b"eval(1)").score, 10);
    }

    #[test]
    fn script_extensions() {
        assert!(is_script_like("TXT"));
        assert!(is_script_like("ps1"));
        assert!(!is_script_like("exe"));
        assert!(!is_script_like("pdf"));
    }

    proptest! {
        #[test]
        fn adding_a_pattern_never_lowers_the_score(
            base in ".{0,300}",
            idx in 0usize..SUSPICIOUS.len(),
        ) {
            let before = check_indicators(&base).score;
            let after = check_indicators(&format!("{} {}", base, SUSPICIOUS[idx].0)).score;
            prop_assert!(after >= before);
        }

        #[test]
        fn score_stays_in_range(content in ".{0,2000}") {
            let result = check_indicators(&content);
            prop_assert!(result.score <= 100);
            prop_assert_eq!(result.malicious, result.score > 20);
        }
    }
}
