use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DescriptorError;

/// Immutable identity of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    /// Lowercased, without the leading dot. Empty when the name has no dot.
    pub extension: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256, always 64 chars.
    pub content_hash: String,
}

impl FileDescriptor {
    /// Builds a descriptor from a hash that was computed elsewhere (server-side
    /// from bytes, or supplied by a client).
    pub fn new(name: &str, size_bytes: u64, content_hash: &str) -> Result<Self, DescriptorError> {
        let content_hash = content_hash.trim().to_ascii_lowercase();
        if !is_sha256_hex(&content_hash) {
            return Err(DescriptorError::InvalidHash(content_hash));
        }

        Ok(Self {
            name: name.to_string(),
            extension: extension_of(name),
            size_bytes,
            content_hash,
        })
    }

    pub fn size_mib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(rename = "risk")]
    pub tier: RiskTier,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    KnownMalware,
    DangerousFileType,
    SuspiciousPattern,
    EncodedContent,
    MultipleUrls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindingDetail {
    Text(String),
    Count(usize),
}

/// One signal that contributed to a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<FindingDetail>,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity) -> Self {
        Self {
            kind,
            severity,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: FindingDetail) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionCategories {
    pub virus: u8,
    pub spyware: u8,
    pub trojan: u8,
    pub ransomware: u8,
    pub adware: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub overall_score: u8,
    pub threat_level: ThreatLevel,
    pub is_malicious: bool,
    pub detection_count: u32,
    pub detection_categories: DetectionCategories,
    #[serde(rename = "threats")]
    pub findings: Vec<Finding>,
    #[serde(rename = "isKnownMalicious")]
    pub known_malicious: bool,
}

impl Verdict {
    fn has_dangerous_type(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.kind == FindingKind::DangerousFileType)
    }

    pub fn description(&self) -> &'static str {
        if self.is_malicious {
            "The file contains potentially harmful content. Please avoid opening it."
        } else if self.has_dangerous_type() {
            "The file type is potentially dangerous. Exercise caution when opening."
        } else {
            "The file appears safe and does not contain any known threats."
        }
    }

    pub fn recommendation(&self) -> &'static str {
        if self.is_malicious {
            "We recommend deleting the file immediately or running a malware scan on your system."
        } else if self.has_dangerous_type() {
            "Consider scanning with premium tools or running in a sandbox environment."
        } else {
            "You can safely proceed with this file."
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Single-use handle for a scan awaiting payment. 128 random bits, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl From<&str> for ScanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable handle for a completed report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl From<&str> for ReportId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_id: ScanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<ReportId>,
    pub descriptor: FileDescriptor,
    pub verdict: Verdict,
    pub requires_payment: bool,
    pub payment_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    pub state: ScanState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What `ScanLifecycle::create` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTicket {
    pub scan_id: ScanId,
    pub requires_payment: bool,
    pub payment_reason: Option<String>,
    /// Set when no payment was needed and the report is already available.
    pub report_id: Option<ReportId>,
}

// HTTP wire types

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub scan_id: ScanId,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub file_type: RiskAssessment,
    pub is_potentially_dangerous: bool,
    pub is_known_malicious: bool,
    pub requires_payment: bool,
    pub payment_reason: Option<String>,
    pub scan_type: String,
    pub report_id: Option<ReportId>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub file_name: String,
    pub file_hash: String,
    pub file_size: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    #[serde(rename = "scanId")]
    pub scan_id: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub success: bool,
    pub scan_id: ScanId,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: u64,
    pub currency: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub scan_id: String,
    pub payment_intent_id: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse<'a> {
    #[serde(flatten)]
    pub record: &'a ScanRecord,
    pub description: &'static str,
    pub recommendation: &'static str,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub malware_database_size: usize,
    pub pending_scans: usize,
    pub completed_reports: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn descriptor_normalizes_hash_and_extension() {
        let d = FileDescriptor::new("Invoice.PDF", 10, &HASH.to_uppercase()).unwrap();
        assert_eq!(d.extension, "pdf");
        assert_eq!(d.content_hash, HASH);
    }

    #[test]
    fn descriptor_rejects_malformed_hash() {
        assert!(FileDescriptor::new("a.txt", 1, "abc").is_err());
        assert!(FileDescriptor::new("a.txt", 1, &"g".repeat(64)).is_err());
    }

    #[test]
    fn extension_takes_last_segment() {
        assert_eq!(extension_of("archive.tar.GZ"), "gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("trailing."), "");
    }

    #[test]
    fn tokens_are_32_hex_and_distinct() {
        let a = ScanId::generate();
        let b = ScanId::generate();
        let hex = a.to_string();
        assert_eq!(hex.len(), 32);
        assert!(hex.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn finding_serializes_with_type_key() {
        let f = Finding::new(FindingKind::MultipleUrls, Severity::Low)
            .with_detail(FindingDetail::Count(7));
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "multiple_urls");
        assert_eq!(json["severity"], "low");
        assert_eq!(json["detail"], 7);
    }
}
