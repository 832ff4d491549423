use crate::config::MIB;
use crate::file_type::classify;
use crate::hash_store::HashStore;
use crate::indicators::{check_bytes, is_script_like, ContentAnalysis};
use crate::types::*;
use crate::utils::sha256_file;

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const LARGE_FILE_SIZE: u64 = 100 * MIB;

// Scores are tracked in tenths of a point so the 0.7 content weight stays exact.
const TYPE_HIGH_TENTHS: u32 = 300;
const TYPE_MEDIUM_TENTHS: u32 = 150;
const CONTENT_WEIGHT_TENTHS: u32 = 7;
const LARGE_FILE_TENTHS: u32 = 100;
const MAX_TENTHS: u32 = 1000;

/// Fuses hash lookup, file-type risk and content heuristics into a verdict.
#[derive(Clone)]
pub struct VerdictEngine {
    hash_store: Arc<HashStore>,
}

impl VerdictEngine {
    pub fn new(hash_store: Arc<HashStore>) -> Self {
        Self { hash_store }
    }

    pub fn hash_store(&self) -> &HashStore {
        &self.hash_store
    }

    /// Pure function of the descriptor, the store and the content. `content`
    /// is only looked at for script-like extensions.
    pub fn evaluate(&self, descriptor: &FileDescriptor, content: Option<&[u8]>) -> Verdict {
        let known_malicious = self.hash_store.contains(&descriptor.content_hash);
        let risk = classify(&descriptor.extension);

        let content_analysis = match content {
            Some(bytes) if is_script_like(&descriptor.extension) => check_bytes(bytes),
            _ => ContentAnalysis::default(),
        };

        let raw_tenths = if known_malicious {
            MAX_TENTHS
        } else {
            let type_tenths = match risk.tier {
                RiskTier::High => TYPE_HIGH_TENTHS,
                RiskTier::Medium => TYPE_MEDIUM_TENTHS,
                RiskTier::Low => 0,
            };
            let size_tenths = if descriptor.size_bytes > LARGE_FILE_SIZE {
                LARGE_FILE_TENTHS
            } else {
                0
            };
            type_tenths + content_analysis.score as u32 * CONTENT_WEIGHT_TENTHS + size_tenths
        };
        let tenths = raw_tenths.min(MAX_TENTHS);

        let is_malicious = known_malicious || tenths > 500;
        let threat_level = if known_malicious || tenths > 800 {
            ThreatLevel::Critical
        } else if tenths > 600 {
            ThreatLevel::High
        } else if tenths > 400 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        };

        let detection_count = if is_malicious { tenths / 100 + 1 } else { 0 };
        let detection_categories = if is_malicious {
            let share = |pct: u32| (tenths * pct / 1000) as u8;
            DetectionCategories {
                virus: share(30),
                spyware: share(20),
                trojan: share(25),
                ransomware: share(15),
                adware: share(10),
            }
        } else {
            DetectionCategories::default()
        };

        let mut findings = Vec::new();
        if known_malicious {
            findings.push(Finding::new(FindingKind::KnownMalware, Severity::Critical));
        }
        if risk.tier == RiskTier::High {
            findings.push(
                Finding::new(FindingKind::DangerousFileType, Severity::High)
                    .with_detail(FindingDetail::Text(risk.reason.clone())),
            );
        }
        findings.extend(content_analysis.findings);

        let verdict = Verdict {
            overall_score: ((tenths + 5) / 10) as u8,
            threat_level,
            is_malicious,
            detection_count,
            detection_categories,
            findings,
            known_malicious,
        };

        debug!(
            hash = %descriptor.content_hash,
            score = verdict.overall_score,
            level = ?verdict.threat_level,
            "Verdict computed"
        );
        verdict
    }

    /// Hashes a file on disk and evaluates it. Content is read only for
    /// script-like files; a read failure there is treated as no content.
    pub fn analyze_file(&self, path: &Path, name: &str) -> io::Result<(FileDescriptor, Verdict)> {
        let size = fs::metadata(path)?.len();
        let hash = sha256_file(path)?;
        let descriptor = FileDescriptor::new(name, size, &hash)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let content = if is_script_like(&descriptor.extension) {
            fs::read(path).ok()
        } else {
            None
        };

        let verdict = self.evaluate(&descriptor, content.as_deref());
        info!(
            file = %descriptor.name,
            size,
            hash = %descriptor.content_hash,
            malicious = verdict.is_malicious,
            "File analyzed"
        );
        Ok((descriptor, verdict))
    }
}
