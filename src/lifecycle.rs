//! Scan lifecycle: `pending` until paid for, then `completed` under a
//! separate report id.
//!
//! The two maps are the only shared mutable state in the service. A scan id
//! is consumed by removing it from `pending`, so concurrent confirmations of
//! the same scan complete it at most once.

use crate::config::{AppConfig, PaymentPolicy};
use crate::error::{ScanError, ScanResult};
use crate::file_type::classify;
use crate::payment::{PaymentIntent, PaymentStatus, SharedGate};
use crate::types::*;

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub policy: PaymentPolicy,
    pub premium_threshold: u64,
    pub price: u64,
    pub currency: String,
    pub payment_timeout: Duration,
    pub report_ttl: Option<Duration>,
}

impl From<&AppConfig> for LifecycleSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            policy: config.payment_policy,
            premium_threshold: config.premium_threshold,
            price: config.premium_price,
            currency: config.premium_currency.clone(),
            payment_timeout: config.payment_timeout,
            report_ttl: config.report_ttl,
        }
    }
}

pub struct ScanLifecycle {
    pending: Mutex<HashMap<ScanId, ScanRecord>>,
    completed: Mutex<HashMap<ReportId, ScanRecord>>,
    gate: SharedGate,
    settings: LifecycleSettings,
    report_ttl: Option<chrono::Duration>,
}

impl ScanLifecycle {
    pub fn new(gate: SharedGate, settings: LifecycleSettings) -> Self {
        let report_ttl = settings
            .report_ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok());

        Self {
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            gate,
            settings,
            report_ttl,
        }
    }

    /// Returns the reason payment is required, if it is. Independent of the
    /// verdict.
    pub fn payment_requirement(&self, descriptor: &FileDescriptor) -> Option<String> {
        if descriptor.size_bytes > self.settings.premium_threshold {
            return Some(format!(
                "Large file ({:.1}MB) - Premium scan required",
                descriptor.size_mib()
            ));
        }

        if self.settings.policy == PaymentPolicy::SizeOrDangerousType
            && classify(&descriptor.extension).tier == RiskTier::High
        {
            return Some(format!(
                "Potentially dangerous file type (.{}) - Premium scan required",
                descriptor.extension
            ));
        }

        None
    }

    /// Registers a scan. Scans that need payment wait in `pending`; the rest
    /// are completed at once and the ticket carries their report id.
    pub fn create(&self, descriptor: FileDescriptor, verdict: Verdict) -> ScanTicket {
        let payment_reason = self.payment_requirement(&descriptor);
        let requires_payment = payment_reason.is_some();
        let scan_id = ScanId::generate();
        let now = Utc::now();

        let mut record = ScanRecord {
            scan_id: scan_id.clone(),
            report_id: None,
            descriptor,
            verdict,
            requires_payment,
            payment_reason: payment_reason.clone(),
            payment_intent_id: None,
            state: ScanState::Pending,
            created_at: now,
            completed_at: None,
        };

        let report_id = if requires_payment {
            info!(scan_id = %scan_id, reason = ?payment_reason, "Scan pending payment");
            self.pending.lock().insert(scan_id.clone(), record);
            None
        } else {
            let report_id = ReportId::generate();
            record.state = ScanState::Completed;
            record.report_id = Some(report_id.clone());
            record.completed_at = Some(now);
            info!(scan_id = %scan_id, report_id = %report_id, "Scan completed without payment");
            self.completed.lock().insert(report_id.clone(), record);
            Some(report_id)
        };

        ScanTicket {
            scan_id,
            requires_payment,
            payment_reason,
            report_id,
        }
    }

    /// Opens a payment intent for a pending scan and remembers its id.
    pub fn request_payment(&self, scan_id: &ScanId) -> ScanResult<PaymentIntent> {
        let metadata = {
            let pending = self.pending.lock();
            let record = pending
                .get(scan_id)
                .ok_or_else(|| ScanError::not_found(scan_id))?;

            let mut metadata = BTreeMap::new();
            metadata.insert("scanId".to_string(), scan_id.to_string());
            metadata.insert("fileName".to_string(), record.descriptor.name.clone());
            metadata.insert(
                "fileSize".to_string(),
                record.descriptor.size_bytes.to_string(),
            );
            metadata.insert("scanType".to_string(), "premium".to_string());
            metadata
        };

        let intent =
            self.gate
                .create_intent(self.settings.price, &self.settings.currency, &metadata)?;

        // The scan may have been confirmed while the gate was working.
        match self.pending.lock().get_mut(scan_id) {
            Some(record) => record.payment_intent_id = Some(intent.intent_id.clone()),
            None => return Err(ScanError::not_found(scan_id)),
        }

        info!(scan_id = %scan_id, intent_id = %intent.intent_id, gate = self.gate.name(), "Payment intent created");
        Ok(intent)
    }

    pub fn confirm_payment(&self, scan_id: &ScanId, proof: &str) -> ScanResult<ScanRecord> {
        self.confirm_payment_with_timeout(scan_id, proof, self.settings.payment_timeout)
    }

    /// Promotes a pending scan once the gate reports success for `proof`
    /// (a payment intent id). The gate call happens outside the lock.
    pub fn confirm_payment_with_timeout(
        &self,
        scan_id: &ScanId,
        proof: &str,
        timeout: Duration,
    ) -> ScanResult<ScanRecord> {
        match self.pending.lock().get(scan_id) {
            Some(record) => check_proof(record, proof)?,
            None => {
                warn!(scan_id = %scan_id, "Payment confirmation for unknown scan");
                return Err(ScanError::not_found(scan_id));
            }
        }

        let status = self.gate.confirm(proof, timeout).map_err(|e| {
            warn!(scan_id = %scan_id, error = %e, "Payment gate failed");
            ScanError::from(e)
        })?;

        if status != PaymentStatus::Succeeded {
            warn!(scan_id = %scan_id, ?status, "Payment not completed");
            return Err(ScanError::PaymentIncomplete {
                reason: format!("payment status is {:?}", status).to_lowercase(),
                retryable: status == PaymentStatus::Pending,
            });
        }

        let mut record = {
            let mut pending = self.pending.lock();
            // Lost the race to another confirmation.
            let Some(record) = pending.get(scan_id) else {
                return Err(ScanError::not_found(scan_id));
            };
            // A new intent may have been requested while the gate was working.
            check_proof(record, proof)?;
            match pending.remove(scan_id) {
                Some(record) => record,
                None => return Err(ScanError::not_found(scan_id)),
            }
        };

        let report_id = ReportId::generate();
        record.state = ScanState::Completed;
        record.report_id = Some(report_id.clone());
        record.payment_intent_id = Some(proof.to_string());
        record.completed_at = Some(Utc::now());

        self.completed.lock().insert(report_id.clone(), record.clone());
        info!(scan_id = %scan_id, report_id = %report_id, "Scan completed after payment");
        Ok(record)
    }

    pub fn get_report(&self, report_id: &ReportId) -> ScanResult<ScanRecord> {
        let mut completed = self.completed.lock();
        let record = completed
            .get(report_id)
            .ok_or_else(|| ScanError::not_found(report_id))?;

        if self.is_expired(record) {
            completed.remove(report_id);
            return Err(ScanError::not_found(report_id));
        }
        Ok(record.clone())
    }

    /// Drops expired reports and pending scans abandoned for longer than the
    /// TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.report_ttl.is_none() {
            return 0;
        }

        let reports = {
            let mut completed = self.completed.lock();
            let before = completed.len();
            completed.retain(|_, record| !self.is_expired(record));
            before - completed.len()
        };
        let abandoned = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|_, record| !self.is_expired(record));
            before - pending.len()
        };

        if reports + abandoned > 0 {
            info!(reports, abandoned, "Purged expired scans");
        }
        reports + abandoned
    }

    /// Completed records age from completion, pending ones from creation.
    /// A deadline past the representable range never expires.
    fn is_expired(&self, record: &ScanRecord) -> bool {
        let Some(ttl) = self.report_ttl else {
            return false;
        };
        let since = record.completed_at.unwrap_or(record.created_at);
        match since.checked_add_signed(ttl) {
            Some(deadline) => deadline <= Utc::now(),
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().len()
    }
}

/// The proof must be the intent issued for this scan.
fn check_proof(record: &ScanRecord, proof: &str) -> ScanResult<()> {
    match record.payment_intent_id.as_deref() {
        Some(issued) if issued == proof => Ok(()),
        Some(_) => {
            warn!(scan_id = %record.scan_id, "Payment proof does not match issued intent");
            Err(ScanError::PaymentIncomplete {
                reason: "payment does not belong to this scan".to_string(),
                retryable: false,
            })
        }
        None => Err(ScanError::PaymentIncomplete {
            reason: "no payment intent was issued for this scan".to_string(),
            retryable: false,
        }),
    }
}
