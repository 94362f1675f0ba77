//! Merging observed on-chain redemptions into a document's claimed overlay.
//!
//! Each account moves `unclaimed -> claimed` at most once. Repeated or
//! reordered deliveries of the same redemption are absorbed: the first
//! observed timestamp wins and later ones are reported, not applied.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{Address, NodeHash};
use crate::document::{DistributionDocument, DistributionId};
use crate::error::{DistributorError, Result};
use crate::leaf::decimal;

/// Result of applying one redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// The record moved from unclaimed to claimed.
    Applied,
    /// The record was already claimed; nothing changed.
    AlreadyClaimed,
}

/// A redemption observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    pub distribution_id: DistributionId,
    pub account: Address,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub timestamp: DateTime<Utc>,
}

/// Marks `account` redeemed at `redeemed_at`.
///
/// # Errors
/// [`DistributorError::UnknownClaimant`] if the account has no claim. The
/// claim set is never extended.
pub fn apply_redemption(
    document: &mut DistributionDocument,
    account: &Address,
    redeemed_at: DateTime<Utc>,
) -> Result<RedemptionOutcome> {
    let distribution_id = document.id();
    let record =
        document
            .get_mut(account)
            .ok_or_else(|| DistributorError::UnknownClaimant {
                distribution_id,
                account: account.to_string(),
            })?;

    if record.mark_claimed(redeemed_at) {
        debug!(distribution_id, %account, %redeemed_at, "claim redeemed");
        Ok(RedemptionOutcome::Applied)
    } else {
        debug!(distribution_id, %account, "duplicate redemption ignored");
        Ok(RedemptionOutcome::AlreadyClaimed)
    }
}

/// Applies one ledger event after checking it targets this document and
/// carries the committed amount.
pub fn apply_event(
    document: &mut DistributionDocument,
    event: &RedemptionEvent,
) -> Result<RedemptionOutcome> {
    if event.distribution_id != document.id() {
        return Err(DistributorError::DistributionMismatch {
            document: document.id(),
            event: event.distribution_id,
        });
    }
    if let Some(record) = document.get(&event.account) {
        if record.amount() != &event.amount {
            return Err(DistributorError::AmountMismatch {
                account: event.account.to_string(),
                committed: record.amount().to_string(),
                observed: event.amount.to_string(),
            });
        }
    }
    apply_redemption(document, &event.account, event.timestamp)
}

/// Per-event results of a reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub applied: usize,
    pub duplicates: usize,
    pub failures: Vec<(RedemptionEvent, DistributorError)>,
}

impl ReconcileReport {
    pub fn record(&mut self, event: &RedemptionEvent, result: Result<RedemptionOutcome>) {
        match result {
            Ok(RedemptionOutcome::Applied) => self.applied += 1,
            Ok(RedemptionOutcome::AlreadyClaimed) => self.duplicates += 1,
            Err(err) => {
                warn!(
                    distribution_id = event.distribution_id,
                    account = %event.account,
                    error = %err,
                    "redemption event rejected"
                );
                self.failures.push((event.clone(), err));
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies every event in order. A failing event is recorded and skipped;
/// it never blocks the rest.
pub fn reconcile_events<'a>(
    document: &mut DistributionDocument,
    events: impl IntoIterator<Item = &'a RedemptionEvent>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for event in events {
        let result = apply_event(document, event);
        report.record(event, result);
    }
    info!(
        distribution_id = document.id(),
        applied = report.applied,
        duplicates = report.duplicates,
        failed = report.failures.len(),
        "reconciled redemption events"
    );
    report
}

/// Recomputes the root from the claim set and compares it byte for byte.
///
/// Returns false on any mismatch, including claims that can no longer be
/// encoded.
pub fn verify_root(document: &DistributionDocument, expected_root: &NodeHash) -> bool {
    match document.recompute_root() {
        Ok(computed) => computed == *expected_root,
        Err(err) => {
            warn!(distribution_id = document.id(), error = %err, "root recomputation failed");
            false
        }
    }
}

/// Like [`verify_root`], but returns [`DistributorError::RootMismatch`].
pub fn ensure_root(document: &DistributionDocument, expected_root: &NodeHash) -> Result<()> {
    let computed = document.recompute_root()?;
    if computed != *expected_root {
        warn!(
            distribution_id = document.id(),
            expected = %expected_root,
            %computed,
            "on-chain root mismatch"
        );
        return Err(DistributorError::RootMismatch {
            expected: expected_root.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::{account, fixed_time, sample_document};
    use chrono::Duration;

    fn event(id: DistributionId, n: u32, amount: u32, offset_secs: i64) -> RedemptionEvent {
        RedemptionEvent {
            distribution_id: id,
            account: account(n),
            amount: BigUint::from(amount),
            timestamp: fixed_time() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_apply_redemption_sets_overlay() {
        let mut doc = sample_document(1, 3);
        let at = fixed_time();
        let outcome = apply_redemption(&mut doc, &account(1), at).unwrap();

        assert_eq!(outcome, RedemptionOutcome::Applied);
        let record = doc.get(&account(1)).unwrap();
        assert!(record.is_claimed());
        assert_eq!(record.claimed_at(), Some(at));
        assert!(!doc.get(&account(0)).unwrap().is_claimed());
        assert_eq!(doc.claimed_count(), 1);
        assert_eq!(doc.claimed_rewards(), BigUint::from(1_007u32));
    }

    #[test]
    fn test_apply_redemption_is_idempotent() {
        let mut once = sample_document(1, 4);
        apply_redemption(&mut once, &account(2), fixed_time()).unwrap();

        let mut twice = sample_document(1, 4);
        apply_redemption(&mut twice, &account(2), fixed_time()).unwrap();
        let second = apply_redemption(&mut twice, &account(2), fixed_time()).unwrap();

        assert_eq!(second, RedemptionOutcome::AlreadyClaimed);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_first_timestamp_wins() {
        let mut doc = sample_document(1, 2);
        let first = fixed_time();
        let later = first + Duration::hours(3);

        apply_redemption(&mut doc, &account(0), first).unwrap();
        let snapshot = doc.clone();
        apply_redemption(&mut doc, &account(0), later).unwrap();

        assert_eq!(doc.get(&account(0)).unwrap().claimed_at(), Some(first));
        assert_eq!(doc, snapshot);
    }

    #[test]
    fn test_unknown_claimant_does_not_insert() {
        let mut doc = sample_document(1, 2);
        let before = doc.clone();
        let err = apply_redemption(&mut doc, &account(42), fixed_time()).unwrap_err();

        assert!(matches!(err, DistributorError::UnknownClaimant { .. }));
        assert_eq!(doc, before);
        assert_eq!(doc.claim_count(), 2);
    }

    #[test]
    fn test_redemption_keeps_commitment() {
        let mut doc = sample_document(1, 5);
        let root = doc.merkle_root();
        for n in 0..5 {
            apply_redemption(&mut doc, &account(n), fixed_time()).unwrap();
        }
        assert_eq!(doc.merkle_root(), root);
        assert!(verify_root(&doc, &root));
        assert!(doc.verify_proofs().unwrap());
    }

    #[test]
    fn test_reconcile_events_isolates_failures() {
        let mut doc = sample_document(9, 3);
        let events = vec![
            event(9, 0, 1_000, 0),
            event(9, 0, 1_000, 60),
            event(8, 1, 1_007, 0),
            event(9, 1, 5, 0),
            event(9, 77, 1, 0),
            event(9, 2, 1_014, 30),
        ];

        let report = reconcile_events(&mut doc, &events);

        assert_eq!(report.applied, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failures.len(), 3);
        assert!(!report.is_clean());
        assert!(matches!(
            report.failures[0].1,
            DistributorError::DistributionMismatch { document: 9, event: 8 }
        ));
        assert!(matches!(
            report.failures[1].1,
            DistributorError::AmountMismatch { .. }
        ));
        assert!(matches!(
            report.failures[2].1,
            DistributorError::UnknownClaimant { .. }
        ));
        assert!(!doc.get(&account(1)).unwrap().is_claimed());
        assert!(doc.get(&account(2)).unwrap().is_claimed());
    }

    #[test]
    fn test_reconcile_out_of_order_commutes_across_accounts() {
        let events = vec![event(1, 0, 1_000, 10), event(1, 1, 1_007, 5)];
        let mut forward = sample_document(1, 2);
        let mut backward = sample_document(1, 2);
        reconcile_events(&mut forward, &events);
        reconcile_events(&mut backward, events.iter().rev());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_verify_root() {
        let doc = sample_document(1, 4);
        assert!(verify_root(&doc, &doc.merkle_root()));

        let mut wrong = doc.merkle_root();
        wrong.0[31] ^= 0x01;
        assert!(!verify_root(&doc, &wrong));
        assert!(matches!(
            ensure_root(&doc, &wrong),
            Err(DistributorError::RootMismatch { .. })
        ));
        assert!(ensure_root(&doc, &doc.merkle_root()).is_ok());
    }
}
