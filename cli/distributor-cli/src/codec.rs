//! Text interchange for distribution documents.
//!
//! The tabular artifact is RFC 4180 CSV: a header row and exactly one data
//! row with the columns in [`COLUMNS`]. The `metadata` and `claims` columns
//! hold JSON. Any field containing a comma, double quote, CR or LF is wrapped
//! in double quotes and every embedded double quote is written twice; the
//! reader undoes exactly that. Nothing here splits on delimiters by hand.
//!
//! Imports are rejected as [`DistributorError::CorruptDocument`] unless the
//! embedded JSON parses completely and the recovered claims agree with the
//! declared count and total.

use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::common::{parse_hash, Address};
use crate::document::{self, ClaimRecord, DistributionDocument, Metadata};
use crate::error::{DistributorError, Result};
use crate::leaf::{self, parse_decimal};
use crate::tree::{self, HASH_SCHEME};

/// Column order of the tabular artifact.
pub const COLUMNS: [&str; 8] = [
    "scheme",
    "id",
    "merkle_root",
    "total_rewards",
    "claim_count",
    "created_at",
    "metadata",
    "claims",
];

/// Renders `document` as the tabular artifact.
pub fn to_text(document: &DistributionDocument) -> Result<String> {
    let metadata = serde_json::to_string(document.metadata()).map_err(std::io::Error::from)?;
    let claims = serde_json::to_string(document.claims()).map_err(std::io::Error::from)?;

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS).map_err(std::io::Error::from)?;
    writer
        .write_record([
            HASH_SCHEME.to_string(),
            document.id().to_string(),
            document.merkle_root().to_string(),
            document.total_rewards().to_string(),
            document.claim_count().to_string(),
            document
                .created_at()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            metadata,
            claims,
        ])
        .map_err(std::io::Error::from)?;

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::other(e.to_string()).into())
}

/// Parses the tabular artifact.
///
/// Structural checks only; see [`from_text_verified`] to also recompute the
/// root.
pub fn from_text(text: &str) -> Result<DistributionDocument> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DistributorError::corrupt(format!("unreadable header: {e}")))?;
    if !headers.iter().eq(COLUMNS.iter().copied()) {
        return Err(DistributorError::corrupt(format!(
            "unexpected columns: {:?}",
            headers.iter().collect::<Vec<_>>()
        )));
    }

    let mut records = reader.records();
    let record = records
        .next()
        .ok_or_else(|| DistributorError::corrupt("artifact has no data row"))?
        .map_err(|e| DistributorError::corrupt(format!("malformed data row: {e}")))?;
    if records.next().is_some() {
        return Err(DistributorError::corrupt("artifact has more than one data row"));
    }

    // Header check above guarantees eight fields.
    let field = |i: usize| record.get(i).unwrap_or_default();

    check_scheme(field(0))?;
    let id: u64 = field(1)
        .parse()
        .map_err(|e| DistributorError::corrupt(format!("bad id '{}': {e}", field(1))))?;
    let merkle_root = parse_hash(field(2))
        .map_err(|e| DistributorError::corrupt(format!("bad merkle_root: {e}")))?;
    let total_rewards = parse_decimal(field(3))
        .map_err(|e| DistributorError::corrupt(format!("bad total_rewards: {e}")))?;
    let claim_count: usize = field(4).parse().map_err(|e| {
        DistributorError::corrupt(format!("bad claim_count '{}': {e}", field(4)))
    })?;
    let created_at = DateTime::parse_from_rfc3339(field(5))
        .map_err(|e| DistributorError::corrupt(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);
    let metadata: Metadata = serde_json::from_str(field(6))
        .map_err(|e| DistributorError::corrupt(format!("metadata payload: {e}")))?;
    let claims: BTreeMap<Address, ClaimRecord> = serde_json::from_str(field(7))
        .map_err(|e| DistributorError::corrupt(format!("claims payload: {e}")))?;

    let document = document::from_parts(
        id,
        merkle_root,
        total_rewards,
        claims,
        metadata,
        created_at,
    );
    check_structure(&document, claim_count)?;

    debug!(
        distribution_id = id,
        claims = claim_count,
        "decoded distribution artifact"
    );
    Ok(document)
}

/// [`from_text`] followed by [`verify_integrity`].
pub fn from_text_verified(text: &str) -> Result<DistributionDocument> {
    let document = from_text(text)?;
    verify_integrity(&document)?;
    Ok(document)
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    scheme: &'a str,
    claim_count: usize,
    document: &'a DistributionDocument,
}

#[derive(Deserialize)]
struct Envelope {
    scheme: String,
    claim_count: usize,
    document: DistributionDocument,
}

/// Renders `document` as pretty JSON wrapped with its scheme and claim count.
pub fn to_json(document: &DistributionDocument) -> Result<String> {
    let envelope = EnvelopeRef {
        scheme: HASH_SCHEME,
        claim_count: document.claim_count(),
        document,
    };
    Ok(serde_json::to_string_pretty(&envelope).map_err(std::io::Error::from)?)
}

/// Parses the JSON form with the same structural checks as [`from_text`].
pub fn from_json(text: &str) -> Result<DistributionDocument> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| DistributorError::corrupt(format!("document payload: {e}")))?;
    check_scheme(&envelope.scheme)?;
    check_structure(&envelope.document, envelope.claim_count)?;
    Ok(envelope.document)
}

/// Recomputes the root from the document's claims and checks every stored
/// proof against it.
///
/// # Errors
/// [`DistributorError::RootMismatch`] when the claims no longer hash to the
/// stored root, [`DistributorError::CorruptDocument`] when a stored proof
/// does not verify.
pub fn verify_integrity(document: &DistributionDocument) -> Result<()> {
    let computed = document.recompute_root()?;
    if computed != document.merkle_root() {
        warn!(
            distribution_id = document.id(),
            stored = %document.merkle_root(),
            %computed,
            "recomputed root disagrees with stored root"
        );
        return Err(DistributorError::RootMismatch {
            expected: document.merkle_root().to_string(),
            computed: computed.to_string(),
        });
    }

    for record in document.claims().values() {
        let leaf = leaf::digest(&record.claim())?;
        if !tree::verify(record.proof(), &leaf, &computed) {
            return Err(DistributorError::corrupt(format!(
                "stored proof for index {} does not verify",
                record.index()
            )));
        }
    }
    Ok(())
}

fn check_scheme(scheme: &str) -> Result<()> {
    if scheme != HASH_SCHEME {
        return Err(DistributorError::corrupt(format!(
            "unsupported hash scheme '{scheme}', expected '{HASH_SCHEME}'"
        )));
    }
    Ok(())
}

fn check_structure(document: &DistributionDocument, declared_count: usize) -> Result<()> {
    let claims = document.claims();
    if claims.len() != declared_count {
        return Err(DistributorError::corrupt(format!(
            "declared {declared_count} claims, recovered {}",
            claims.len()
        )));
    }

    let mut seen = vec![false; claims.len()];
    let mut total = BigUint::default();
    for (account, record) in claims {
        if account != record.account() {
            return Err(DistributorError::corrupt(format!(
                "claim keyed {account} belongs to {}",
                record.account()
            )));
        }
        let slot = usize::try_from(record.index())
            .ok()
            .and_then(|i| seen.get_mut(i))
            .ok_or_else(|| {
                DistributorError::corrupt(format!("claim index {} out of range", record.index()))
            })?;
        if std::mem::replace(slot, true) {
            return Err(DistributorError::corrupt(format!(
                "claim index {} appears twice",
                record.index()
            )));
        }
        leaf::check_amount(record.amount())
            .map_err(|e| DistributorError::corrupt(e.to_string()))?;
        if record.is_claimed() != record.claimed_at().is_some() {
            return Err(DistributorError::corrupt(format!(
                "claim index {} has inconsistent redemption status",
                record.index()
            )));
        }
        total += record.amount();
    }

    if &total != document.total_rewards() {
        return Err(DistributorError::corrupt(format!(
            "claims sum to {total}, declared total is {}",
            document.total_rewards()
        )));
    }
    Ok(())
}
