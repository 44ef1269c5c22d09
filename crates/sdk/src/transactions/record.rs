use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, TimeDelta, Utc};

use crate::{chain::ChainId, provider::Receipt};

/// Approval granted by a transaction, used to derive pending approval state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Approval {
    pub token: Address,
    pub spender: Address,
}

/// Claim performed by a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Claim {
    pub recipient: Address,
}

/// User-facing description attached to a transaction at submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionMeta {
    pub summary: Option<String>,
    pub approval: Option<Approval>,
    pub claim: Option<Claim>,
}

impl TransactionMeta {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self { summary: Some(summary.into()), ..Default::default() }
    }

    pub fn with_approval(mut self, token: Address, spender: Address) -> Self {
        self.approval = Some(Approval { token, spender });
        self
    }

    pub fn with_claim(mut self, recipient: Address) -> Self {
        self.claim = Some(Claim { recipient });
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No receipt observed yet.
    Pending,
    Confirmed,
    /// Mined but reverted.
    Failed,
}

/// Submitted transaction tracked until its receipt is observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    hash: TxHash,
    chain_id: ChainId,
    from: Address,
    submitted_at: DateTime<Utc>,
    meta: TransactionMeta,
    receipt: Option<Receipt>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn new(
        hash: TxHash,
        chain_id: ChainId,
        from: Address,
        submitted_at: DateTime<Utc>,
        meta: TransactionMeta,
    ) -> Self {
        Self { hash, chain_id, from, submitted_at, meta, receipt: None, confirmed_at: None }
    }

    pub fn hash(&self) -> TxHash { self.hash }

    pub fn chain_id(&self) -> ChainId { self.chain_id }

    pub fn from(&self) -> Address { self.from }

    pub fn submitted_at(&self) -> DateTime<Utc> { self.submitted_at }

    pub fn meta(&self) -> &TransactionMeta { &self.meta }

    pub fn receipt(&self) -> Option<&Receipt> { self.receipt.as_ref() }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> { self.confirmed_at }

    pub fn is_pending(&self) -> bool { self.receipt.is_none() }

    pub fn status(&self) -> TransactionStatus {
        match &self.receipt {
            None => TransactionStatus::Pending,
            Some(receipt) if receipt.status => TransactionStatus::Confirmed,
            Some(_) => TransactionStatus::Failed,
        }
    }

    /// Submitted within `window` before `now`.
    pub fn is_recent(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now.signed_duration_since(self.submitted_at) < window
    }

    /// Attaches the receipt unless one is attached already. Returns `true`
    /// if the record changed.
    pub(crate) fn finalize(&mut self, receipt: Receipt, at: DateTime<Utc>) -> bool {
        if self.receipt.is_some() {
            return false;
        }
        self.receipt = Some(receipt);
        self.confirmed_at = Some(at);
        true
    }
}

#[cfg(feature = "display")]
impl tabled::Tabled for TransactionRecord {
    const LENGTH: usize = 6;

    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        use colored::Colorize;

        vec![
            self.hash.to_string().into(),
            self.chain_id.to_string().into(),
            match self.status() {
                TransactionStatus::Pending => "pending".yellow().to_string().into(),
                TransactionStatus::Confirmed => "confirmed".green().to_string().into(),
                TransactionStatus::Failed => "failed".red().to_string().into(),
            },
            self.receipt
                .as_ref()
                .map_or_else(|| "-".to_string(), |r| r.block_number.to_string())
                .into(),
            self.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string().into(),
            self.meta.summary.clone().unwrap_or_default().into(),
        ]
    }

    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["Hash", "Chain", "Status", "Block", "Submitted", "Summary"]
            .into_iter()
            .map(Into::into)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;
    use chrono::TimeZone;

    use super::*;

    fn receipt(status: bool) -> Receipt {
        Receipt {
            transaction_hash: B256::with_last_byte(1),
            block_number: 100,
            block_hash: None,
            status,
            gas_used: 21_000,
        }
    }

    #[test]
    fn test_finalize_once() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record =
            TransactionRecord::new(B256::with_last_byte(1), 56, Address::ZERO, t0, Default::default());
        assert_eq!(record.status(), TransactionStatus::Pending);

        assert!(record.finalize(receipt(false), t0 + TimeDelta::seconds(3)));
        assert!(!record.finalize(receipt(true), t0 + TimeDelta::seconds(6)));
        assert_eq!(record.status(), TransactionStatus::Failed);
        assert_eq!(record.confirmed_at(), Some(t0 + TimeDelta::seconds(3)));
    }

    #[test]
    fn test_recency_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record =
            TransactionRecord::new(B256::ZERO, 56, Address::ZERO, t0, TransactionMeta::summary("x"));
        assert!(record.is_recent(t0 + TimeDelta::hours(23), TimeDelta::hours(24)));
        assert!(!record.is_recent(t0 + TimeDelta::hours(24), TimeDelta::hours(24)));
    }
}
