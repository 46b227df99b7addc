//! Balance ledger.
//!
//! Four buckets per user-year: previous-year vacation (AP, expiring),
//! current-year vacation (AC), ROL hours-in-days and permits. Every mutation
//! writes an append-only transaction and updates the snapshot row under the
//! same entry lock; the snapshot is derivable by summing the ledger.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Deduction order is the enum order: AP is consumed before AC so expiring
/// entitlement goes first. Restores walk it in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceBucket {
    VacationAp,
    VacationAc,
    Rol,
    Permits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Accrual,
    Deduct,
    Restore,
    Adjust,
    CarryOver,
    Expire,
}

/// Per-bucket day amounts, ordered by deduction priority.
pub type BalanceBreakdown = BTreeMap<BalanceBucket, Decimal>;

/// Append-only ledger entry. `amount` is signed: deductions negative,
/// restores positive. `balance_after` is the bucket's availability after
/// this entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub year: i32,
    pub bucket: BalanceBucket,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub leave_request_id: Option<Uuid>,
    /// Makes scheduler retries safe.
    pub dedupe_key: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot row, unique per `(user_id, year)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveBalance {
    pub user_id: Uuid,
    pub year: i32,
    pub vacation_ap_total: Decimal,
    pub vacation_ap_used: Decimal,
    pub vacation_ac_total: Decimal,
    pub vacation_ac_used: Decimal,
    pub rol_total: Decimal,
    pub rol_used: Decimal,
    pub permits_total: Decimal,
    pub permits_used: Decimal,
    /// AP expires on this date (default June 30 of the following year).
    pub ap_expiry_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl LeaveBalance {
    fn empty(user_id: Uuid, year: i32) -> Self {
        Self {
            user_id,
            year,
            vacation_ap_total: Decimal::ZERO,
            vacation_ap_used: Decimal::ZERO,
            vacation_ac_total: Decimal::ZERO,
            vacation_ac_used: Decimal::ZERO,
            rol_total: Decimal::ZERO,
            rol_used: Decimal::ZERO,
            permits_total: Decimal::ZERO,
            permits_used: Decimal::ZERO,
            ap_expiry_date: NaiveDate::from_ymd_opt(year + 1, 6, 30)
                .expect("June 30 exists every year"),
            updated_at: Utc::now(),
        }
    }

    pub fn total(&self, bucket: BalanceBucket) -> Decimal {
        match bucket {
            BalanceBucket::VacationAp => self.vacation_ap_total,
            BalanceBucket::VacationAc => self.vacation_ac_total,
            BalanceBucket::Rol => self.rol_total,
            BalanceBucket::Permits => self.permits_total,
        }
    }

    pub fn used(&self, bucket: BalanceBucket) -> Decimal {
        match bucket {
            BalanceBucket::VacationAp => self.vacation_ap_used,
            BalanceBucket::VacationAc => self.vacation_ac_used,
            BalanceBucket::Rol => self.rol_used,
            BalanceBucket::Permits => self.permits_used,
        }
    }

    pub fn available(&self, bucket: BalanceBucket) -> Decimal {
        self.total(bucket) - self.used(bucket)
    }

    fn add_total(&mut self, bucket: BalanceBucket, delta: Decimal) {
        match bucket {
            BalanceBucket::VacationAp => self.vacation_ap_total += delta,
            BalanceBucket::VacationAc => self.vacation_ac_total += delta,
            BalanceBucket::Rol => self.rol_total += delta,
            BalanceBucket::Permits => self.permits_total += delta,
        }
    }

    fn add_used(&mut self, bucket: BalanceBucket, delta: Decimal) {
        match bucket {
            BalanceBucket::VacationAp => self.vacation_ap_used += delta,
            BalanceBucket::VacationAc => self.vacation_ac_used += delta,
            BalanceBucket::Rol => self.rol_used += delta,
            BalanceBucket::Permits => self.permits_used += delta,
        }
    }
}

/// Plans which buckets cover `days` for a leave type code.
///
/// Vacation consumes AP first (while not expired at the leave start), then
/// AC. ROL and permits map to their own bucket. Codes without a backing
/// bucket yield an empty breakdown.
pub fn plan_deduction(
    snapshot: &LeaveBalance,
    leave_type_code: &str,
    days: Decimal,
    start_date: NaiveDate,
    allow_negative: bool,
) -> Result<BalanceBreakdown, String> {
    let mut breakdown = BalanceBreakdown::new();
    if days <= Decimal::ZERO {
        return Ok(breakdown);
    }

    match leave_type_code {
        "vacation" => {
            let mut remaining = days;
            let ap_available = snapshot.available(BalanceBucket::VacationAp);
            if start_date <= snapshot.ap_expiry_date && ap_available > Decimal::ZERO {
                let from_ap = remaining.min(ap_available);
                if from_ap > Decimal::ZERO {
                    breakdown.insert(BalanceBucket::VacationAp, from_ap);
                    remaining -= from_ap;
                }
            }
            if remaining > Decimal::ZERO {
                let ac_available = snapshot.available(BalanceBucket::VacationAc);
                if remaining > ac_available && !allow_negative {
                    return Err(format!(
                        "Saldo ferie insufficiente: disponibili {}, richiesti {}",
                        ap_available.max(Decimal::ZERO) + ac_available.max(Decimal::ZERO),
                        days
                    ));
                }
                breakdown.insert(BalanceBucket::VacationAc, remaining);
            }
        }
        "rol" => {
            let available = snapshot.available(BalanceBucket::Rol);
            if days > available && !allow_negative {
                return Err(format!(
                    "Saldo ROL insufficiente: disponibili {}, richiesti {}",
                    available, days
                ));
            }
            breakdown.insert(BalanceBucket::Rol, days);
        }
        "permits" => {
            let available = snapshot.available(BalanceBucket::Permits);
            if days > available && !allow_negative {
                return Err(format!(
                    "Saldo permessi insufficiente: disponibili {}, richiesti {}",
                    available, days
                ));
            }
            breakdown.insert(BalanceBucket::Permits, days);
        }
        // sick, parental, unpaid, ... : no balance bucket
        _ => {}
    }

    Ok(breakdown)
}

/// Append-only ledger plus snapshot rows.
#[derive(Debug, Default)]
pub struct BalanceLedger {
    snapshots: DashMap<(Uuid, i32), LeaveBalance>,
    transactions: Mutex<Vec<BalanceTransaction>>,
}

impl BalanceLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self, user_id: Uuid, year: i32) -> LeaveBalance {
        self.snapshots
            .entry((user_id, year))
            .or_insert_with(|| LeaveBalance::empty(user_id, year))
            .clone()
    }

    pub fn set_ap_expiry(&self, user_id: Uuid, year: i32, expiry: NaiveDate) {
        let mut entry = self
            .snapshots
            .entry((user_id, year))
            .or_insert_with(|| LeaveBalance::empty(user_id, year));
        entry.ap_expiry_date = expiry;
        entry.updated_at = Utc::now();
    }

    pub fn transactions_for_request(&self, leave_request_id: Uuid) -> Vec<BalanceTransaction> {
        self.transactions
            .lock()
            .expect("ledger poisoned")
            .iter()
            .filter(|t| t.leave_request_id == Some(leave_request_id))
            .cloned()
            .collect()
    }

    pub fn transactions_for_user(&self, user_id: Uuid, year: i32) -> Vec<BalanceTransaction> {
        self.transactions
            .lock()
            .expect("ledger poisoned")
            .iter()
            .filter(|t| t.user_id == user_id && t.year == year)
            .cloned()
            .collect()
    }

    fn dedupe_key(
        leave_request_id: Option<Uuid>,
        tx: TransactionType,
        bucket: BalanceBucket,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> String {
        let minute_bucket = at.timestamp() / 60;
        format!(
            "{}:{:?}:{:?}:{}:{}",
            leave_request_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            tx,
            bucket,
            amount,
            minute_bucket
        )
    }

    /// The single write path: mutates the snapshot under its entry lock and
    /// appends the transaction. A duplicate dedupe key (same request, type,
    /// bucket, amount and minute) is treated as a retry and skipped.
    fn write(
        &self,
        user_id: Uuid,
        year: i32,
        bucket: BalanceBucket,
        tx_type: TransactionType,
        amount: Decimal,
        leave_request_id: Option<Uuid>,
        note: Option<String>,
    ) -> CoreResult<()> {
        if amount == Decimal::ZERO {
            return Ok(());
        }

        let now = Utc::now();
        let key = Self::dedupe_key(leave_request_id, tx_type, bucket, amount, now);

        let mut snapshot = self
            .snapshots
            .entry((user_id, year))
            .or_insert_with(|| LeaveBalance::empty(user_id, year));

        let mut transactions = self.transactions.lock().expect("ledger poisoned");
        if transactions.iter().any(|t| t.dedupe_key == key) {
            tracing::warn!(%key, "duplicate ledger write skipped");
            return Ok(());
        }

        match tx_type {
            TransactionType::Accrual | TransactionType::CarryOver | TransactionType::Adjust
            | TransactionType::Expire => {
                snapshot.add_total(bucket, amount);
            }
            TransactionType::Deduct => {
                snapshot.add_used(bucket, -amount);
            }
            TransactionType::Restore => {
                snapshot.add_used(bucket, -amount);
            }
        }
        snapshot.updated_at = now;

        let balance_after = snapshot.available(bucket);
        transactions.push(BalanceTransaction {
            id: Uuid::new_v4(),
            user_id,
            year,
            bucket,
            transaction_type: tx_type,
            amount,
            balance_after,
            leave_request_id,
            dedupe_key: key,
            note,
            created_at: now,
        });

        tracing::debug!(
            %user_id, year, ?bucket, ?tx_type, %amount, %balance_after,
            "ledger entry written"
        );
        Ok(())
    }

    /// Seeds entitlement (positive) into a bucket.
    pub fn accrue(
        &self,
        user_id: Uuid,
        year: i32,
        bucket: BalanceBucket,
        amount: Decimal,
    ) -> CoreResult<()> {
        self.write(user_id, year, bucket, TransactionType::Accrual, amount, None, None)
    }

    /// Carry-over from the previous year into AP.
    pub fn carry_over(&self, user_id: Uuid, year: i32, amount: Decimal) -> CoreResult<()> {
        self.write(
            user_id,
            year,
            BalanceBucket::VacationAp,
            TransactionType::CarryOver,
            amount,
            None,
            None,
        )
    }

    /// Manual correction by HR; `delta` may be negative.
    pub fn adjust(
        &self,
        user_id: Uuid,
        year: i32,
        bucket: BalanceBucket,
        delta: Decimal,
        note: Option<String>,
    ) -> CoreResult<()> {
        self.write(user_id, year, bucket, TransactionType::Adjust, delta, None, note)
    }

    /// Deducts a planned breakdown, one entry per bucket in deduction order.
    pub fn deduct(
        &self,
        leave_request_id: Uuid,
        user_id: Uuid,
        year: i32,
        breakdown: &BalanceBreakdown,
        allow_negative: bool,
    ) -> CoreResult<()> {
        for (bucket, amount) in breakdown {
            if *amount <= Decimal::ZERO {
                continue;
            }
            if !allow_negative {
                let available = self.snapshot(user_id, year).available(*bucket);
                if *amount > available {
                    return Err(CoreError::rule(
                        "INSUFFICIENT_BALANCE",
                        format!(
                            "saldo {:?} insufficiente: disponibili {}, richiesti {}",
                            bucket, available, amount
                        ),
                    ));
                }
            }
            self.write(
                user_id,
                year,
                *bucket,
                TransactionType::Deduct,
                -*amount,
                Some(leave_request_id),
                None,
            )?;
        }
        Ok(())
    }

    /// Restores a full breakdown, walking buckets in reverse deduction order
    /// so AP comes back last.
    pub fn restore(
        &self,
        leave_request_id: Uuid,
        user_id: Uuid,
        year: i32,
        breakdown: &BalanceBreakdown,
    ) -> CoreResult<()> {
        for (bucket, amount) in breakdown.iter().rev() {
            if *amount <= Decimal::ZERO {
                continue;
            }
            self.write(
                user_id,
                year,
                *bucket,
                TransactionType::Restore,
                *amount,
                Some(leave_request_id),
                None,
            )?;
        }
        Ok(())
    }

    /// Outstanding deduction per bucket for a request (deducts minus
    /// restores already issued against it).
    pub fn outstanding_for_request(&self, leave_request_id: Uuid) -> BalanceBreakdown {
        let mut outstanding = BalanceBreakdown::new();
        for tx in self.transactions_for_request(leave_request_id) {
            match tx.transaction_type {
                TransactionType::Deduct => {
                    *outstanding.entry(tx.bucket).or_insert(Decimal::ZERO) += -tx.amount;
                }
                TransactionType::Restore => {
                    *outstanding.entry(tx.bucket).or_insert(Decimal::ZERO) -= tx.amount;
                }
                _ => {}
            }
        }
        outstanding.retain(|_, v| *v > Decimal::ZERO);
        outstanding
    }

    /// Restores up to `days` against a request, bucket by bucket in reverse
    /// deduction order (AC refunds before AP, which was consumed first).
    pub fn restore_partial(
        &self,
        leave_request_id: Uuid,
        user_id: Uuid,
        year: i32,
        days: Decimal,
    ) -> CoreResult<Decimal> {
        let outstanding = self.outstanding_for_request(leave_request_id);
        let mut remaining = days;

        for (bucket, available) in outstanding.iter().rev() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let refund = remaining.min(*available);
            if refund > Decimal::ZERO {
                self.write(
                    user_id,
                    year,
                    *bucket,
                    TransactionType::Restore,
                    refund,
                    Some(leave_request_id),
                    None,
                )?;
                remaining -= refund;
            }
        }

        Ok(days - remaining)
    }

    /// Expires whatever AP availability is left after the expiry date.
    pub fn expire_ap(&self, user_id: Uuid, year: i32, as_of: NaiveDate) -> CoreResult<Decimal> {
        let snapshot = self.snapshot(user_id, year);
        if as_of <= snapshot.ap_expiry_date {
            return Ok(Decimal::ZERO);
        }
        let expiring = snapshot.available(BalanceBucket::VacationAp);
        if expiring <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        self.write(
            user_id,
            year,
            BalanceBucket::VacationAp,
            TransactionType::Expire,
            -expiring,
            None,
            Some(format!("AP scaduto il {}", snapshot.ap_expiry_date)),
        )?;
        Ok(expiring)
    }

    /// Cross-check: ledger sum equals `total - used` per bucket.
    pub fn verify_consistency(&self, user_id: Uuid, year: i32) -> bool {
        let snapshot = self.snapshot(user_id, year);
        let transactions = self.transactions_for_user(user_id, year);
        for bucket in [
            BalanceBucket::VacationAp,
            BalanceBucket::VacationAc,
            BalanceBucket::Rol,
            BalanceBucket::Permits,
        ] {
            let ledger_sum: Decimal = transactions
                .iter()
                .filter(|t| t.bucket == bucket)
                .map(|t| t.amount)
                .sum();
            if ledger_sum != snapshot.available(bucket) {
                tracing::error!(
                    %user_id, year, ?bucket, %ledger_sum,
                    available = %snapshot.available(bucket),
                    "ledger/snapshot mismatch"
                );
                return false;
            }
        }
        true
    }
}
