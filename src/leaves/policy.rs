//! Policy engine.
//!
//! A prospective request runs through common checks (dates, protocol,
//! notice, caps) and then through the strategy registered for its leave
//! type code. Adding a type is a registration, not a subclass.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::balance::{plan_deduction, BalanceBreakdown, LeaveBalance};
use crate::clients::LeaveTypeConfig;

/// What a strategy (and the engine) reports about a prospective request.
#[derive(Debug, Clone, Default)]
pub struct PolicyOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub requires_approval: bool,
    pub balance_breakdown: BalanceBreakdown,
}

impl PolicyOutcome {
    fn valid(requires_approval: bool) -> Self {
        Self {
            is_valid: true,
            requires_approval,
            ..Default::default()
        }
    }

    fn merge(&mut self, other: PolicyOutcome) {
        self.is_valid = self.is_valid && other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.requires_approval = other.requires_approval;
        self.balance_breakdown = other.balance_breakdown;
    }
}

/// Everything a strategy needs to judge a request.
pub struct PolicyContext<'a> {
    pub leave_type: &'a LeaveTypeConfig,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_requested: Decimal,
    pub today: NaiveDate,
    pub protocol_number: Option<&'a str>,
    pub snapshot: &'a LeaveBalance,
    /// Working days already booked for this type in the start month.
    pub days_this_month: Decimal,
}

pub trait LeavePolicy: Send + Sync {
    fn code(&self) -> &'static str;
    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome;
}

/// Shared helper for the balance-backed strategies.
fn balance_backed(ctx: &PolicyContext<'_>) -> PolicyOutcome {
    let mut outcome = PolicyOutcome::valid(ctx.leave_type.requires_approval);
    match plan_deduction(
        ctx.snapshot,
        &ctx.leave_type.code,
        ctx.days_requested,
        ctx.start_date,
        ctx.leave_type.allow_negative_balance,
    ) {
        Ok(breakdown) => outcome.balance_breakdown = breakdown,
        Err(message) => {
            outcome.is_valid = false;
            outcome.errors.push(message);
        }
    }
    outcome
}

struct VacationPolicy;

impl LeavePolicy for VacationPolicy {
    fn code(&self) -> &'static str {
        "vacation"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        let mut outcome = balance_backed(ctx);
        // Flag AP consumption close to expiry so HR sees it on the request.
        if let Some(ap_days) = outcome
            .balance_breakdown
            .get(&super::balance::BalanceBucket::VacationAp)
        {
            if *ap_days > Decimal::ZERO && ctx.snapshot.ap_expiry_date < ctx.end_date {
                outcome.warnings.push(format!(
                    "{} giorni AP scadono il {} durante il periodo richiesto",
                    ap_days, ctx.snapshot.ap_expiry_date
                ));
            }
        }
        outcome
    }
}

struct RolPolicy;

impl LeavePolicy for RolPolicy {
    fn code(&self) -> &'static str {
        "rol"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        balance_backed(ctx)
    }
}

struct PermitPolicy;

impl LeavePolicy for PermitPolicy {
    fn code(&self) -> &'static str {
        "permits"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        balance_backed(ctx)
    }
}

struct SickPolicy;

impl LeavePolicy for SickPolicy {
    fn code(&self) -> &'static str {
        "sick"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        // No bucket: sick leave never touches the vacation balance.
        let mut outcome = PolicyOutcome::valid(ctx.leave_type.requires_approval);
        if ctx.days_requested > Decimal::from(3) && ctx.protocol_number.is_none() {
            outcome
                .warnings
                .push("Malattia superiore a 3 giorni senza protocollo INPS".to_string());
        }
        outcome
    }
}

struct ParentalPolicy;

impl LeavePolicy for ParentalPolicy {
    fn code(&self) -> &'static str {
        "parental"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        PolicyOutcome::valid(ctx.leave_type.requires_approval)
    }
}

struct UnpaidPolicy;

impl LeavePolicy for UnpaidPolicy {
    fn code(&self) -> &'static str {
        "unpaid"
    }

    fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        PolicyOutcome::valid(ctx.leave_type.requires_approval)
    }
}

/// Prioritized chain: engine-level checks first, then the per-type strategy.
pub struct PolicyEngine {
    policies: HashMap<&'static str, Box<dyn LeavePolicy>>,
}

impl PolicyEngine {
    pub fn with_defaults() -> Self {
        let mut engine = Self {
            policies: HashMap::new(),
        };
        engine.register(Box::new(VacationPolicy));
        engine.register(Box::new(RolPolicy));
        engine.register(Box::new(PermitPolicy));
        engine.register(Box::new(SickPolicy));
        engine.register(Box::new(ParentalPolicy));
        engine.register(Box::new(UnpaidPolicy));
        engine
    }

    pub fn register(&mut self, policy: Box<dyn LeavePolicy>) {
        self.policies.insert(policy.code(), policy);
    }

    /// Runs the common checks, then the type strategy. Validity combines by
    /// AND; warnings pass through.
    pub fn validate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        let mut outcome = PolicyOutcome::valid(ctx.leave_type.requires_approval);
        let lt = ctx.leave_type;

        if ctx.end_date < ctx.start_date {
            outcome.is_valid = false;
            outcome
                .errors
                .push("La data di fine deve essere successiva alla data di inizio".to_string());
        }

        if !lt.allow_past_dates && ctx.start_date < ctx.today {
            outcome.is_valid = false;
            outcome.errors.push(format!(
                "Le richieste di {} non possono iniziare nel passato",
                lt.name
            ));
        }

        if lt.requires_protocol && ctx.protocol_number.is_none() {
            outcome.is_valid = false;
            outcome.errors.push(format!(
                "Il codice INPS (protocollo telematico) è obbligatorio per le richieste di {}",
                lt.name
            ));
        }

        if let Some(min_notice) = lt.min_notice_days {
            let notice = (ctx.start_date - ctx.today).num_days();
            if notice < min_notice {
                outcome.is_valid = false;
                outcome.errors.push(format!(
                    "Preavviso minimo di {} giorni non rispettato ({} giorni)",
                    min_notice, notice
                ));
            }
        }

        if let Some(max_consecutive) = lt.max_consecutive_days {
            let span = (ctx.end_date - ctx.start_date).num_days() + 1;
            if span > max_consecutive {
                outcome.is_valid = false;
                outcome.errors.push(format!(
                    "Durata massima di {} giorni consecutivi superata ({} giorni)",
                    max_consecutive, span
                ));
            }
        }

        if let Some(max_per_month) = lt.max_per_month {
            let projected = ctx.days_this_month + ctx.days_requested;
            if projected > Decimal::from(max_per_month) {
                outcome.is_valid = false;
                outcome.errors.push(format!(
                    "Limite mensile di {} giorni superato ({} giorni nel mese)",
                    max_per_month, projected
                ));
            }
        }

        if let Some(policy) = self.policies.get(lt.code.as_str()) {
            outcome.merge(policy.validate(ctx));
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaves::balance::{BalanceBucket, BalanceLedger};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seeded_snapshot(user: Uuid) -> LeaveBalance {
        let ledger = BalanceLedger::new();
        ledger.accrue(user, 2025, BalanceBucket::VacationAp, dec!(3)).unwrap();
        ledger.accrue(user, 2025, BalanceBucket::VacationAc, dec!(20)).unwrap();
        ledger.accrue(user, 2025, BalanceBucket::Rol, dec!(6)).unwrap();
        ledger.snapshot(user, 2025)
    }

    fn ctx<'a>(
        leave_type: &'a LeaveTypeConfig,
        snapshot: &'a LeaveBalance,
        days: Decimal,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PolicyContext<'a> {
        PolicyContext {
            leave_type,
            start_date: start,
            end_date: end,
            days_requested: days,
            today: d(2025, 7, 1),
            protocol_number: None,
            snapshot,
            days_this_month: Decimal::ZERO,
        }
    }

    #[test]
    fn vacation_breakdown_flows_through() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        let engine = PolicyEngine::with_defaults();

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(5), d(2025, 7, 14), d(2025, 7, 18)));
        assert!(outcome.is_valid);
        assert!(outcome.requires_approval);
        assert_eq!(
            outcome.balance_breakdown.get(&BalanceBucket::VacationAp),
            Some(&dec!(3))
        );
        assert_eq!(
            outcome.balance_breakdown.get(&BalanceBucket::VacationAc),
            Some(&dec!(2))
        );
    }

    #[test]
    fn insufficient_vacation_balance_fails() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        let engine = PolicyEngine::with_defaults();

        let outcome =
            engine.validate(&ctx(&lt, &snapshot, dec!(30), d(2025, 7, 14), d(2025, 8, 22)));
        assert!(!outcome.is_valid);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn past_dates_rejected_unless_allowed() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let mut lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        let engine = PolicyEngine::with_defaults();

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(2), d(2025, 6, 26), d(2025, 6, 27)));
        assert!(!outcome.is_valid);

        lt.allow_past_dates = true;
        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(2), d(2025, 6, 26), d(2025, 6, 27)));
        assert!(outcome.is_valid);
    }

    #[test]
    fn min_notice_enforced() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let mut lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        lt.min_notice_days = Some(7);
        let engine = PolicyEngine::with_defaults();

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(1), d(2025, 7, 3), d(2025, 7, 3)));
        assert!(!outcome.is_valid);

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(1), d(2025, 7, 10), d(2025, 7, 10)));
        assert!(outcome.is_valid);
    }

    #[test]
    fn consecutive_and_monthly_caps() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let mut lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        lt.code = "rol".to_string();
        lt.max_consecutive_days = Some(3);
        lt.max_per_month = Some(4);
        let engine = PolicyEngine::with_defaults();

        // 5 calendar days exceeds the consecutive cap
        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(5), d(2025, 7, 14), d(2025, 7, 18)));
        assert!(!outcome.is_valid);

        // within consecutive cap, but the monthly cap trips once prior days
        // are counted
        let mut c = ctx(&lt, &snapshot, dec!(3), d(2025, 7, 14), d(2025, 7, 16));
        c.days_this_month = dec!(2);
        let outcome = engine.validate(&c);
        assert!(!outcome.is_valid);
    }

    #[test]
    fn sick_leave_has_no_bucket_and_warns_without_protocol() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let mut lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        lt.code = "sick".to_string();
        lt.name = "Malattia".to_string();
        lt.allow_past_dates = true;
        lt.requires_approval = false;
        let engine = PolicyEngine::with_defaults();

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(5), d(2025, 7, 14), d(2025, 7, 18)));
        assert!(outcome.is_valid);
        assert!(!outcome.requires_approval);
        assert!(outcome.balance_breakdown.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn protocol_required_blocks_submission() {
        let user = Uuid::new_v4();
        let snapshot = seeded_snapshot(user);
        let mut lt = LeaveTypeConfig::vacation(Uuid::new_v4());
        lt.code = "sick".to_string();
        lt.name = "Malattia".to_string();
        lt.requires_protocol = true;
        lt.allow_past_dates = true;
        let engine = PolicyEngine::with_defaults();

        let outcome = engine.validate(&ctx(&lt, &snapshot, dec!(2), d(2025, 7, 14), d(2025, 7, 15)));
        assert!(!outcome.is_valid);

        let mut c = ctx(&lt, &snapshot, dec!(2), d(2025, 7, 14), d(2025, 7, 15));
        c.protocol_number = Some("INPS-12345");
        assert!(engine.validate(&c).is_valid);
    }
}
