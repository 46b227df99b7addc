//! Working-day kernel and calendar range aggregator.

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use super::repository::CalendarStore;

/// Location-aware working-day arithmetic.
#[derive(Clone)]
pub struct CalendarService {
    store: Arc<CalendarStore>,
}

impl CalendarService {
    pub fn new(store: Arc<CalendarStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CalendarStore> {
        &self.store
    }

    /// Western Easter Sunday (Anonymous Gregorian algorithm).
    pub fn easter(year: i32) -> NaiveDate {
        let a = year % 19;
        let b = year / 100;
        let c = year % 100;
        let d = b / 4;
        let e = b % 4;
        let f = (b + 8) / 25;
        let g = (b - f + 1) / 3;
        let h = (19 * a + b - d - g + 15) % 30;
        let i = c / 4;
        let k = c % 4;
        let l = (32 + 2 * e + 2 * i - h - k) % 7;
        let m = (a + 11 * h + 22 * l) / 451;
        let month = (h + l - 7 * m + 114) / 31;
        let day = (h + l - 7 * m + 114) % 31 + 1;
        NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .expect("computus always yields a valid March/April date")
    }

    /// Expand a recurrence rule for one year. Invalid dates (Feb 29 on a
    /// non-leap year) are dropped.
    fn expand_rule(rule: &RecurrenceRule, year: i32) -> Option<NaiveDate> {
        match rule {
            RecurrenceRule::Yearly { month, day } => NaiveDate::from_ymd_opt(year, *month, *day),
            RecurrenceRule::EasterRelative { offset } => {
                Some(Self::easter(year) + Duration::days(*offset))
            }
        }
    }

    /// Weekly profile for a location: location calendar, else the default
    /// profile, else built-in Mon-Fri.
    fn resolve_profile(&self, location_id: Option<Uuid>) -> (WorkWeekProfile, Vec<Uuid>) {
        if let Some(lc) = self.store.location_calendar_for(location_id) {
            if let Some(profile) = self.store.get_work_week_profile(lc.work_week_profile_id) {
                return (profile, lc.subscribed_profiles);
            }
        }
        let profile = self
            .store
            .default_work_week_profile()
            .unwrap_or_else(|| WorkWeekProfile::mon_fri(Uuid::new_v4()));
        (profile, Vec::new())
    }

    /// Concrete holiday dates for the range, expanded per year.
    pub fn holidays_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> BTreeMap<NaiveDate, String> {
        let (_, subscribed) = self.resolve_profile(location_id);
        let defs = if subscribed.is_empty() {
            self.store.all_active_holidays()
        } else {
            self.store.holidays_for_profiles(&subscribed)
        };

        let mut out = BTreeMap::new();
        for def in defs {
            if let Some(rule) = &def.recurrence {
                for year in start.year()..=end.year() {
                    if let Some(date) = Self::expand_rule(rule, year) {
                        if start <= date && date <= end {
                            out.entry(date).or_insert_with(|| def.name.clone());
                        }
                    }
                }
            } else if let Some(date) = def.date {
                if start <= date && date <= end {
                    out.entry(date).or_insert_with(|| def.name.clone());
                }
            }
        }
        out
    }

    fn exceptions_map(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> BTreeMap<NaiveDate, ExceptionType> {
        self.store
            .exceptions_in_range(start, end, location_id)
            .into_iter()
            .map(|e| (e.date, e.exception_type))
            .collect()
    }

    /// Whether one day counts. An explicit exception wins over both the
    /// weekly profile and the holiday set.
    fn day_counts(
        day: NaiveDate,
        profile: &WorkWeekProfile,
        holidays: &BTreeMap<NaiveDate, String>,
        exceptions: &BTreeMap<NaiveDate, ExceptionType>,
    ) -> bool {
        match exceptions.get(&day) {
            Some(ExceptionType::Working) => true,
            Some(ExceptionType::NonWorking) => false,
            None => {
                let weekday = day.weekday().num_days_from_monday() as usize;
                profile.days[weekday].is_working && !holidays.contains_key(&day)
            }
        }
    }

    /// Working days in `[start, end]`. Counted endpoint days contribute 0.5
    /// when their half-day flag is set; interior days always count 1.
    pub fn working_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        start_half: bool,
        end_half: bool,
        location_id: Option<Uuid>,
    ) -> Decimal {
        if end < start {
            return Decimal::ZERO;
        }

        let (profile, _) = self.resolve_profile(location_id);
        let holidays = self.holidays_in_range(start, end, location_id);
        let exceptions = self.exceptions_map(start, end, location_id);

        let mut total = Decimal::ZERO;
        let mut current = start;
        while current <= end {
            if Self::day_counts(current, &profile, &holidays, &exceptions) {
                let half = (current == start && start_half) || (current == end && end_half);
                total += if half { dec!(0.5) } else { Decimal::ONE };
            }
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        total
    }

    pub fn is_working_day(&self, day: NaiveDate, location_id: Option<Uuid>) -> bool {
        self.working_days(day, day, false, false, location_id) > Decimal::ZERO
    }

    /// Working days covered by non-consuming closures inside `[start, end]`.
    ///
    /// Overlapping closures are deduplicated at the date level. Closures with
    /// `consumes_leave_balance` set stay out of the result: those days remain
    /// chargeable vacation.
    pub fn non_consuming_closure_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> Decimal {
        let closures = self.store.closures_overlapping(start, end, location_id);
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for closure in closures.iter().filter(|c| !c.consumes_leave_balance) {
            let from = closure.start_date.max(start);
            let to = closure.end_date.min(end);
            let mut current = from;
            while current <= to {
                dates.insert(current);
                match current.succ_opt() {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        let (profile, _) = self.resolve_profile(location_id);
        let holidays = self.holidays_in_range(start, end, location_id);
        let exceptions = self.exceptions_map(start, end, location_id);

        let mut total = Decimal::ZERO;
        for day in dates {
            if Self::day_counts(day, &profile, &holidays, &exceptions) {
                total += Decimal::ONE;
            }
        }
        total
    }

    /// Non-working days with a reason, for the date-picker UI.
    pub fn excluded_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> Vec<ExcludedDay> {
        let (profile, _) = self.resolve_profile(location_id);
        let holidays = self.holidays_in_range(start, end, location_id);
        let exceptions = self.exceptions_map(start, end, location_id);

        let mut out = Vec::new();
        let mut current = start;
        while current <= end {
            if !Self::day_counts(current, &profile, &holidays, &exceptions) {
                let reason = if let Some(name) = holidays.get(&current) {
                    name.clone()
                } else if matches!(exceptions.get(&current), Some(ExceptionType::NonWorking)) {
                    "Giornata non lavorativa".to_string()
                } else {
                    "Weekend".to_string()
                };
                out.push(ExcludedDay {
                    date: current,
                    reason,
                });
            }
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        out
    }

    /// Fused per-day view: holidays, closures, user events and leave spans,
    /// plus the kernel's working-day verdict and counter.
    pub fn calendar_range(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
        leaves: &[LeaveSpan],
    ) -> CalendarRangeView {
        let (profile, _) = self.resolve_profile(location_id);
        let holidays = self.holidays_in_range(start, end, location_id);
        let exceptions = self.exceptions_map(start, end, location_id);
        let closures = self.store.closures_overlapping(start, end, location_id);
        let events = self.store.events_for_user(user_id, start, end);

        let mut days = Vec::new();
        let mut working_days_count = Decimal::ZERO;
        let mut current = start;
        while current <= end {
            let mut items = Vec::new();

            let holiday_name = holidays.get(&current).cloned();
            if let Some(name) = &holiday_name {
                items.push(CalendarDayItem {
                    id: Uuid::new_v4(),
                    title: name.clone(),
                    item_type: CalendarItemType::Holiday,
                    start_date: current,
                    end_date: current,
                    is_all_day: true,
                });
            }

            let closure = closures.iter().find(|c| c.covers(current));
            if let Some(c) = closure {
                items.push(CalendarDayItem {
                    id: c.id,
                    title: c.name.clone(),
                    item_type: CalendarItemType::Closure,
                    start_date: c.start_date,
                    end_date: c.end_date,
                    is_all_day: true,
                });
            }

            for event in events.iter().filter(|e| e.start_date <= current && current <= e.end_date)
            {
                items.push(CalendarDayItem {
                    id: event.id,
                    title: event.title.clone(),
                    item_type: CalendarItemType::Event,
                    start_date: event.start_date,
                    end_date: event.end_date,
                    is_all_day: event.is_all_day,
                });
            }

            for leave in leaves
                .iter()
                .filter(|l| l.start_date <= current && current <= l.end_date)
            {
                items.push(CalendarDayItem {
                    id: leave.id,
                    title: leave.title.clone(),
                    item_type: CalendarItemType::Leave,
                    start_date: leave.start_date,
                    end_date: leave.end_date,
                    is_all_day: true,
                });
            }

            let is_working = Self::day_counts(current, &profile, &holidays, &exceptions);
            if is_working {
                working_days_count += Decimal::ONE;
            }

            days.push(CalendarDayView {
                date: current,
                is_working_day: is_working,
                is_holiday: holiday_name.is_some(),
                is_closure: closure.is_some(),
                holiday_name,
                items,
            });

            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }

        CalendarRangeView {
            start_date: start,
            end_date: end,
            days,
            working_days_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn service() -> CalendarService {
        CalendarService::new(CalendarStore::new())
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn seed_profile_with_holidays(service: &CalendarService) -> Uuid {
        let profile_id = Uuid::new_v4();
        service.store().insert_holiday_profile(HolidayProfile {
            id: profile_id,
            name: "Festività nazionali".to_string(),
            is_active: true,
            created_at: Utc::now(),
        });
        service
            .store()
            .insert_holiday(CalendarHoliday {
                id: Uuid::new_v4(),
                profile_id,
                name: "Natale".to_string(),
                date: None,
                recurrence: Some(RecurrenceRule::Yearly { month: 12, day: 25 }),
                is_active: true,
            })
            .unwrap();
        service
            .store()
            .insert_holiday(CalendarHoliday {
                id: Uuid::new_v4(),
                profile_id,
                name: "Lunedì dell'Angelo".to_string(),
                date: None,
                recurrence: Some(RecurrenceRule::EasterRelative { offset: 1 }),
                is_active: true,
            })
            .unwrap();
        profile_id
    }

    #[test]
    fn easter_known_dates() {
        assert_eq!(CalendarService::easter(2024), d(2024, 3, 31));
        assert_eq!(CalendarService::easter(2025), d(2025, 4, 20));
        assert_eq!(CalendarService::easter(2026), d(2026, 4, 5));
    }

    #[test]
    fn mon_fri_week_counts_five() {
        let service = service();
        // 2025-07-07 is a Monday
        let days = service.working_days(d(2025, 7, 7), d(2025, 7, 13), false, false, None);
        assert_eq!(days, dec!(5));
    }

    #[test]
    fn half_day_endpoints() {
        let service = service();
        let days = service.working_days(d(2025, 7, 7), d(2025, 7, 9), true, true, None);
        assert_eq!(days, dec!(2)); // 0.5 + 1 + 0.5

        let single = service.working_days(d(2025, 7, 7), d(2025, 7, 7), true, false, None);
        assert_eq!(single, dec!(0.5));
    }

    #[test]
    fn recurring_holiday_excluded() {
        let service = service();
        seed_profile_with_holidays(&service);
        // 2025-12-25 is a Thursday
        let days = service.working_days(d(2025, 12, 22), d(2025, 12, 26), false, false, None);
        assert_eq!(days, dec!(4));
    }

    #[test]
    fn easter_relative_holiday_excluded() {
        let service = service();
        seed_profile_with_holidays(&service);
        // Easter Monday 2025 is 2025-04-21
        assert!(!service.is_working_day(d(2025, 4, 21), None));
        assert!(service.is_working_day(d(2025, 4, 22), None));
    }

    #[test]
    fn feb_29_rule_dropped_on_non_leap_years() {
        assert_eq!(
            CalendarService::expand_rule(&RecurrenceRule::Yearly { month: 2, day: 29 }, 2025),
            None
        );
        assert_eq!(
            CalendarService::expand_rule(&RecurrenceRule::Yearly { month: 2, day: 29 }, 2024),
            Some(d(2024, 2, 29))
        );
    }

    #[test]
    fn exception_overrides_profile_and_holiday() {
        let service = service();
        seed_profile_with_holidays(&service);
        // Saturday forced working
        service.store().insert_exception(WorkingDayException {
            id: Uuid::new_v4(),
            date: d(2025, 7, 12),
            exception_type: ExceptionType::Working,
            location_id: None,
            department_id: None,
            reason: Some("Inventario".to_string()),
        });
        // Christmas forced working
        service.store().insert_exception(WorkingDayException {
            id: Uuid::new_v4(),
            date: d(2025, 12, 25),
            exception_type: ExceptionType::Working,
            location_id: None,
            department_id: None,
            reason: None,
        });
        // A Tuesday forced non-working
        service.store().insert_exception(WorkingDayException {
            id: Uuid::new_v4(),
            date: d(2025, 7, 8),
            exception_type: ExceptionType::NonWorking,
            location_id: None,
            department_id: None,
            reason: None,
        });

        assert!(service.is_working_day(d(2025, 7, 12), None));
        assert!(service.is_working_day(d(2025, 12, 25), None));
        assert!(!service.is_working_day(d(2025, 7, 8), None));
    }

    #[test]
    fn range_sum_equals_per_day_sum() {
        let service = service();
        seed_profile_with_holidays(&service);
        let start = d(2025, 4, 14);
        let end = d(2025, 5, 2);

        let whole = service.working_days(start, end, false, false, None);
        let mut sum = Decimal::ZERO;
        let mut current = start;
        while current <= end {
            sum += service.working_days(current, current, false, false, None);
            current = current.succ_opt().unwrap();
        }
        assert_eq!(whole, sum);
    }

    #[test]
    fn aggregator_count_matches_kernel() {
        let service = service();
        seed_profile_with_holidays(&service);
        service.store().insert_closure(CalendarClosure {
            id: Uuid::new_v4(),
            name: "Chiusura estiva".to_string(),
            start_date: d(2025, 8, 11),
            end_date: d(2025, 8, 14),
            location_id: None,
            department_id: None,
            is_paid: true,
            consumes_leave_balance: false,
            leave_type_code: None,
            created_at: Utc::now(),
        });

        let start = d(2025, 8, 4);
        let end = d(2025, 8, 22);
        let view = service.calendar_range(Uuid::new_v4(), start, end, None, &[]);
        let kernel = service.working_days(start, end, false, false, None);
        assert_eq!(view.working_days_count, kernel);
        assert_eq!(view.days.len(), 19);
        assert!(view.days.iter().any(|day| day.is_closure));
    }

    #[test]
    fn closure_days_skip_weekends_and_consuming_closures() {
        let service = service();
        // Mon-Thu closure
        service.store().insert_closure(CalendarClosure {
            id: Uuid::new_v4(),
            name: "Chiusura".to_string(),
            start_date: d(2025, 8, 11),
            end_date: d(2025, 8, 17), // spills into the weekend
            location_id: None,
            department_id: None,
            is_paid: true,
            consumes_leave_balance: false,
            leave_type_code: None,
            created_at: Utc::now(),
        });
        service.store().insert_closure(CalendarClosure {
            id: Uuid::new_v4(),
            name: "Chiusura a scalare".to_string(),
            start_date: d(2025, 8, 18),
            end_date: d(2025, 8, 19),
            location_id: None,
            department_id: None,
            is_paid: true,
            consumes_leave_balance: true,
            leave_type_code: Some("vacation".to_string()),
            created_at: Utc::now(),
        });

        let days = service.non_consuming_closure_days(d(2025, 8, 1), d(2025, 8, 31), None);
        assert_eq!(days, dec!(5)); // Mon 11 .. Fri 15
    }
}
