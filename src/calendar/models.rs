//! Calendar configuration and range-view models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-weekday schedule entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DayConfig {
    pub is_working: bool,
    pub hours: Decimal,
}

impl DayConfig {
    pub fn working(hours: Decimal) -> Self {
        Self {
            is_working: true,
            hours,
        }
    }

    pub fn non_working() -> Self {
        Self {
            is_working: false,
            hours: Decimal::ZERO,
        }
    }
}

/// Weekly schedule, indexed by weekday (0 = Monday .. 6 = Sunday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkWeekProfile {
    pub id: Uuid,
    pub name: String,
    pub days: [DayConfig; 7],
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkWeekProfile {
    /// Built-in Monday-to-Friday fallback used when nothing is configured.
    pub fn mon_fri(id: Uuid) -> Self {
        let working = DayConfig::working(dec!(8));
        let off = DayConfig::non_working();
        Self {
            id,
            name: "Standard Mon-Fri".to_string(),
            days: [working, working, working, working, working, off, off],
            is_default: true,
            created_at: Utc::now(),
        }
    }
}

/// Recurrence forms for holiday rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Same month/day every year; invalid dates (Feb 29) are dropped.
    Yearly { month: u32, day: u32 },
    /// Western Easter Sunday plus an offset in days.
    EasterRelative { offset: i64 },
}

/// Groups holiday definitions; locations subscribe to profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolidayProfile {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fixed-date or recurring holiday definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarHoliday {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub name: String,
    /// Set for one-off holidays.
    pub date: Option<NaiveDate>,
    /// Set for recurring holidays.
    pub recurrence: Option<RecurrenceRule>,
    pub is_active: bool,
}

/// A holiday definition expanded to a concrete date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedHoliday {
    pub name: String,
    pub date: NaiveDate,
    pub is_recurring: bool,
}

/// Company-wide non-working range, optionally scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarClosure {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub location_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub is_paid: bool,
    /// When true, the leave engine treats closure days as consumed vacation
    /// instead of free days off.
    pub consumes_leave_balance: bool,
    pub leave_type_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CalendarClosure {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    Working,
    NonWorking,
}

/// Single-date override of both the weekly profile and the holiday set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingDayException {
    pub id: Uuid,
    pub date: NaiveDate,
    pub exception_type: ExceptionType,
    pub location_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// Links a location (None = default) to a weekly profile and the holiday
/// profiles whose dates apply there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCalendar {
    pub id: Uuid,
    pub location_id: Option<Uuid>,
    pub work_week_profile_id: Uuid,
    pub subscribed_profiles: Vec<Uuid>,
}

/// A user-visible calendar event (meetings, trainings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_all_day: bool,
}

/// Leave span handed to the range aggregator by the leave service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveSpan {
    pub id: Uuid,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarItemType {
    Holiday,
    Closure,
    Event,
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDayItem {
    pub id: Uuid,
    pub title: String,
    pub item_type: CalendarItemType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_all_day: bool,
}

/// One fused day of the range view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDayView {
    pub date: NaiveDate,
    pub is_working_day: bool,
    pub is_holiday: bool,
    pub is_closure: bool,
    pub holiday_name: Option<String>,
    pub items: Vec<CalendarDayItem>,
}

/// Aggregated per-day view over a range.
///
/// `working_days_count` agrees with the kernel's full-day count for the same
/// range and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarRangeView {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<CalendarDayView>,
    pub working_days_count: Decimal,
}

/// Per-day exclusion reason for the date-picker UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedDay {
    pub date: NaiveDate,
    pub reason: String,
}
