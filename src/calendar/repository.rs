//! Typed in-memory stores for calendar configuration.

use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use crate::error::{CoreError, CoreResult};

/// Calendar configuration store.
///
/// Stand-in for the `calendar` schema; queries mirror the repository layer
/// of the relational implementation.
#[derive(Debug, Default)]
pub struct CalendarStore {
    work_week_profiles: DashMap<Uuid, WorkWeekProfile>,
    holiday_profiles: DashMap<Uuid, HolidayProfile>,
    holidays: DashMap<Uuid, CalendarHoliday>,
    closures: DashMap<Uuid, CalendarClosure>,
    exceptions: DashMap<Uuid, WorkingDayException>,
    location_calendars: DashMap<Uuid, LocationCalendar>,
    events: DashMap<Uuid, CalendarEvent>,
}

impl CalendarStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ─── Work-week profiles ───

    pub fn insert_work_week_profile(&self, profile: WorkWeekProfile) {
        self.work_week_profiles.insert(profile.id, profile);
    }

    pub fn get_work_week_profile(&self, id: Uuid) -> Option<WorkWeekProfile> {
        self.work_week_profiles.get(&id).map(|p| p.clone())
    }

    pub fn default_work_week_profile(&self) -> Option<WorkWeekProfile> {
        self.work_week_profiles
            .iter()
            .find(|p| p.is_default)
            .map(|p| p.clone())
    }

    pub fn list_work_week_profiles(&self) -> Vec<WorkWeekProfile> {
        self.work_week_profiles.iter().map(|p| p.clone()).collect()
    }

    pub fn update_work_week_profile(&self, profile: WorkWeekProfile) -> CoreResult<()> {
        if !self.work_week_profiles.contains_key(&profile.id) {
            return Err(CoreError::not_found("WorkWeekProfile", profile.id));
        }
        self.work_week_profiles.insert(profile.id, profile);
        Ok(())
    }

    pub fn delete_work_week_profile(&self, id: Uuid) -> CoreResult<()> {
        if self
            .location_calendars
            .iter()
            .any(|lc| lc.work_week_profile_id == id)
        {
            return Err(CoreError::conflict(
                "WorkWeekProfile",
                id,
                "profile is referenced by a location calendar",
            ));
        }
        self.work_week_profiles
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::not_found("WorkWeekProfile", id))
    }

    // ─── Holiday profiles & holidays ───

    pub fn insert_holiday_profile(&self, profile: HolidayProfile) {
        self.holiday_profiles.insert(profile.id, profile);
    }

    pub fn get_holiday_profile(&self, id: Uuid) -> Option<HolidayProfile> {
        self.holiday_profiles.get(&id).map(|p| p.clone())
    }

    pub fn list_holiday_profiles(&self) -> Vec<HolidayProfile> {
        self.holiday_profiles.iter().map(|p| p.clone()).collect()
    }

    pub fn insert_holiday(&self, holiday: CalendarHoliday) -> CoreResult<()> {
        if !self.holiday_profiles.contains_key(&holiday.profile_id) {
            return Err(CoreError::not_found("HolidayProfile", holiday.profile_id));
        }
        self.holidays.insert(holiday.id, holiday);
        Ok(())
    }

    pub fn update_holiday(&self, holiday: CalendarHoliday) -> CoreResult<()> {
        if !self.holidays.contains_key(&holiday.id) {
            return Err(CoreError::not_found("CalendarHoliday", holiday.id));
        }
        self.holidays.insert(holiday.id, holiday);
        Ok(())
    }

    pub fn delete_holiday(&self, id: Uuid) -> CoreResult<()> {
        self.holidays
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::not_found("CalendarHoliday", id))
    }

    /// Active holiday definitions across the given profiles.
    pub fn holidays_for_profiles(&self, profile_ids: &[Uuid]) -> Vec<CalendarHoliday> {
        self.holidays
            .iter()
            .filter(|h| h.is_active && profile_ids.contains(&h.profile_id))
            .map(|h| h.clone())
            .collect()
    }

    /// All active holiday definitions (used when a location subscribes to nothing).
    pub fn all_active_holidays(&self) -> Vec<CalendarHoliday> {
        let active_profiles: Vec<Uuid> = self
            .holiday_profiles
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.id)
            .collect();
        self.holidays_for_profiles(&active_profiles)
    }

    // ─── Closures ───

    pub fn insert_closure(&self, closure: CalendarClosure) {
        self.closures.insert(closure.id, closure);
    }

    pub fn get_closure(&self, id: Uuid) -> Option<CalendarClosure> {
        self.closures.get(&id).map(|c| c.clone())
    }

    /// Callers re-run the leave recalculation for both the old and the new
    /// range after an update.
    pub fn update_closure(&self, closure: CalendarClosure) -> CoreResult<CalendarClosure> {
        if !self.closures.contains_key(&closure.id) {
            return Err(CoreError::not_found("CalendarClosure", closure.id));
        }
        let previous = self
            .closures
            .insert(closure.id, closure)
            .expect("closure row checked above");
        Ok(previous)
    }

    pub fn delete_closure(&self, id: Uuid) -> CoreResult<CalendarClosure> {
        self.closures
            .remove(&id)
            .map(|(_, c)| c)
            .ok_or(CoreError::not_found("CalendarClosure", id))
    }

    pub fn closures_overlapping(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> Vec<CalendarClosure> {
        self.closures
            .iter()
            .filter(|c| c.start_date <= end && c.end_date >= start)
            .filter(|c| c.location_id.is_none() || c.location_id == location_id)
            .map(|c| c.clone())
            .collect()
    }

    // ─── Working-day exceptions ───

    pub fn insert_exception(&self, exception: WorkingDayException) {
        self.exceptions.insert(exception.id, exception);
    }

    pub fn delete_exception(&self, id: Uuid) -> CoreResult<()> {
        self.exceptions
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::not_found("WorkingDayException", id))
    }

    pub fn exceptions_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        location_id: Option<Uuid>,
    ) -> Vec<WorkingDayException> {
        self.exceptions
            .iter()
            .filter(|e| start <= e.date && e.date <= end)
            .filter(|e| e.location_id.is_none() || e.location_id == location_id)
            .map(|e| e.clone())
            .collect()
    }

    // ─── Location calendars ───

    pub fn insert_location_calendar(&self, lc: LocationCalendar) {
        self.location_calendars.insert(lc.id, lc);
    }

    pub fn location_calendar_for(&self, location_id: Option<Uuid>) -> Option<LocationCalendar> {
        self.location_calendars
            .iter()
            .find(|lc| lc.location_id == location_id)
            .map(|lc| lc.clone())
    }

    pub fn list_location_calendars(&self) -> Vec<LocationCalendar> {
        self.location_calendars.iter().map(|lc| lc.clone()).collect()
    }

    // ─── Events ───

    pub fn insert_event(&self, event: CalendarEvent) {
        self.events.insert(event.id, event);
    }

    pub fn delete_event(&self, id: Uuid, user_id: Uuid) -> CoreResult<()> {
        match self.events.get(&id) {
            Some(e) if e.user_id != user_id => Err(CoreError::rule(
                "EVENT_OWNERSHIP",
                "cannot delete another user's event",
            )),
            Some(_) => {
                self.events.remove(&id);
                Ok(())
            }
            None => Err(CoreError::not_found("CalendarEvent", id)),
        }
    }

    pub fn events_for_user(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<CalendarEvent> {
        self.events
            .iter()
            .filter(|e| e.user_id == user_id && e.start_date <= end && e.end_date >= start)
            .map(|e| e.clone())
            .collect()
    }
}
