//! Typed stores for the `leaves` schema.

use chrono::{Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
pub struct LeaveStore {
    requests: DashMap<Uuid, LeaveRequest>,
    interruptions: DashMap<Uuid, LeaveInterruption>,
    history: DashMap<Uuid, LeaveStatusChange>,
}

impl LeaveStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ─── Requests ───

    pub fn insert_request(&self, request: LeaveRequest) {
        self.requests.insert(request.id, request);
    }

    pub fn get_request(&self, id: Uuid) -> Option<LeaveRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    pub fn update_request(&self, mut request: LeaveRequest) -> CoreResult<()> {
        if !self.requests.contains_key(&request.id) {
            return Err(CoreError::not_found("LeaveRequest", request.id));
        }
        request.updated_at = Utc::now();
        self.requests.insert(request.id, request);
        Ok(())
    }

    pub fn delete_request(&self, id: Uuid) -> CoreResult<()> {
        self.requests
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::not_found("LeaveRequest", id))?;
        self.interruptions.retain(|_, i| i.leave_request_id != id);
        self.history.retain(|_, h| h.leave_request_id != id);
        Ok(())
    }

    /// Non-terminal requests of the user intersecting `[start, end]`,
    /// excluding `exclude_id`. Re-run inside the mutating operation so two
    /// concurrent creates serialize on the store.
    pub fn overlapping(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        exclude_id: Option<Uuid>,
    ) -> Vec<LeaveRequest> {
        self.requests
            .iter()
            .filter(|r| r.user_id == user_id && r.status.blocks_overlap())
            .filter(|r| exclude_id != Some(r.id))
            .filter(|r| r.start_date <= end && r.end_date >= start)
            .map(|r| r.clone())
            .collect()
    }

    pub fn by_user(
        &self,
        user_id: Uuid,
        year: Option<i32>,
        statuses: Option<&[LeaveRequestStatus]>,
    ) -> Vec<LeaveRequest> {
        let mut requests: Vec<LeaveRequest> = self
            .requests
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| year.map_or(true, |y| r.start_date.year() == y || r.end_date.year() == y))
            .filter(|r| statuses.map_or(true, |s| s.contains(&r.status)))
            .map(|r| r.clone())
            .collect();
        requests.sort_by_key(|r| r.start_date);
        requests
    }

    pub fn all(
        &self,
        statuses: Option<&[LeaveRequestStatus]>,
        year: Option<i32>,
        limit: usize,
    ) -> Vec<LeaveRequest> {
        let mut requests: Vec<LeaveRequest> = self
            .requests
            .iter()
            .filter(|r| statuses.map_or(true, |s| s.contains(&r.status)))
            .filter(|r| year.map_or(true, |y| r.start_date.year() == y))
            .map(|r| r.clone())
            .collect();
        requests.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        requests.truncate(limit);
        requests
    }

    /// Approved or conditionally approved requests intersecting a range
    /// (closure recalculation).
    pub fn approved_overlapping(&self, start: NaiveDate, end: NaiveDate) -> Vec<LeaveRequest> {
        self.requests
            .iter()
            .filter(|r| r.status.is_approved())
            .filter(|r| r.start_date <= end && r.end_date >= start)
            .map(|r| r.clone())
            .collect()
    }

    /// Working days already requested by the user for a type in the month of
    /// `date` (monthly-cap checks). Counts requests that block overlap.
    pub fn days_in_month(&self, user_id: Uuid, leave_type_code: &str, date: NaiveDate) -> Decimal {
        self.requests
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.leave_type_code == leave_type_code
                    && r.status.blocks_overlap()
                    && r.start_date.year() == date.year()
                    && r.start_date.month() == date.month()
            })
            .map(|r| r.days_requested)
            .sum()
    }

    // ─── Interruptions ───

    pub fn insert_interruption(&self, interruption: LeaveInterruption) {
        self.interruptions.insert(interruption.id, interruption);
    }

    pub fn get_interruption(&self, id: Uuid) -> Option<LeaveInterruption> {
        self.interruptions.get(&id).map(|i| i.clone())
    }

    pub fn update_interruption(&self, interruption: LeaveInterruption) -> CoreResult<()> {
        if !self.interruptions.contains_key(&interruption.id) {
            return Err(CoreError::not_found("LeaveInterruption", interruption.id));
        }
        self.interruptions.insert(interruption.id, interruption);
        Ok(())
    }

    pub fn interruptions_for_request(&self, request_id: Uuid) -> Vec<LeaveInterruption> {
        let mut interruptions: Vec<LeaveInterruption> = self
            .interruptions
            .iter()
            .filter(|i| i.leave_request_id == request_id)
            .map(|i| i.clone())
            .collect();
        interruptions.sort_by_key(|i| i.start_date);
        interruptions
    }

    /// ACTIVE sickness interruptions of the request intersecting a range.
    pub fn active_sickness_overlapping(
        &self,
        request_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<LeaveInterruption> {
        self.interruptions
            .iter()
            .filter(|i| {
                i.leave_request_id == request_id
                    && i.interruption_type == InterruptionType::Sickness
                    && i.status == InterruptionStatus::Active
                    && i.start_date <= end
                    && i.end_date >= start
            })
            .map(|i| i.clone())
            .collect()
    }

    pub fn pending_voluntary_for_request(&self, request_id: Uuid) -> Vec<LeaveInterruption> {
        self.interruptions
            .iter()
            .filter(|i| {
                i.leave_request_id == request_id
                    && i.interruption_type == InterruptionType::VoluntaryWork
                    && i.status == InterruptionStatus::PendingApproval
            })
            .map(|i| i.clone())
            .collect()
    }

    /// Pending voluntary-work requests across a set of users (a manager's
    /// subordinates).
    pub fn pending_voluntary_for_users(&self, user_ids: &[Uuid]) -> Vec<LeaveInterruption> {
        let mut pending: Vec<LeaveInterruption> = self
            .interruptions
            .iter()
            .filter(|i| {
                i.interruption_type == InterruptionType::VoluntaryWork
                    && i.status == InterruptionStatus::PendingApproval
            })
            .filter(|i| {
                self.get_request(i.leave_request_id)
                    .map_or(false, |r| user_ids.contains(&r.user_id))
            })
            .map(|i| i.clone())
            .collect();
        pending.sort_by_key(|i| i.created_at);
        pending
    }

    // ─── Status history ───

    pub fn add_status_change(
        &self,
        leave_request_id: Uuid,
        from_status: Option<LeaveRequestStatus>,
        to_status: LeaveRequestStatus,
        changed_by: Option<Uuid>,
        reason: Option<String>,
    ) {
        let change = LeaveStatusChange {
            id: Uuid::new_v4(),
            leave_request_id,
            from_status,
            to_status,
            changed_by,
            reason,
            created_at: Utc::now(),
        };
        self.history.insert(change.id, change);
    }

    pub fn history_for_request(&self, request_id: Uuid) -> Vec<LeaveStatusChange> {
        let mut changes: Vec<LeaveStatusChange> = self
            .history
            .iter()
            .filter(|h| h.leave_request_id == request_id)
            .map(|h| h.clone())
            .collect();
        changes.sort_by_key(|h| h.created_at);
        changes
    }
}
