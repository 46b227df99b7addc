//! Leave request data model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::balance::BalanceBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveRequestStatus {
    Draft,
    Pending,
    Approved,
    ApprovedConditional,
    Rejected,
    Cancelled,
    Expired,
    Recalled,
}

impl LeaveRequestStatus {
    /// Statuses that occupy their date range for overlap purposes.
    pub fn blocks_overlap(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::Pending | Self::Approved | Self::ApprovedConditional
        )
    }

    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedConditional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionType {
    PartialRecall,
    Sickness,
    VoluntaryWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionStatus {
    Active,
    PendingApproval,
    Approved,
    Rejected,
}

/// A leave request through its full lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub leave_type_id: Uuid,
    pub leave_type_code: String,
    pub status: LeaveRequestStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_half_day: bool,
    pub end_half_day: bool,
    pub days_requested: Decimal,
    pub employee_notes: Option<String>,
    pub approver_notes: Option<String>,
    pub rejection_reason: Option<String>,
    /// INPS telematic protocol, mandatory for protocol-bearing types.
    pub protocol_number: Option<String>,
    /// Planned per-bucket deduction, fixed at submit.
    pub deduction_details: Option<BalanceBreakdown>,
    pub balance_deducted: bool,
    pub policy_warnings: Vec<String>,
    pub condition_type: Option<String>,
    pub condition_details: Option<String>,
    pub condition_accepted: Option<bool>,
    pub condition_accepted_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub recalled_at: Option<DateTime<Utc>>,
    pub recall_reason: Option<String>,
    pub recall_date: Option<NaiveDate>,
    pub days_used_before_recall: Option<Decimal>,
    pub has_interruptions: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Child of an approved request; authoritative for the day delta it refunds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveInterruption {
    pub id: Uuid,
    pub leave_request_id: Uuid,
    pub interruption_type: InterruptionType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Concrete dates for non-contiguous interruptions.
    pub specific_days: Vec<NaiveDate>,
    /// Zero while PENDING_APPROVAL.
    pub days_refunded: Decimal,
    pub protocol_number: Option<String>,
    pub initiated_by: Uuid,
    pub initiated_by_role: String,
    pub reason: Option<String>,
    pub status: InterruptionStatus,
    pub created_at: DateTime<Utc>,
}

/// Status transition record, distinct from the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveStatusChange {
    pub id: Uuid,
    pub leave_request_id: Uuid,
    pub from_status: Option<LeaveRequestStatus>,
    pub to_status: LeaveRequestStatus,
    pub changed_by: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Inbound DTOs ───

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LeaveRequestCreate {
    pub leave_type_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub start_half_day: bool,
    #[serde(default)]
    pub end_half_day: bool,
    #[validate(length(max = 2000))]
    pub employee_notes: Option<String>,
    pub protocol_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaveRequestUpdate {
    pub leave_type_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_half_day: Option<bool>,
    pub end_half_day: Option<bool>,
    pub employee_notes: Option<String>,
    pub protocol_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveData {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectData {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionalData {
    pub condition_type: String,
    pub condition_details: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptConditionData {
    pub accept: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelData {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecallData {
    pub recall_date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PartialRecallData {
    #[validate(length(min = 1))]
    pub recall_days: Vec<NaiveDate>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SicknessData {
    pub sick_start_date: NaiveDate,
    pub sick_end_date: NaiveDate,
    pub protocol_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VoluntaryWorkData {
    #[validate(length(min = 1))]
    pub work_days: Vec<NaiveDate>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModifyApprovedData {
    pub new_start_date: Option<NaiveDate>,
    pub new_end_date: Option<NaiveDate>,
    pub new_start_half_day: Option<bool>,
    pub new_end_half_day: Option<bool>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaysPreviewRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub start_half_day: bool,
    #[serde(default)]
    pub end_half_day: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaysPreviewResponse {
    pub days: Decimal,
    pub hours: Decimal,
    pub message: String,
}

/// One affected request in a closure recalculation report.
#[derive(Debug, Clone, Serialize)]
pub struct ClosureRecalcUpdate {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub old_days: Decimal,
    pub new_days: Decimal,
    pub days_refunded: Decimal,
}

/// Per-bucket availability summary for a user-year.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub user_id: Uuid,
    pub year: i32,
    pub vacation_ap_available: Decimal,
    pub vacation_ac_available: Decimal,
    pub rol_available: Decimal,
    pub permits_available: Decimal,
    pub ap_expiry_date: NaiveDate,
    pub total_vacation_available: Decimal,
}
