//! Timesheet entries and the supervisor approval gate
use crate::error::{PayrollError, Result};
use crate::rounding::{self, DayComputation, HoursSplit};
use crate::types::{TimeStamp, date_cbor, decimal_cbor, round_hours};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;

const MAX_DAY_HOURS: Decimal = dec!(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Who is asking for a transition. Admin-only moves check this marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn supervisor(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Supervisor,
        }
    }
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Identity of a timesheet: one entry per worker, project and date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimesheetKey {
    pub worker_id: String,
    pub project_id: String,
    pub date: NaiveDate,
}

impl TimesheetKey {
    pub fn new(worker_id: impl Into<String>, project_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            worker_id: worker_id.into(),
            project_id: project_id.into(),
            date,
        }
    }
}

// worker/date/project so one worker's entries are a contiguous, date ordered range
impl fmt::Display for TimesheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.worker_id,
            self.date.format("%Y-%m-%d"),
            self.project_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Timesheet {
    #[n(0)]
    #[cbor(with = "date_cbor")]
    pub date: NaiveDate,
    #[n(1)]
    pub worker_id: String,
    #[n(2)]
    pub project_id: String,
    #[n(3)]
    pub clock_in: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub clock_out: Option<TimeStamp<Utc>>,
    #[n(5)]
    #[cbor(with = "decimal_cbor")]
    pub regular_hours: Decimal,
    #[n(6)]
    #[cbor(with = "decimal_cbor")]
    pub overtime_hours: Decimal,
    #[n(7)]
    #[cbor(with = "decimal_cbor")]
    pub total_hours: Decimal,
    #[n(8)]
    #[cbor(with = "decimal_cbor")]
    pub hourly_rate: Decimal,
    #[n(9)]
    #[cbor(with = "decimal_cbor")]
    pub total_pay: Decimal,
    #[n(10)]
    pub supervisor_approval: ApprovalStatus,
    #[n(11)]
    pub notes: Option<String>,
}

impl Timesheet {
    /// Build a pending entry from a finalised day. Live computations are refused.
    pub fn from_day(key: &TimesheetKey, day: &DayComputation, hourly_rate: Decimal) -> Result<Self> {
        if day.is_live {
            return Err(PayrollError::Validation(format!(
                "timesheet {key} still has an open clock-in"
            )));
        }

        Ok(Self {
            date: key.date,
            worker_id: key.worker_id.clone(),
            project_id: key.project_id.clone(),
            clock_in: day.clock_in.map(TimeStamp::from),
            clock_out: day.clock_out.map(TimeStamp::from),
            regular_hours: day.hours.regular,
            overtime_hours: day.hours.overtime,
            total_hours: day.hours.total,
            hourly_rate,
            total_pay: day.total_pay,
            supervisor_approval: ApprovalStatus::Pending,
            notes: None,
        })
    }

    /// Manually entered hours, split and priced like clocked hours.
    pub fn manual(
        key: &TimesheetKey,
        hours: Decimal,
        hourly_rate: Decimal,
        notes: Option<String>,
    ) -> Result<Self> {
        validate_hours(hours)?;
        validate_rate(hourly_rate)?;

        let split = rounding::split_hours(round_hours(hours));
        Ok(Self {
            date: key.date,
            worker_id: key.worker_id.clone(),
            project_id: key.project_id.clone(),
            clock_in: None,
            clock_out: None,
            regular_hours: split.regular,
            overtime_hours: split.overtime,
            total_hours: split.total,
            hourly_rate,
            total_pay: rounding::compute_pay(&split, hourly_rate),
            supervisor_approval: ApprovalStatus::Pending,
            notes,
        })
    }

    pub fn key(&self) -> TimesheetKey {
        TimesheetKey::new(self.worker_id.clone(), self.project_id.clone(), self.date)
    }

    pub fn is_approved(&self) -> bool {
        self.supervisor_approval == ApprovalStatus::Approved
    }

    /// Correct hours on an entry that is not approved yet.
    pub fn correct_hours(&mut self, hours: Decimal, notes: Option<String>) -> Result<()> {
        if self.is_approved() {
            return Err(PayrollError::StateConflict(format!(
                "timesheet {} is approved; hours are locked",
                self.key()
            )));
        }
        validate_hours(hours)?;

        let split = rounding::split_hours(round_hours(hours));
        self.apply_split(split);
        if notes.is_some() {
            self.notes = notes;
        }
        Ok(())
    }

    fn apply_split(&mut self, split: HoursSplit) {
        self.regular_hours = split.regular;
        self.overtime_hours = split.overtime;
        self.total_hours = split.total;
        self.total_pay = rounding::compute_pay(&split, self.hourly_rate);
    }

    /// Move the approval status. `approved -> pending` is reserved for admins and
    /// `rejected` only leaves through a reset to `pending`.
    pub fn transition(&mut self, to: ApprovalStatus, actor: &Actor) -> Result<()> {
        use ApprovalStatus::*;

        let allowed = match (self.supervisor_approval, to) {
            (Pending, Approved) | (Pending, Rejected) | (Rejected, Pending) => true,
            (Approved, Pending) => {
                if !actor.is_admin() {
                    return Err(PayrollError::StateConflict(format!(
                        "only an admin can reopen approved timesheet {}",
                        self.key()
                    )));
                }
                true
            }
            _ => false,
        };

        if !allowed {
            return Err(PayrollError::StateConflict(format!(
                "timesheet {} cannot move from {} to {}",
                self.key(),
                self.supervisor_approval,
                to
            )));
        }

        self.supervisor_approval = to;
        Ok(())
    }
}

fn validate_hours(hours: Decimal) -> Result<()> {
    if hours < Decimal::ZERO || hours > MAX_DAY_HOURS {
        return Err(PayrollError::Validation(format!(
            "hours {hours} must be between 0 and 24"
        )));
    }
    Ok(())
}

fn validate_rate(rate: Decimal) -> Result<()> {
    if rate < Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "hourly rate {rate} is negative"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TimesheetKey {
        TimesheetKey::new("worker_1", "project_1", NaiveDate::from_ymd_opt(2024, 5, 6).unwrap())
    }

    fn pending() -> Timesheet {
        Timesheet::manual(&key(), dec!(9.5), dec!(20), None).unwrap()
    }

    #[test]
    fn manual_entry_splits_overtime() {
        let sheet = pending();

        assert_eq!(sheet.regular_hours, dec!(8));
        assert_eq!(sheet.overtime_hours, dec!(1.5));
        assert_eq!(sheet.total_hours, sheet.regular_hours + sheet.overtime_hours);
        assert_eq!(sheet.total_pay, dec!(205.00));
    }

    #[test]
    fn approval_flow_and_locking() {
        let mut sheet = pending();
        let supervisor = Actor::supervisor("sup_1");

        sheet.transition(ApprovalStatus::Approved, &supervisor).unwrap();
        assert!(sheet.correct_hours(dec!(7), None).is_err());

        // reopening needs an admin
        assert!(sheet.transition(ApprovalStatus::Pending, &supervisor).is_err());
        sheet
            .transition(ApprovalStatus::Pending, &Actor::admin("admin_1"))
            .unwrap();

        sheet.correct_hours(dec!(7), Some("left early".into())).unwrap();
        assert_eq!(sheet.total_hours, dec!(7));
        assert_eq!(sheet.total_pay, dec!(140.00));
    }

    #[test]
    fn rejected_only_resets_to_pending() {
        let mut sheet = pending();
        let supervisor = Actor::supervisor("sup_1");

        sheet.transition(ApprovalStatus::Rejected, &supervisor).unwrap();
        assert!(sheet.transition(ApprovalStatus::Approved, &supervisor).is_err());

        sheet.transition(ApprovalStatus::Pending, &supervisor).unwrap();
        sheet.transition(ApprovalStatus::Approved, &supervisor).unwrap();
        assert!(sheet.is_approved());
    }

    #[test]
    fn manual_hours_are_bounded() {
        assert!(Timesheet::manual(&key(), dec!(25), dec!(20), None).is_err());
        assert!(Timesheet::manual(&key(), dec!(-1), dec!(20), None).is_err());
    }

    #[test]
    fn cbor_round_trip_keeps_decimals() {
        let sheet = pending();

        let encoded = minicbor::to_vec(&sheet).unwrap();
        let decoded: Timesheet = minicbor::decode(&encoded).unwrap();
        assert_eq!(sheet, decoded);
    }

    #[test]
    fn key_orders_by_worker_then_date() {
        assert_eq!(key().to_string(), "worker_1/2024-05-06/project_1");
    }
}
