//! Payroll records, pay periods, aggregation and the payroll status machine
use crate::deduction::{self, DeductionRates, Deductions, WorkerExemptions};
use crate::error::{PayrollError, Result};
use crate::ledger::PaymentBasis;
use crate::timesheet::{Actor, Timesheet};
use crate::types::{TimeStamp, date_cbor, decimal_cbor};
use chrono::{Datelike, NaiveDate, TimeDelta, Utc, Weekday};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum PayrollStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Paid,
    #[n(3)]
    Void,
}

impl fmt::Display for PayrollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayrollStatus::Pending => "pending",
            PayrollStatus::Confirmed => "confirmed",
            PayrollStatus::Paid => "paid",
            PayrollStatus::Void => "void",
        };
        f.write_str(name)
    }
}

/// The explicit lifecycle moves a payroll record can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Confirm,  // pending -> confirmed
    MarkPaid, // confirmed -> paid
    Reopen,   // confirmed -> pending, admin
    Unpay,    // paid -> confirmed, admin
    Void,     // pending | confirmed -> void
}

impl StatusChange {
    /// The forward (or reopening) move that ends in `status`.
    pub fn towards(status: PayrollStatus) -> Self {
        match status {
            PayrollStatus::Pending => StatusChange::Reopen,
            PayrollStatus::Confirmed => StatusChange::Confirm,
            PayrollStatus::Paid => StatusChange::MarkPaid,
            PayrollStatus::Void => StatusChange::Void,
        }
    }

    pub fn sources(&self) -> &'static [PayrollStatus] {
        match self {
            StatusChange::Confirm => &[PayrollStatus::Pending],
            StatusChange::MarkPaid => &[PayrollStatus::Confirmed],
            StatusChange::Reopen => &[PayrollStatus::Confirmed],
            StatusChange::Unpay => &[PayrollStatus::Paid],
            StatusChange::Void => &[PayrollStatus::Pending, PayrollStatus::Confirmed],
        }
    }

    pub fn target(&self) -> PayrollStatus {
        match self {
            StatusChange::Confirm | StatusChange::Unpay => PayrollStatus::Confirmed,
            StatusChange::MarkPaid => PayrollStatus::Paid,
            StatusChange::Reopen => PayrollStatus::Pending,
            StatusChange::Void => PayrollStatus::Void,
        }
    }

    pub fn admin_only(&self) -> bool {
        matches!(self, StatusChange::Reopen | StatusChange::Unpay)
    }

    pub fn accepts(&self, from: PayrollStatus) -> bool {
        self.sources().contains(&from)
    }
}

/// Inclusive date range bucketing timesheets into one payroll per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PayPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(PayrollError::Validation(format!(
                "pay period start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The weekly period beginning on `week_start` that contains `date`.
    pub fn containing(date: NaiveDate, week_start: Weekday) -> Self {
        let offset = (date.weekday().num_days_from_monday() + 7
            - week_start.num_days_from_monday())
            % 7;
        let start = date - TimeDelta::days(i64::from(offset));

        Self {
            start,
            end: start + TimeDelta::days(6),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Upsert key of a payroll record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayrollKey {
    pub worker_id: String,
    pub period: PayPeriod,
    pub project_id: Option<String>,
}

impl PayrollKey {
    pub fn new(worker_id: impl Into<String>, period: PayPeriod, project_id: Option<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            period,
            project_id,
        }
    }
}

impl fmt::Display for PayrollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.worker_id, self.period)?;
        if let Some(project_id) = &self.project_id {
            write!(f, "/{project_id}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PayrollRecord {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7, prefix `payroll_`
    #[n(1)]
    pub worker_id: String,
    #[n(2)]
    pub project_id: Option<String>,
    #[n(3)]
    #[cbor(with = "date_cbor")]
    pub pay_period_start: NaiveDate,
    #[n(4)]
    #[cbor(with = "date_cbor")]
    pub pay_period_end: NaiveDate,
    #[n(5)]
    #[cbor(with = "decimal_cbor")]
    pub total_hours: Decimal,
    #[n(6)]
    #[cbor(with = "decimal_cbor")]
    pub regular_hours: Decimal,
    #[n(7)]
    #[cbor(with = "decimal_cbor")]
    pub overtime_hours: Decimal,
    #[n(8)]
    #[cbor(with = "decimal_cbor")]
    pub gross_pay: Decimal,
    #[n(9)]
    #[cbor(with = "decimal_cbor")]
    pub nib_deduction: Decimal,
    #[n(10)]
    #[cbor(with = "decimal_cbor")]
    pub other_deductions: Decimal,
    #[n(11)]
    #[cbor(with = "decimal_cbor")]
    pub total_deductions: Decimal,
    #[n(12)]
    #[cbor(with = "decimal_cbor")]
    pub net_pay: Decimal,
    #[n(13)]
    pub status: PayrollStatus,
    #[n(14)]
    #[cbor(with = "decimal_cbor")]
    pub total_paid: Decimal,
    #[n(15)]
    #[cbor(with = "decimal_cbor")]
    pub remaining_balance: Decimal,
    #[n(16)]
    pub created_at: TimeStamp<Utc>,
    #[n(17)]
    pub updated_at: TimeStamp<Utc>,
}

/// Derived amounts for one worker and period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayrollTotals {
    pub total_hours: Decimal,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    pub gross_pay: Decimal,
    pub deductions: Deductions,
    pub net_pay: Decimal,
    pub timesheet_count: usize,
}

/// Sum the approved timesheets of `key.worker_id` dated inside the period
/// (and on the key's project when scoped) and apply deductions. Nothing to
/// include is `NotFound`.
pub fn aggregate(
    key: &PayrollKey,
    timesheets: &[Timesheet],
    exemptions: WorkerExemptions,
    rates: &DeductionRates,
) -> Result<PayrollTotals> {
    let totals = totals_for(key, timesheets, exemptions, rates)?;
    if totals.timesheet_count == 0 {
        return Err(PayrollError::NotFound(format!(
            "approved timesheets for payroll {key}"
        )));
    }
    Ok(totals)
}

/// Like [`aggregate`] but an empty selection yields zero totals.
pub fn totals_for(
    key: &PayrollKey,
    timesheets: &[Timesheet],
    exemptions: WorkerExemptions,
    rates: &DeductionRates,
) -> Result<PayrollTotals> {
    let included: Vec<&Timesheet> = timesheets
        .iter()
        .filter(|sheet| sheet.worker_id == key.worker_id)
        .filter(|sheet| sheet.is_approved())
        .filter(|sheet| key.period.contains(sheet.date))
        .filter(|sheet| {
            key.project_id
                .as_ref()
                .is_none_or(|project| *project == sheet.project_id)
        })
        .collect();

    let total_hours: Decimal = included.iter().map(|s| s.total_hours).sum();
    let regular_hours: Decimal = included.iter().map(|s| s.regular_hours).sum();
    let overtime_hours: Decimal = included.iter().map(|s| s.overtime_hours).sum();
    let gross_pay: Decimal = included.iter().map(|s| s.total_pay).sum();

    let deductions = deduction::calculate(gross_pay, exemptions, rates)?;

    Ok(PayrollTotals {
        total_hours,
        regular_hours,
        overtime_hours,
        gross_pay,
        deductions,
        net_pay: gross_pay - deductions.total_deductions,
        timesheet_count: included.len(),
    })
}

impl PayrollRecord {
    pub fn new(id: String, key: &PayrollKey, totals: &PayrollTotals, basis: PaymentBasis) -> Self {
        let now = TimeStamp::new();
        let mut record = Self {
            id,
            worker_id: key.worker_id.clone(),
            project_id: key.project_id.clone(),
            pay_period_start: key.period.start,
            pay_period_end: key.period.end,
            total_hours: Decimal::ZERO,
            regular_hours: Decimal::ZERO,
            overtime_hours: Decimal::ZERO,
            gross_pay: Decimal::ZERO,
            nib_deduction: Decimal::ZERO,
            other_deductions: Decimal::ZERO,
            total_deductions: Decimal::ZERO,
            net_pay: Decimal::ZERO,
            status: PayrollStatus::Pending,
            total_paid: Decimal::ZERO,
            remaining_balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        record.apply_totals(totals, basis);
        record
    }

    pub fn key(&self) -> PayrollKey {
        PayrollKey {
            worker_id: self.worker_id.clone(),
            period: PayPeriod {
                start: self.pay_period_start,
                end: self.pay_period_end,
            },
            project_id: self.project_id.clone(),
        }
    }

    /// Overwrite derived amounts. `total_paid` is ledger owned and left alone.
    pub fn apply_totals(&mut self, totals: &PayrollTotals, basis: PaymentBasis) {
        self.total_hours = totals.total_hours;
        self.regular_hours = totals.regular_hours;
        self.overtime_hours = totals.overtime_hours;
        self.gross_pay = totals.gross_pay;
        self.nib_deduction = totals.deductions.nib_deduction;
        self.other_deductions = totals.deductions.other_deductions;
        self.total_deductions = totals.deductions.total_deductions;
        self.net_pay = totals.net_pay;
        self.updated_at = TimeStamp::new();
        self.refresh_balance(basis);
    }

    pub fn basis_amount(&self, basis: PaymentBasis) -> Decimal {
        match basis {
            PaymentBasis::NetPay => self.net_pay,
            PaymentBasis::GrossPay => self.gross_pay,
        }
    }

    /// `max(0, basis - total_paid)`, forced to zero once paid.
    pub fn remaining_for(&self, basis: PaymentBasis) -> Decimal {
        if self.status == PayrollStatus::Paid {
            return Decimal::ZERO;
        }
        (self.basis_amount(basis) - self.total_paid).max(Decimal::ZERO)
    }

    pub fn refresh_balance(&mut self, basis: PaymentBasis) {
        self.remaining_balance = self.remaining_for(basis);
    }

    /// Apply a lifecycle move, returning the previous status.
    pub fn transition(
        &mut self,
        change: StatusChange,
        actor: &Actor,
        basis: PaymentBasis,
    ) -> Result<PayrollStatus> {
        if !change.accepts(self.status) {
            return Err(PayrollError::StateConflict(format!(
                "payroll {} is {}; cannot move to {}",
                self.id,
                self.status,
                change.target()
            )));
        }
        if change.admin_only() && !actor.is_admin() {
            return Err(PayrollError::StateConflict(format!(
                "reverting payroll {} to {} requires an admin",
                self.id,
                change.target()
            )));
        }

        let previous = self.status;
        self.status = change.target();
        self.updated_at = TimeStamp::new();
        self.refresh_balance(basis);
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timesheet::{ApprovalStatus, TimesheetKey};
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn sheet(day: u32, project: &str, hours: Decimal, approval: ApprovalStatus) -> Timesheet {
        let mut sheet =
            Timesheet::manual(&TimesheetKey::new("worker_1", project, date(day)), hours, dec!(20), None)
                .unwrap();
        sheet.supervisor_approval = approval;
        sheet
    }

    fn week() -> PayPeriod {
        PayPeriod::containing(date(8), Weekday::Sat)
    }

    fn rates() -> DeductionRates {
        DeductionRates {
            nib_rate: dec!(0.05),
            nib_insurable_cap: None,
            other: vec![],
        }
    }

    #[test]
    fn period_snaps_to_configured_weekday() {
        // 2024-05-08 is a Wednesday
        let period = week();
        assert_eq!(period.start, date(4));
        assert_eq!(period.end, date(10));
        assert_eq!(period.start.weekday(), Weekday::Sat);

        // a date on the boundary day starts its own period
        assert_eq!(PayPeriod::containing(date(4), Weekday::Sat), period);
        assert_eq!(PayPeriod::containing(date(6), Weekday::Mon).start, date(6));
    }

    #[test]
    fn period_rejects_inverted_range() {
        assert!(PayPeriod::new(date(10), date(4)).is_err());
    }

    #[test]
    fn aggregates_only_approved_sheets_inside_period() {
        let sheets = vec![
            sheet(6, "p1", dec!(9), ApprovalStatus::Approved),
            sheet(7, "p2", dec!(8), ApprovalStatus::Approved),
            sheet(8, "p1", dec!(8), ApprovalStatus::Pending),
            sheet(11, "p1", dec!(8), ApprovalStatus::Approved), // next period
        ];
        let key = PayrollKey::new("worker_1", week(), None);

        let totals = aggregate(&key, &sheets, WorkerExemptions::default(), &rates()).unwrap();
        assert_eq!(totals.timesheet_count, 2);
        assert_eq!(totals.total_hours, dec!(17));
        assert_eq!(totals.overtime_hours, dec!(1));
        assert_eq!(totals.gross_pay, dec!(350.00));
        assert_eq!(totals.deductions.nib_deduction, dec!(17.50));
        assert_eq!(totals.net_pay, dec!(332.50));

        let scoped = PayrollKey::new("worker_1", week(), Some("p2".into()));
        let totals = aggregate(&scoped, &sheets, WorkerExemptions::default(), &rates()).unwrap();
        assert_eq!(totals.gross_pay, dec!(160.00));
    }

    #[test]
    fn nothing_approved_is_not_found() {
        let sheets = vec![sheet(6, "p1", dec!(8), ApprovalStatus::Pending)];
        let key = PayrollKey::new("worker_1", week(), None);

        let err = aggregate(&key, &sheets, WorkerExemptions::default(), &rates()).unwrap_err();
        assert!(matches!(err, PayrollError::NotFound(_)));

        let empty = totals_for(&key, &sheets, WorkerExemptions::default(), &rates()).unwrap();
        assert_eq!(empty.timesheet_count, 0);
        assert_eq!(empty.gross_pay, Decimal::ZERO);
        assert_eq!(empty.net_pay, Decimal::ZERO);
    }

    #[test]
    fn record_invariants_and_lifecycle() {
        let sheets = vec![sheet(6, "p1", dec!(8), ApprovalStatus::Approved)];
        let key = PayrollKey::new("worker_1", week(), None);
        let totals = aggregate(&key, &sheets, WorkerExemptions::default(), &rates()).unwrap();
        let mut record = PayrollRecord::new("payroll_x".into(), &key, &totals, PaymentBasis::NetPay);

        assert_eq!(record.net_pay, record.gross_pay - record.total_deductions);
        assert_eq!(record.remaining_balance, record.net_pay);
        assert_eq!(record.key(), key);

        let clerk = Actor::supervisor("clerk");
        let admin = Actor::admin("admin");

        assert!(record.transition(StatusChange::MarkPaid, &clerk, PaymentBasis::NetPay).is_err());
        record.transition(StatusChange::Confirm, &clerk, PaymentBasis::NetPay).unwrap();
        record.transition(StatusChange::MarkPaid, &clerk, PaymentBasis::NetPay).unwrap();
        assert_eq!(record.remaining_balance, Decimal::ZERO);

        assert!(record.transition(StatusChange::Void, &admin, PaymentBasis::NetPay).is_err());
        assert!(record.transition(StatusChange::Unpay, &clerk, PaymentBasis::NetPay).is_err());
        let previous = record
            .transition(StatusChange::Unpay, &admin, PaymentBasis::NetPay)
            .unwrap();
        assert_eq!(previous, PayrollStatus::Paid);
        assert_eq!(record.remaining_balance, record.net_pay);
    }

    #[test]
    fn key_display_includes_project_scope() {
        let key = PayrollKey::new("worker_1", week(), Some("p1".into()));
        assert_eq!(key.to_string(), "worker_1/2024-05-04/2024-05-10/p1");
    }
}
