//! Payment ledger
//!
//! Append-only payments against a payroll record. Entries are never deleted;
//! voided entries stay in the ledger for audit and are excluded from sums.
//! The functions here are the balance rules; the service runs them inside a
//! storage transaction per payroll record.
use crate::error::{PayrollError, Result};
use crate::payroll::{PayrollRecord, PayrollStatus};
use crate::types::{TimeStamp, date_cbor, decimal_cbor};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Which payroll amount payments are settled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentBasis {
    #[default]
    NetPay,
    GrossPay,
}

impl FromStr for PaymentBasis {
    type Err = PayrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "net" | "net_pay" => Ok(PaymentBasis::NetPay),
            "gross" | "gross_pay" => Ok(PaymentBasis::GrossPay),
            other => Err(PayrollError::Validation(format!(
                "unknown payment basis '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum PaymentStatus {
    #[n(0)]
    Completed,
    #[n(1)]
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PayrollPayment {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7, prefix `payment_`
    #[n(1)]
    pub payroll_id: String,
    #[n(2)]
    #[cbor(with = "decimal_cbor")]
    pub amount: Decimal,
    #[n(3)]
    #[cbor(with = "date_cbor")]
    pub payment_date: NaiveDate,
    #[n(4)]
    pub status: PaymentStatus,
    #[n(5)]
    pub notes: Option<String>,
    #[n(6)]
    pub recorded_by: String,
    #[n(7)]
    pub recorded_at: TimeStamp<Utc>,
}

/// The caller supplied part of a new ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub id: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub recorded_by: String,
}

/// Outcome of setting the cumulative amount paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub previous_total: Decimal,
    pub target_total: Decimal,
    pub delta: Decimal,
    pub voided: usize,
    pub entry: Option<PayrollPayment>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.delta.is_zero()
    }
}

pub fn total_paid(ledger: &[PayrollPayment]) -> Decimal {
    ledger
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum()
}

fn ensure_payable(record: &PayrollRecord) -> Result<()> {
    match record.status {
        PayrollStatus::Confirmed | PayrollStatus::Paid => Ok(()),
        status => Err(PayrollError::StateConflict(format!(
            "payroll {} is {status}; payments need a confirmed or paid payroll",
            record.id
        ))),
    }
}

fn ensure_within_basis(record: &PayrollRecord, new_total: Decimal, basis: PaymentBasis) -> Result<()> {
    let limit = record.basis_amount(basis);
    if new_total > limit {
        return Err(PayrollError::IntegrityGuard(format!(
            "payments of {new_total} on payroll {} would exceed {limit}",
            record.id
        )));
    }
    Ok(())
}

/// Append a completed payment after checking amount, status and basis.
pub fn add_payment(
    record: &mut PayrollRecord,
    ledger: &mut Vec<PayrollPayment>,
    payment: NewPayment,
    basis: PaymentBasis,
) -> Result<PayrollPayment> {
    if payment.amount <= Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "payment amount {} must be positive",
            payment.amount
        )));
    }
    ensure_payable(record)?;

    let paid = total_paid(ledger);
    ensure_within_basis(record, paid + payment.amount, basis)?;

    let entry = PayrollPayment {
        id: payment.id,
        payroll_id: record.id.clone(),
        amount: payment.amount,
        payment_date: payment.payment_date,
        status: PaymentStatus::Completed,
        notes: payment.notes,
        recorded_by: payment.recorded_by,
        recorded_at: TimeStamp::new(),
    };
    ledger.push(entry.clone());

    sync_record(record, ledger, basis);
    Ok(entry)
}

/// Bring the cumulative completed amount to `target`. Completed entries are
/// voided and replaced by one consolidated entry whose note records the delta.
/// Setting the current total again changes nothing.
pub fn reconcile_total(
    record: &mut PayrollRecord,
    ledger: &mut Vec<PayrollPayment>,
    target: Decimal,
    payment: NewPayment,
    basis: PaymentBasis,
) -> Result<Reconciliation> {
    if target < Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "amount paid {target} cannot be negative"
        )));
    }
    ensure_payable(record)?;
    ensure_within_basis(record, target, basis)?;

    let previous_total = total_paid(ledger);
    let delta = target - previous_total;
    if delta.is_zero() {
        return Ok(Reconciliation {
            previous_total,
            target_total: target,
            delta,
            voided: 0,
            entry: None,
        });
    }

    let mut voided = 0;
    for entry in ledger
        .iter_mut()
        .filter(|p| p.status == PaymentStatus::Completed)
    {
        entry.status = PaymentStatus::Void;
        voided += 1;
    }

    let entry = (target > Decimal::ZERO).then(|| {
        let note = format!(
            "amount paid set to {target} (was {previous_total}, delta {delta}) by {}",
            payment.recorded_by
        );
        PayrollPayment {
            id: payment.id,
            payroll_id: record.id.clone(),
            amount: target,
            payment_date: payment.payment_date,
            status: PaymentStatus::Completed,
            notes: Some(match payment.notes {
                Some(extra) => format!("{note}; {extra}"),
                None => note,
            }),
            recorded_by: payment.recorded_by,
            recorded_at: TimeStamp::new(),
        }
    });
    if let Some(entry) = &entry {
        ledger.push(entry.clone());
    }

    sync_record(record, ledger, basis);
    Ok(Reconciliation {
        previous_total,
        target_total: target,
        delta,
        voided,
        entry,
    })
}

/// Recompute `total_paid` and the remaining balance from the ledger.
pub fn sync_record(record: &mut PayrollRecord, ledger: &[PayrollPayment], basis: PaymentBasis) {
    record.total_paid = total_paid(ledger);
    record.updated_at = TimeStamp::new();
    record.refresh_balance(basis);
}
