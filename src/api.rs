//! Caller-facing facade
//!
//! Wraps [`PayrollService`] results in a uniform response envelope so a
//! transport layer can serialize them without matching on error variants.
use crate::error::{ErrorKind, PayrollError, Result};
use crate::ledger::{PayrollPayment, Reconciliation};
use crate::payroll::{PayPeriod, PayrollRecord, PayrollStatus};
use crate::service::{BatchReport, PayrollService, PendingTimesheetCheck, StatusUpdateOptions};
use crate::timesheet::Actor;
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PayrollError> for ApiError {
    fn from(err: &PayrollError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(err: &PayrollError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.into()),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::fail(&err),
        }
    }
}

impl<T> ApiResponse<BatchReport<T>> {
    /// A batch succeeds only when every member did. The report is returned
    /// either way; the error summarises the first failure.
    fn from_batch(result: Result<BatchReport<T>>) -> Self {
        match result {
            Ok(report) => {
                let error = report.failed.first().map(|(id, err)| ApiError {
                    kind: err.kind(),
                    message: format!(
                        "{} of {} failed; {id}: {err}",
                        report.failed.len(),
                        report.failed.len() + report.succeeded.len()
                    ),
                });
                Self {
                    success: error.is_none(),
                    data: Some(report),
                    error,
                }
            }
            Err(err) => Self::fail(&err),
        }
    }
}

pub struct PayrollApi<'a> {
    service: &'a PayrollService,
}

impl<'a> PayrollApi<'a> {
    pub fn new(service: &'a PayrollService) -> Self {
        Self { service }
    }

    pub fn generate_payroll_for_worker_and_period(
        &self,
        worker_id: &str,
        period: PayPeriod,
        regenerate: bool,
        actor: &Actor,
    ) -> ApiResponse<PayrollRecord> {
        self.service
            .generate_payroll_for_worker_and_period(worker_id, period, None, regenerate, actor)
            .into()
    }

    pub fn update_payroll_status(
        &self,
        ids: &[String],
        new_status: PayrollStatus,
        options: &StatusUpdateOptions,
    ) -> ApiResponse<BatchReport<PayrollRecord>> {
        ApiResponse::from_batch(self.service.update_payroll_status(ids, new_status, options))
    }

    pub fn add_payroll_payment(
        &self,
        payroll_id: &str,
        amount: Decimal,
        payment_date: NaiveDate,
        notes: Option<String>,
        actor: &Actor,
    ) -> ApiResponse<PayrollPayment> {
        self.service
            .add_payroll_payment(payroll_id, amount, payment_date, notes, actor)
            .into()
    }

    pub fn set_payroll_payment_amount(
        &self,
        payroll_id: &str,
        total_amount: Decimal,
        actor: &Actor,
    ) -> ApiResponse<Reconciliation> {
        self.service
            .set_payroll_payment_amount(payroll_id, total_amount, actor)
            .into()
    }

    pub fn check_pending_timesheets_for_payrolls(
        &self,
        ids: &[String],
    ) -> ApiResponse<Vec<PendingTimesheetCheck>> {
        self.service.check_pending_timesheets_for_payrolls(ids).into()
    }

    pub fn remaining_balance(&self, payroll_id: &str) -> ApiResponse<Decimal> {
        self.service.remaining_balance(payroll_id).into()
    }
}
