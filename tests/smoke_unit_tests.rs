//! Smoke screen unit tests for the payroll pipeline components
//!
//! These tests span the codebase and exercise each component in isolation
//! from the integration scenarios. They generally cover the happy path.

use chrono::{NaiveDate, Utc, Weekday};
use payroll_pipeline::{
    api::{ApiResponse, PayrollApi},
    clock::{ClockEvent, ClockEventType},
    config::PayrollSettings,
    deduction::{self, DeductionKind, DeductionRates, OtherDeduction, WorkerExemptions},
    error::{ErrorKind, PayrollError},
    payroll::{PayPeriod, PayrollStatus},
    rounding::{self, RoundingPolicy, RoundingRules},
    service::PayrollService,
    timesheet::{Actor, ApprovalStatus, TimesheetKey},
    types::TimeStamp,
    utils::new_uuid_to_bech32,
    worker::WorkerProfile,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::tempdir;

fn event(kind: ClockEventType, hour: u32, min: u32) -> ClockEvent {
    ClockEvent::new(
        new_uuid_to_bech32("clock_").unwrap(),
        "worker_1".into(),
        "project_1".into(),
        kind,
        TimeStamp::new_with(2024, 5, 6, hour, min, 0).unwrap(),
        "qr_1".into(),
    )
}

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    #[test]
    fn generates_prefixed_unique_ids() {
        let first = new_uuid_to_bech32("payment_").unwrap();
        let second = new_uuid_to_bech32("payment_").unwrap();

        assert!(first.starts_with("payment_1"));
        assert_ne!(first, second);
    }
}

// ROUNDING MODULE TESTS
#[cfg(test)]
mod rounding_tests {
    use super::*;

    #[test]
    fn standard_day_scenarios() {
        let rules = RoundingRules::default();

        assert_eq!(rounding::apply_rounding(dec!(9.1), rules), dec!(9));
        assert_eq!(rounding::apply_rounding(dec!(8.2), rules), dec!(8));
        assert_eq!(rounding::apply_rounding(dec!(7.9), rules), dec!(8));
        assert_eq!(rounding::apply_rounding(dec!(6.1), rules), dec!(6));
    }

    #[test]
    fn quarter_hour_policy_ignores_standard_day() {
        let rules = RoundingRules {
            policy: RoundingPolicy::QuarterHour,
            round_to_standard_day: true,
        };
        assert_eq!(rounding::apply_rounding(dec!(8.2), rules), dec!(8.25));
    }

    #[test]
    fn pairs_split_shift_and_skips_deleted_scan() {
        let mut stray = event(ClockEventType::ClockOut, 10, 0);
        stray.deleted = true;
        let events = vec![
            event(ClockEventType::ClockIn, 8, 0),
            stray,
            event(ClockEventType::ClockOut, 12, 0),
            event(ClockEventType::ClockIn, 13, 0),
            event(ClockEventType::ClockOut, 17, 30),
        ];

        let spans = rounding::pair_events(&events);
        assert_eq!(spans.completed_pairs, 2);
        assert_eq!(spans.worked_seconds, (4 * 60 + 4 * 60 + 30) * 60);
        assert!(spans.open_since.is_none());
    }
}

// DEDUCTION MODULE TESTS
#[cfg(test)]
mod deduction_tests {
    use super::*;

    #[test]
    fn nib_respects_cap_and_exemption() {
        let rates = DeductionRates {
            nib_rate: dec!(0.04),
            nib_insurable_cap: Some(dec!(500)),
            other: vec![],
        };

        let capped = deduction::calculate(dec!(800), WorkerExemptions::default(), &rates).unwrap();
        assert_eq!(capped.nib_deduction, dec!(20));

        let exempt =
            deduction::calculate(dec!(800), WorkerExemptions { nib_exempt: true }, &rates).unwrap();
        assert_eq!(exempt.total_deductions, Decimal::ZERO);
    }

    #[test]
    fn other_deductions_never_exceed_gross() {
        let rates = DeductionRates {
            nib_rate: dec!(0.1),
            nib_insurable_cap: None,
            other: vec![OtherDeduction {
                name: "tool rental".into(),
                kind: DeductionKind::Flat(dec!(500)),
            }],
        };

        let result = deduction::calculate(dec!(100), WorkerExemptions::default(), &rates).unwrap();
        assert_eq!(result.nib_deduction, dec!(10));
        assert_eq!(result.other_deductions, dec!(90));
        assert_eq!(result.total_deductions, dec!(100));
    }

    #[test]
    fn invalid_rate_is_validation_error() {
        let rates = DeductionRates {
            nib_rate: dec!(1.5),
            ..DeductionRates::default()
        };
        let err = deduction::calculate(dec!(100), WorkerExemptions::default(), &rates).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

// PAYROLL MODULE TESTS
#[cfg(test)]
mod payroll_tests {
    use super::*;

    #[test]
    fn weekly_period_contains_its_days() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
        let period = PayPeriod::containing(wednesday, Weekday::Sat);

        assert!(period.contains(wednesday));
        assert!(period.contains(period.start));
        assert!(period.contains(period.end));
        assert!(!period.contains(period.end.succ_opt().unwrap()));
        assert_eq!(period.to_string(), "2024-05-04/2024-05-10");
    }

    #[test]
    fn status_names_are_lowercase() {
        assert_eq!(PayrollStatus::Confirmed.to_string(), "confirmed");
        assert_eq!(ApprovalStatus::Rejected.to_string(), "rejected");
    }
}

// SERVICE AND API TESTS
#[cfg(test)]
mod service_tests {
    use super::*;

    #[test]
    fn soft_deleted_scan_stops_counting() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("smoke.db"))?);
        let service = PayrollService::open(db, PayrollSettings::default())?;
        service.register_worker(&WorkerProfile::new("worker_1", dec!(20)))?;

        let at = |hour| TimeStamp::new_with(2024, 5, 6, hour, 0, 0).unwrap();
        service.record_clock_event("worker_1", "project_1", ClockEventType::ClockIn, at(8), "qr")?;
        let early_out =
            service.record_clock_event("worker_1", "project_1", ClockEventType::ClockOut, at(10), "qr")?;
        service.record_clock_event("worker_1", "project_1", ClockEventType::ClockOut, at(16), "qr")?;

        service.soft_delete_clock_event(&early_out)?;

        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let sheet = service.generate_timesheet(&TimesheetKey::new("worker_1", "project_1", date))?;
        assert_eq!(sheet.total_hours, dec!(8));
        Ok(())
    }

    #[test]
    fn api_wraps_missing_payroll_as_not_found() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("api.db"))?);
        let service = PayrollService::open(db, PayrollSettings::default())?;
        let api = PayrollApi::new(&service);

        let response: ApiResponse<_> = api.add_payroll_payment(
            "payroll_missing",
            dec!(10),
            Utc::now().date_naive(),
            None,
            &Actor::admin("admin_1"),
        );
        assert!(!response.success);
        assert_eq!(response.error.unwrap().kind, ErrorKind::NotFound);

        let response = api.check_pending_timesheets_for_payrolls(&["payroll_missing".into()]);
        assert!(!response.success);
        Ok(())
    }

    #[test]
    fn unknown_worker_is_not_found() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("worker.db"))?);
        let service = PayrollService::open(db, PayrollSettings::default())?;

        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let err = service
            .create_manual_timesheet(&TimesheetKey::new("ghost", "project_1", date), dec!(8), None)
            .unwrap_err();
        assert!(matches!(err, PayrollError::NotFound(_)));
        Ok(())
    }
}
