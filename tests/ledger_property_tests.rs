//! Property-based tests for the payment ledger
//!
//! Whatever sequence of payments and reconciliations a clerk attempts, the
//! ledger must never pay past the basis amount nor report a negative balance.

use chrono::{NaiveDate, Weekday};
use payroll_pipeline::{
    deduction::Deductions,
    ledger::{self, NewPayment, PaymentBasis, PaymentStatus},
    payroll::{PayPeriod, PayrollKey, PayrollRecord, PayrollStatus, PayrollTotals},
};
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
enum LedgerOp {
    Add(Decimal),
    SetTotal(Decimal),
}

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=150_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        3 => amount_strategy().prop_map(LedgerOp::Add),
        1 => amount_strategy().prop_map(LedgerOp::SetTotal),
    ]
}

fn basis_strategy() -> impl Strategy<Value = PaymentBasis> {
    prop_oneof![Just(PaymentBasis::NetPay), Just(PaymentBasis::GrossPay)]
}

fn confirmed_record(gross: Decimal, deducted: Decimal, basis: PaymentBasis) -> PayrollRecord {
    let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
    let key = PayrollKey::new("worker_1", PayPeriod::containing(date, Weekday::Sat), None);
    let totals = PayrollTotals {
        total_hours: Decimal::from(40),
        regular_hours: Decimal::from(40),
        overtime_hours: Decimal::ZERO,
        gross_pay: gross,
        deductions: Deductions {
            nib_deduction: deducted,
            other_deductions: Decimal::ZERO,
            total_deductions: deducted,
        },
        net_pay: gross - deducted,
        timesheet_count: 5,
    };

    let mut record = PayrollRecord::new("payroll_prop".into(), &key, &totals, basis);
    record.status = PayrollStatus::Confirmed;
    record
}

fn new_payment(n: usize, amount: Decimal) -> NewPayment {
    NewPayment {
        id: format!("payment_{n}"),
        amount,
        payment_date: NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(),
        notes: None,
        recorded_by: "clerk".into(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// No sequence of operations pays past the basis or drives the balance negative.
    #[test]
    fn prop_balance_never_negative(
        gross_cents in 1i64..=1_000_000,
        deduction_share in 0i64..=30,
        basis in basis_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..25),
    ) {
        let gross = Decimal::new(gross_cents, 2);
        let deducted = (gross * Decimal::new(deduction_share, 2)).round_dp(2);
        let mut record = confirmed_record(gross, deducted, basis);
        let mut entries = vec![];

        for (n, op) in ops.into_iter().enumerate() {
            let before = ledger::total_paid(&entries);
            let outcome = match op {
                LedgerOp::Add(amount) => {
                    ledger::add_payment(&mut record, &mut entries, new_payment(n, amount), basis).map(|_| ())
                }
                LedgerOp::SetTotal(target) => {
                    ledger::reconcile_total(&mut record, &mut entries, target, new_payment(n, target), basis)
                        .map(|_| ())
                }
            };
            if outcome.is_err() {
                prop_assert_eq!(ledger::total_paid(&entries), before);
            }

            let paid = ledger::total_paid(&entries);
            prop_assert!(paid <= record.basis_amount(basis));
            prop_assert!(record.remaining_balance >= Decimal::ZERO);
            prop_assert_eq!(record.total_paid, paid);
            prop_assert_eq!(record.remaining_balance, record.basis_amount(basis) - paid);
        }
    }

    /// Changing the amount paid leaves at most one completed entry; repeating it is a no-op.
    #[test]
    fn prop_set_total_consolidates(
        payments in prop::collection::vec(1i64..=10_000, 0..8),
        target_cents in 0i64..=100_000,
    ) {
        let basis = PaymentBasis::NetPay;
        let mut record = confirmed_record(Decimal::from(100_000), Decimal::ZERO, basis);
        let mut entries = vec![];
        for (n, cents) in payments.iter().enumerate() {
            ledger::add_payment(&mut record, &mut entries, new_payment(n, Decimal::new(*cents, 2)), basis)
                .unwrap();
        }
        let target = Decimal::new(target_cents, 2);

        let result =
            ledger::reconcile_total(&mut record, &mut entries, target, new_payment(100, target), basis).unwrap();
        if !result.is_noop() {
            let completed = entries.iter().filter(|p| p.status == PaymentStatus::Completed).count();
            prop_assert!(completed <= 1);
        }
        prop_assert_eq!(ledger::total_paid(&entries), target);

        let len = entries.len();
        let again =
            ledger::reconcile_total(&mut record, &mut entries, target, new_payment(101, target), basis).unwrap();
        prop_assert!(again.is_noop());
        prop_assert_eq!(entries.len(), len);
    }
}
