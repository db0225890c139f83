//! Company payroll settings
//!
//! Settings are an explicit value handed to the service and to every pure
//! calculation; nothing in the pipeline reads ambient configuration.
use crate::deduction::DeductionRates;
use crate::ledger::PaymentBasis;
use crate::rounding::{RoundingPolicy, RoundingRules};
use anyhow::Context;
use chrono::Weekday;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollSettings {
    pub rounding: RoundingRules,
    /// First day of the weekly pay period.
    pub period_start: Weekday,
    pub deductions: DeductionRates,
    pub payment_basis: PaymentBasis,
    /// Refuse to mark a payroll paid while a balance is outstanding.
    pub require_full_settlement: bool,
}

impl Default for PayrollSettings {
    fn default() -> Self {
        Self {
            rounding: RoundingRules::default(),
            period_start: Weekday::Sat,
            deductions: DeductionRates::default(),
            payment_basis: PaymentBasis::NetPay,
            require_full_settlement: false,
        }
    }
}

impl PayrollSettings {
    /// Defaults overridden by `PAYROLL_*` variables, reading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings = Self::default();

        if let Some(policy) = var("PAYROLL_ROUNDING_POLICY") {
            settings.rounding.policy = RoundingPolicy::from_str(&policy)?;
        }
        if let Some(flag) = var("PAYROLL_ROUND_TO_STANDARD_DAY") {
            settings.rounding.round_to_standard_day = flag
                .parse()
                .with_context(|| format!("PAYROLL_ROUND_TO_STANDARD_DAY='{flag}'"))?;
        }
        if let Some(day) = var("PAYROLL_PERIOD_START") {
            settings.period_start = Weekday::from_str(&day)
                .map_err(|_| anyhow::anyhow!("PAYROLL_PERIOD_START='{day}' is not a weekday"))?;
        }
        if let Some(rate) = var("PAYROLL_NIB_RATE") {
            settings.deductions.nib_rate = Decimal::from_str(&rate)
                .with_context(|| format!("PAYROLL_NIB_RATE='{rate}'"))?;
        }
        if let Some(cap) = var("PAYROLL_NIB_CAP") {
            settings.deductions.nib_insurable_cap = Some(
                Decimal::from_str(&cap).with_context(|| format!("PAYROLL_NIB_CAP='{cap}'"))?,
            );
        }
        if let Some(basis) = var("PAYROLL_PAYMENT_BASIS") {
            settings.payment_basis = PaymentBasis::from_str(&basis)?;
        }
        if let Some(flag) = var("PAYROLL_REQUIRE_FULL_SETTLEMENT") {
            settings.require_full_settlement = flag
                .parse()
                .with_context(|| format!("PAYROLL_REQUIRE_FULL_SETTLEMENT='{flag}'"))?;
        }

        settings.deductions.validate()?;
        Ok(settings)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
