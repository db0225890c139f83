//! Deduction calculator
//!
//! Pure computation of the NIB (social insurance) deduction and any other
//! company deductions for a gross amount. Identical inputs always give
//! identical outputs, which keeps payroll regeneration auditable.
use crate::error::{PayrollError, Result};
use crate::types::round_money;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeductionKind {
    Flat(Decimal),
    Percentage(Decimal), // fraction of gross, 0.05 == 5%
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtherDeduction {
    pub name: String,
    pub kind: DeductionKind,
}

/// Company level deduction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionRates {
    pub nib_rate: Decimal,
    /// Earnings above this amount are not insurable. `None` means uncapped.
    pub nib_insurable_cap: Option<Decimal>,
    pub other: Vec<OtherDeduction>,
}

impl Default for DeductionRates {
    fn default() -> Self {
        Self {
            nib_rate: dec!(0.039),
            nib_insurable_cap: None,
            other: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerExemptions {
    pub nib_exempt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deductions {
    pub nib_deduction: Decimal,
    pub other_deductions: Decimal,
    pub total_deductions: Decimal,
}

impl DeductionRates {
    pub fn validate(&self) -> Result<()> {
        if !is_fraction(self.nib_rate) {
            return Err(PayrollError::Validation(format!(
                "NIB rate {} must be between 0 and 1",
                self.nib_rate
            )));
        }
        if let Some(cap) = self.nib_insurable_cap {
            if cap < Decimal::ZERO {
                return Err(PayrollError::Validation(format!(
                    "NIB insurable cap {cap} is negative"
                )));
            }
        }
        for deduction in &self.other {
            match deduction.kind {
                DeductionKind::Flat(amount) if amount < Decimal::ZERO => {
                    return Err(PayrollError::Validation(format!(
                        "deduction '{}' has a negative amount",
                        deduction.name
                    )));
                }
                DeductionKind::Percentage(rate) if !is_fraction(rate) => {
                    return Err(PayrollError::Validation(format!(
                        "deduction '{}' rate {rate} must be between 0 and 1",
                        deduction.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn is_fraction(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

/// Compute deductions for `gross`. Other deductions are clamped so the total
/// never exceeds gross pay.
pub fn calculate(
    gross: Decimal,
    exemptions: WorkerExemptions,
    rates: &DeductionRates,
) -> Result<Deductions> {
    if gross < Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "gross pay {gross} is negative"
        )));
    }
    rates.validate()?;

    let nib_deduction = if exemptions.nib_exempt {
        Decimal::ZERO
    } else {
        let insurable = match rates.nib_insurable_cap {
            Some(cap) => gross.min(cap),
            None => gross,
        };
        round_money(insurable * rates.nib_rate)
    };

    let requested: Decimal = rates
        .other
        .iter()
        .map(|deduction| match deduction.kind {
            DeductionKind::Flat(amount) => amount,
            DeductionKind::Percentage(rate) => gross * rate,
        })
        .sum();
    let other_deductions = round_money(requested).min(gross - nib_deduction);

    Ok(Deductions {
        nib_deduction,
        other_deductions,
        total_deductions: nib_deduction + other_deductions,
    })
}
