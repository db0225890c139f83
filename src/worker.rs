use crate::deduction::WorkerExemptions;
use crate::error::{PayrollError, Result};
use crate::types::decimal_cbor;
use rust_decimal::Decimal;

/// Per-worker pay settings read by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WorkerProfile {
    #[n(0)]
    pub worker_id: String,
    #[n(1)]
    #[cbor(with = "decimal_cbor")]
    pub hourly_rate: Decimal,
    #[n(2)]
    pub nib_exempt: bool,
    #[n(3)]
    pub active: bool,
}

impl WorkerProfile {
    pub fn new(worker_id: impl Into<String>, hourly_rate: Decimal) -> Self {
        Self {
            worker_id: worker_id.into(),
            hourly_rate,
            nib_exempt: false,
            active: true,
        }
    }

    pub fn exempt_from_nib(mut self) -> Self {
        self.nib_exempt = true;
        self
    }

    pub fn deactivate(mut self) -> Self {
        self.active = false;
        self
    }

    /// Inactive workers cannot clock in or receive new timesheets. Hours they
    /// already had approved are still paid.
    pub fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(PayrollError::Validation(format!("worker {} is inactive", self.worker_id)))
        }
    }

    pub fn exemptions(&self) -> WorkerExemptions {
        WorkerExemptions {
            nib_exempt: self.nib_exempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rust_decimal_macros::dec;

    #[test]
    fn deactivated_worker_is_refused() {
        let profile = WorkerProfile::new("worker_1", dec!(125));
        assert!(profile.ensure_active().is_ok());

        let err = profile.deactivate().ensure_active().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
