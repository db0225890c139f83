//! Audit witnesses for payroll records
//!
//! Every mutation of a payroll record leaves a witness: who did what, when.
//! Witnesses are CBOR encoded and addressed by the SHA-256 digest of that
//! encoding, so a stored trail can be checked for tampering.
use crate::error::{PayrollError, Result};
use crate::payroll::PayrollStatus;
use crate::types::{TimeStamp, decimal_cbor};
use chrono::Utc;
use rust_decimal::Decimal;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct PayrollWitness {
    #[n(0)]
    pub payroll_id: String,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub kind: WitnessKind,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum WitnessKind {
    #[n(0)]
    Generated,
    #[n(1)]
    Regenerated {
        #[n(0)]
        #[cbor(with = "decimal_cbor")]
        previous_net: Decimal,
        #[n(1)]
        #[cbor(with = "decimal_cbor")]
        net: Decimal,
    },
    #[n(2)]
    StatusChanged {
        #[n(0)]
        from: PayrollStatus,
        #[n(1)]
        to: PayrollStatus,
    },
    #[n(3)]
    PaymentAdded {
        #[n(0)]
        payment_id: String,
        #[n(1)]
        #[cbor(with = "decimal_cbor")]
        amount: Decimal,
    },
    #[n(4)]
    PaymentReconciled {
        #[n(0)]
        #[cbor(with = "decimal_cbor")]
        from: Decimal,
        #[n(1)]
        #[cbor(with = "decimal_cbor")]
        to: Decimal,
    },
    #[n(5)]
    Deleted,
}

impl PayrollWitness {
    pub fn new(payroll_id: impl Into<String>, actor: impl Into<String>, kind: WitnessKind) -> Self {
        Self {
            payroll_id: payroll_id.into(),
            actor: actor.into(),
            timestamp: TimeStamp::new(),
            kind,
        }
    }

    /// Encode the witness and return its digest with the encoding.
    pub fn build(&self) -> Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)
            .map_err(|e| PayrollError::Codec(format!("witness for {}: {e}", self.payroll_id)))?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    /// Store key: payroll id, time, digest. A prefix scan on the id yields the
    /// trail in order.
    pub fn store_key(&self, hash: &str) -> String {
        format!("{}/{}/{hash}", self.payroll_id, self.timestamp.sort_key())
    }
}

/// Check that a stored witness still matches the digest in its key.
pub fn verify(key: &str, cbor: &[u8]) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|hash| sha256::digest(cbor) == hash)
}
