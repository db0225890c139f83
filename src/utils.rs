//! Identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

/// Human readable prefixes for the ids minted by the pipeline.
pub const PAYROLL_HRP: &str = "payroll_";
pub const PAYMENT_HRP: &str = "payment_";
pub const CLOCK_EVENT_HRP: &str = "clock_";

// construct a unique id then encode using bech32m
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Same as [`new_uuid_to_bech32`] but reports failures in the pipeline's error type.
pub(crate) fn new_id(hrp: &str) -> crate::error::Result<String> {
    new_uuid_to_bech32(hrp)
        .map_err(|e| crate::error::PayrollError::Codec(format!("id with prefix {hrp}: {e}")))
}
