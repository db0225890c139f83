//! Shared value types and CBOR codecs
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;

/// Decimal places kept for money amounts.
pub const MONEY_SCALE: u32 = 2;
/// Decimal places kept for hour quantities.
pub const HOURS_SCALE: u32 = 4;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Copy for TimeStamp<Utc> {}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
    /// Nanoseconds since the epoch, zero padded so keys sort chronologically.
    pub fn sort_key(&self) -> String {
        format!("{:020}", self.0.timestamp_nanos_opt().unwrap_or_default())
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Round a money amount to cents, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_hours(hours: Decimal) -> Decimal {
    hours.round_dp_with_strategy(HOURS_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// CBOR codec for [`Decimal`] fields, stored as the 16 byte serialized form.
pub mod decimal_cbor {
    use minicbor::decode::Error as DecodeError;
    use minicbor::encode::{Error as EncodeError, Write};
    use minicbor::{Decoder, Encoder};
    use rust_decimal::Decimal;

    pub fn encode<Ctx, W: Write>(
        value: &Decimal,
        e: &mut Encoder<W>,
        _: &mut Ctx,
    ) -> Result<(), EncodeError<W::Error>> {
        e.bytes(&value.serialize())?.ok()
    }

    pub fn decode<'b, Ctx>(d: &mut Decoder<'b>, _: &mut Ctx) -> Result<Decimal, DecodeError> {
        let bytes: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| DecodeError::message("decimal must be 16 bytes"))?;

        Ok(Decimal::deserialize(bytes))
    }
}

/// CBOR codec for [`chrono::NaiveDate`], stored as days since the common era.
pub mod date_cbor {
    use chrono::{Datelike, NaiveDate};
    use minicbor::decode::Error as DecodeError;
    use minicbor::encode::{Error as EncodeError, Write};
    use minicbor::{Decoder, Encoder};

    pub fn encode<Ctx, W: Write>(
        value: &NaiveDate,
        e: &mut Encoder<W>,
        _: &mut Ctx,
    ) -> Result<(), EncodeError<W::Error>> {
        e.i32(value.num_days_from_ce())?.ok()
    }

    pub fn decode<'b, Ctx>(d: &mut Decoder<'b>, _: &mut Ctx) -> Result<NaiveDate, DecodeError> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .ok_or(DecodeError::message("day count out of range for a date"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[derive(Debug, PartialEq, minicbor::Encode, minicbor::Decode)]
    struct Sample {
        #[n(0)]
        #[cbor(with = "decimal_cbor")]
        amount: Decimal,
        #[n(1)]
        #[cbor(with = "date_cbor")]
        date: NaiveDate,
        #[n(2)]
        at: TimeStamp<Utc>,
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn decimal_and_date_fields_survive_cbor() {
        let original = Sample {
            amount: dec!(1234.56),
            date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            at: TimeStamp::new_with(2024, 2, 29, 7, 30, 0).unwrap(),
        };

        let encoding = minicbor::to_vec(&original).unwrap();
        let decoded: Sample = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
    }

    #[test]
    fn timestamps_order_chronologically() {
        let early = TimeStamp::new_with(2024, 5, 6, 8, 0, 0).unwrap();
        let late = TimeStamp::new_with(2024, 5, 6, 17, 0, 0).unwrap();

        let mut stamps = vec![late, early];
        stamps.sort();
        assert_eq!(stamps, vec![early, late]);
        assert!(early < late);
    }

    #[test]
    fn invalid_calendar_date_is_none() {
        assert!(TimeStamp::new_with(2023, 2, 30, 0, 0, 0).is_none());
    }
}
