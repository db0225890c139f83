//! Timesheet rounding engine
//!
//! Turns the clock events of one worker on one day into worked hours, applies
//! the company rounding policy, splits regular from overtime hours and prices
//! the result.
use crate::clock::{ClockEvent, ClockEventType};
use crate::error::{PayrollError, Result};
use crate::types::{round_hours, round_money};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::str::FromStr;

pub const STANDARD_DAY_HOURS: Decimal = dec!(8);
pub const OVERTIME_MULTIPLIER: Decimal = dec!(1.5);
const STANDARD_DAY_TOLERANCE: Decimal = dec!(0.15);
const SNAP_DOWN_CEILING: Decimal = dec!(8.5);
const SHORT_SHIFT_HOURS: Decimal = dec!(0.5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingPolicy {
    NoRounding,
    QuarterHour,
    ExactMinute,
    #[default]
    Standard,
}

impl FromStr for RoundingPolicy {
    type Err = PayrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_rounding" | "none" => Ok(RoundingPolicy::NoRounding),
            "quarter_hour" => Ok(RoundingPolicy::QuarterHour),
            "exact_minute" => Ok(RoundingPolicy::ExactMinute),
            "standard" => Ok(RoundingPolicy::Standard),
            other => Err(PayrollError::Validation(format!(
                "unknown rounding policy '{other}'"
            ))),
        }
    }
}

/// Rounding configuration taken from company settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundingRules {
    pub policy: RoundingPolicy,
    pub round_to_standard_day: bool,
}

impl Default for RoundingRules {
    fn default() -> Self {
        Self {
            policy: RoundingPolicy::Standard,
            round_to_standard_day: true,
        }
    }
}

/// Result of pairing clock-in/clock-out events for a day.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkedSpans {
    pub first_in: Option<DateTime<Utc>>,
    pub last_out: Option<DateTime<Utc>>,
    pub worked_seconds: i64,
    pub completed_pairs: usize,
    pub open_since: Option<DateTime<Utc>>, // trailing clock-in without a clock-out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoursSplit {
    pub regular: Decimal,
    pub overtime: Decimal,
    pub total: Decimal,
}

/// Fully computed day, ready to become a timesheet entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayComputation {
    pub clock_in: Option<DateTime<Utc>>,
    pub clock_out: Option<DateTime<Utc>>,
    pub raw_hours: Decimal,
    pub hours: HoursSplit,
    pub total_pay: Decimal,
    pub is_live: bool, // includes an open span closed at "now"
}

/// Pair consecutive clock-in/clock-out events. Soft deleted events are skipped,
/// a repeated clock-in keeps the earliest scan and an orphan clock-out is ignored.
pub fn pair_events(events: &[ClockEvent]) -> WorkedSpans {
    let mut ordered: Vec<&ClockEvent> = events.iter().filter(|e| !e.deleted).collect();
    ordered.sort_by_key(|e| e.event_time);

    let mut spans = WorkedSpans::default();
    let mut open: Option<DateTime<Utc>> = None;

    for event in ordered {
        let at = event.event_time.to_datetime_utc();
        match (event.event_type, open) {
            (ClockEventType::ClockIn, None) => {
                open = Some(at);
                if spans.first_in.is_none() {
                    spans.first_in = Some(at);
                }
            }
            // duplicate scan
            (ClockEventType::ClockIn, Some(_)) => {}
            (ClockEventType::ClockOut, Some(started)) => {
                spans.worked_seconds += (at - started).num_seconds();
                spans.completed_pairs += 1;
                spans.last_out = Some(at);
                open = None;
            }
            (ClockEventType::ClockOut, None) => {}
        }
    }

    spans.open_since = open;
    spans
}

pub fn raw_hours(seconds: i64) -> Decimal {
    Decimal::from(seconds) / dec!(3600)
}

fn round_to_fraction(hours: Decimal, parts_per_hour: Decimal) -> Decimal {
    (hours * parts_per_hour).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        / parts_per_hour
}

/// Apply a rounding policy to raw hours.
pub fn apply_rounding(raw: Decimal, rules: RoundingRules) -> Decimal {
    let adjusted = match rules.policy {
        RoundingPolicy::NoRounding => raw,
        RoundingPolicy::QuarterHour => round_to_fraction(raw, dec!(4)),
        RoundingPolicy::ExactMinute => round_to_fraction(raw, dec!(60)),
        RoundingPolicy::Standard => standard_rounding(raw, rules.round_to_standard_day),
    };

    round_hours(adjusted)
}

fn standard_rounding(raw: Decimal, round_to_standard_day: bool) -> Decimal {
    // short shifts are never snapped to a full day
    if raw < SHORT_SHIFT_HOURS {
        return round_to_fraction(raw, dec!(60));
    }

    let quarter = round_to_fraction(raw, dec!(4));
    if round_to_standard_day {
        let near_day = (quarter - STANDARD_DAY_HOURS).abs() <= STANDARD_DAY_TOLERANCE;
        let just_over = quarter > STANDARD_DAY_HOURS && quarter < SNAP_DOWN_CEILING;
        if near_day || just_over {
            return STANDARD_DAY_HOURS;
        }
    }

    quarter
}

pub fn split_hours(adjusted: Decimal) -> HoursSplit {
    let adjusted = adjusted.max(Decimal::ZERO);
    let regular = adjusted.min(STANDARD_DAY_HOURS);
    let overtime = (adjusted - STANDARD_DAY_HOURS).max(Decimal::ZERO);

    HoursSplit {
        regular,
        overtime,
        total: regular + overtime,
    }
}

pub fn compute_pay(hours: &HoursSplit, hourly_rate: Decimal) -> Decimal {
    round_money(hours.regular * hourly_rate + hours.overtime * hourly_rate * OVERTIME_MULTIPLIER)
}

/// Compute a finalised day. An open trailing clock-in is never counted here.
pub fn compute_day(
    worker_id: &str,
    date: NaiveDate,
    events: &[ClockEvent],
    hourly_rate: Decimal,
    rules: RoundingRules,
) -> Result<DayComputation> {
    let spans = pair_events(events);
    if spans.completed_pairs == 0 {
        return Err(no_valid_pairs(worker_id, date));
    }

    Ok(price_day(&spans, spans.worked_seconds, hourly_rate, rules, false))
}

/// Compute hours so far today, closing an open span at `now`. For live status only.
pub fn compute_live(
    worker_id: &str,
    date: NaiveDate,
    events: &[ClockEvent],
    hourly_rate: Decimal,
    rules: RoundingRules,
    now: DateTime<Utc>,
) -> Result<DayComputation> {
    let spans = pair_events(events);

    let open_seconds = spans
        .open_since
        .map(|since| (now - since).num_seconds().max(0))
        .unwrap_or_default();

    if spans.completed_pairs == 0 && spans.open_since.is_none() {
        return Err(no_valid_pairs(worker_id, date));
    }

    let mut day = price_day(
        &spans,
        spans.worked_seconds + open_seconds,
        hourly_rate,
        rules,
        spans.open_since.is_some(),
    );
    if day.is_live {
        day.clock_out = Some(now);
    }
    Ok(day)
}

fn price_day(
    spans: &WorkedSpans,
    seconds: i64,
    hourly_rate: Decimal,
    rules: RoundingRules,
    is_live: bool,
) -> DayComputation {
    let raw = raw_hours(seconds);
    let hours = split_hours(apply_rounding(raw, rules));

    DayComputation {
        clock_in: spans.first_in,
        clock_out: spans.last_out,
        raw_hours: round_hours(raw),
        total_pay: compute_pay(&hours, hourly_rate),
        hours,
        is_live,
    }
}

fn no_valid_pairs(worker_id: &str, date: NaiveDate) -> PayrollError {
    PayrollError::NoValidPairs {
        worker_id: worker_id.to_string(),
        date: date.to_string(),
    }
}
