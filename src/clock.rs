//! Clock events captured by QR scans on site
use crate::types::TimeStamp;
use chrono::{NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ClockEventType {
    #[n(0)]
    ClockIn,
    #[n(1)]
    ClockOut,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ClockEvent {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7, prefix `clock_`
    #[n(1)]
    pub worker_id: String,
    #[n(2)]
    pub project_id: String,
    #[n(3)]
    pub event_type: ClockEventType,
    #[n(4)]
    pub event_time: TimeStamp<Utc>,
    #[n(5)]
    pub qr_code_id: String,
    #[n(6)]
    pub deleted: bool, // soft delete marker, owned by the event source
}

impl ClockEvent {
    pub fn new(
        id: String,
        worker_id: String,
        project_id: String,
        event_type: ClockEventType,
        event_time: TimeStamp<Utc>,
        qr_code_id: String,
    ) -> Self {
        Self {
            id,
            worker_id,
            project_id,
            event_type,
            event_time,
            qr_code_id,
            deleted: false,
        }
    }

    pub fn work_date(&self) -> NaiveDate {
        self.event_time.date()
    }

    /// Store key: worker/date/project/time/id, so a prefix scan yields one day in order.
    pub fn store_key(&self) -> String {
        format!(
            "{}{}/{}",
            day_prefix(&self.worker_id, self.work_date(), &self.project_id),
            self.event_time.sort_key(),
            self.id
        )
    }
}

pub(crate) fn day_prefix(worker_id: &str, date: NaiveDate, project_id: &str) -> String {
    format!("{worker_id}/{}/{project_id}/", date.format("%Y-%m-%d"))
}
