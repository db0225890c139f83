//! Embedded persistence on sled
//!
//! One tree per collection. Values are CBOR. Payroll mutations run as sled
//! transactions spanning the record, its ledger, the key index and the audit
//! trail, so concurrent triggers on the same record serialize.
use crate::audit::{self, PayrollWitness};
use crate::clock::{self, ClockEvent};
use crate::error::{PayrollError, Result};
use crate::ledger::PayrollPayment;
use crate::payroll::{PayPeriod, PayrollKey, PayrollRecord};
use crate::timesheet::{Timesheet, TimesheetKey};
use crate::worker::WorkerProfile;
use chrono::NaiveDate;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Store {
    instance: Arc<sled::Db>,
    clock_events: sled::Tree,
    timesheets: sled::Tree,
    workers: sled::Tree,
    payroll_keys: sled::Tree, // payroll key -> payroll id
    payrolls: sled::Tree,
    payments: sled::Tree, // payroll id -> full ledger
    audit: sled::Tree,
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T, what: &str) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| PayrollError::Codec(format!("{what}: {e}")))
}

pub(crate) fn decode<T>(bytes: &[u8], what: &str) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| PayrollError::Codec(format!("{what}: {e}")))
}

fn abort_on<T>(result: Result<T>) -> ConflictableTransactionResult<T, PayrollError> {
    result.map_err(ConflictableTransactionError::Abort)
}

/// A record and its ledger as read inside a transaction.
pub(crate) type Loaded = (PayrollRecord, Vec<PayrollPayment>);

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            clock_events: instance.open_tree("clock_events")?,
            timesheets: instance.open_tree("timesheets")?,
            workers: instance.open_tree("workers")?,
            payroll_keys: instance.open_tree("payroll_keys")?,
            payrolls: instance.open_tree("payrolls")?,
            payments: instance.open_tree("payments")?,
            audit: instance.open_tree("audit")?,
            instance,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    // CLOCK EVENTS

    pub fn append_clock_event(&self, event: &ClockEvent) -> Result<()> {
        let key = event.store_key();
        let value = encode(event, "clock event")?;
        let swapped = self
            .clock_events
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;

        swapped.map_err(|_| {
            PayrollError::IntegrityGuard(format!("clock event {} already recorded", event.id))
        })
    }

    /// Events of one worker on one project and day, deleted ones included, in time order.
    pub fn clock_events_for_day(
        &self,
        worker_id: &str,
        project_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ClockEvent>> {
        let prefix = clock::day_prefix(worker_id, date, project_id);
        self.clock_events
            .scan_prefix(prefix.as_bytes())
            .map(|item| {
                let (_, value) = item?;
                decode(&value, "clock event")
            })
            .collect()
    }

    pub fn soft_delete_clock_event(&self, event: &ClockEvent) -> Result<()> {
        let key = event.store_key();
        let Some(current) = self.clock_events.get(key.as_bytes())? else {
            return Err(PayrollError::NotFound(format!("clock event {}", event.id)));
        };

        let mut stored: ClockEvent = decode(&current, "clock event")?;
        stored.deleted = true;
        self.clock_events
            .insert(key.as_bytes(), encode(&stored, "clock event")?)?;
        Ok(())
    }

    // WORKERS

    pub fn upsert_worker(&self, profile: &WorkerProfile) -> Result<()> {
        self.workers.insert(
            profile.worker_id.as_bytes(),
            encode(profile, "worker profile")?,
        )?;
        Ok(())
    }

    pub fn worker(&self, worker_id: &str) -> Result<WorkerProfile> {
        match self.workers.get(worker_id.as_bytes())? {
            Some(bytes) => decode(&bytes, "worker profile"),
            None => Err(PayrollError::NotFound(format!("worker {worker_id}"))),
        }
    }

    // TIMESHEETS

    pub fn timesheet(&self, key: &TimesheetKey) -> Result<Option<Timesheet>> {
        self.timesheets
            .get(key.to_string().as_bytes())?
            .map(|bytes| decode(&bytes, "timesheet"))
            .transpose()
    }

    /// Insert a timesheet that must not exist yet.
    pub fn insert_new_timesheet(&self, sheet: &Timesheet) -> Result<()> {
        let key = sheet.key();
        let swapped = self.timesheets.compare_and_swap(
            key.to_string().as_bytes(),
            None as Option<&[u8]>,
            Some(encode(sheet, "timesheet")?),
        )?;

        swapped.map_err(|_| PayrollError::TimesheetAlreadyExists(key.to_string()))
    }

    /// Read-modify-write one timesheet atomically.
    pub fn update_timesheet<T, F>(&self, key: &TimesheetKey, op: F) -> Result<(Timesheet, T)>
    where
        F: Fn(&mut Timesheet) -> Result<T>,
    {
        let id = key.to_string();
        let result = self.timesheets.transaction(|tx| {
            let Some(bytes) = tx.get(id.as_bytes())? else {
                return abort_on(Err(PayrollError::NotFound(format!("timesheet {id}"))));
            };
            let mut sheet: Timesheet = abort_on(decode(&bytes, "timesheet"))?;
            let out = abort_on(op(&mut sheet))?;
            tx.insert(id.as_bytes(), abort_on(encode(&sheet, "timesheet"))?)?;
            Ok((sheet, out))
        })?;

        Ok(result)
    }

    /// All timesheets of a worker dated inside `period`.
    pub fn timesheets_for_worker(&self, worker_id: &str, period: &PayPeriod) -> Result<Vec<Timesheet>> {
        let prefix = format!("{worker_id}/");
        let mut sheets = vec![];
        for item in self.timesheets.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let sheet: Timesheet = decode(&value, "timesheet")?;
            if period.contains(sheet.date) {
                sheets.push(sheet);
            }
        }
        Ok(sheets)
    }

    // PAYROLLS

    pub fn payroll(&self, payroll_id: &str) -> Result<PayrollRecord> {
        match self.payrolls.get(payroll_id.as_bytes())? {
            Some(bytes) => decode(&bytes, "payroll"),
            None => Err(PayrollError::NotFound(format!("payroll {payroll_id}"))),
        }
    }

    pub fn payroll_by_key(&self, key: &PayrollKey) -> Result<Option<PayrollRecord>> {
        match self.payroll_keys.get(key.to_string().as_bytes())? {
            Some(id) => {
                let id = String::from_utf8_lossy(&id).into_owned();
                self.payroll(&id).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Batch read. Ids without a record are absent from the map.
    pub fn payrolls(&self, ids: &[String]) -> Result<HashMap<String, PayrollRecord>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.payrolls.get(id.as_bytes())? {
                found.insert(id.clone(), decode(&bytes, "payroll")?);
            }
        }
        Ok(found)
    }

    pub fn ledger(&self, payroll_id: &str) -> Result<Vec<PayrollPayment>> {
        self.payments
            .get(payroll_id.as_bytes())?
            .map(|bytes| decode(&bytes, "ledger"))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    /// Ledgers for a set of payrolls in one pass.
    pub fn payments_for(&self, ids: &[String]) -> Result<HashMap<String, Vec<PayrollPayment>>> {
        let mut ledgers = HashMap::with_capacity(ids.len());
        for id in ids {
            ledgers.insert(id.clone(), self.ledger(id)?);
        }
        Ok(ledgers)
    }

    pub fn audit_trail(&self, payroll_id: &str) -> Result<Vec<PayrollWitness>> {
        let prefix = format!("{payroll_id}/");
        let mut trail = vec![];
        for item in self.audit.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key);
            if !audit::verify(&key, &value) {
                return Err(PayrollError::IntegrityGuard(format!(
                    "audit witness {key} does not match its digest"
                )));
            }
            trail.push(decode(&value, "witness")?);
        }
        Ok(trail)
    }

    /// Create or update the payroll at `key`. `op` receives the existing record
    /// and ledger (if any) and returns the record to store, a value for the
    /// caller and witnesses to append. `new_id` names a record created here.
    pub(crate) fn upsert_payroll<T, F>(&self, key: &PayrollKey, new_id: &str, op: F) -> Result<T>
    where
        F: Fn(Option<Loaded>) -> Result<(PayrollRecord, T, Vec<PayrollWitness>)>,
    {
        let index_key = key.to_string();
        let result = (&self.payroll_keys, &self.payrolls, &self.payments, &self.audit).transaction(
            |(keys, payrolls, payments, audit)| {
                let existing = match keys.get(index_key.as_bytes())? {
                    Some(id) => {
                        let id = String::from_utf8_lossy(&id).into_owned();
                        Some(load(payrolls, payments, &id)?)
                    }
                    None => None,
                };
                let is_new = existing.is_none();

                let (record, out, witnesses) = abort_on(op(existing))?;
                if is_new {
                    if record.id != new_id {
                        return abort_on(Err(PayrollError::IntegrityGuard(format!(
                            "new payroll for {index_key} must use id {new_id}"
                        ))));
                    }
                    keys.insert(index_key.as_bytes(), new_id.as_bytes())?;
                }
                payrolls.insert(record.id.as_bytes(), abort_on(encode(&record, "payroll"))?)?;
                write_witnesses(audit, &witnesses)?;
                Ok(out)
            },
        )?;

        Ok(result)
    }

    /// Mutate one payroll record and its ledger atomically.
    pub(crate) fn update_payroll<T, F>(&self, payroll_id: &str, op: F) -> Result<T>
    where
        F: Fn(&mut PayrollRecord, &mut Vec<PayrollPayment>) -> Result<(T, Vec<PayrollWitness>)>,
    {
        let result = (&self.payrolls, &self.payments, &self.audit).transaction(
            |(payrolls, payments, audit)| {
                let (mut record, mut ledger) = load(payrolls, payments, payroll_id)?;
                let (out, witnesses) = abort_on(op(&mut record, &mut ledger))?;

                payrolls.insert(payroll_id.as_bytes(), abort_on(encode(&record, "payroll"))?)?;
                payments.insert(payroll_id.as_bytes(), abort_on(encode(&ledger, "ledger"))?)?;
                write_witnesses(audit, &witnesses)?;
                Ok(out)
            },
        )?;

        Ok(result)
    }

    /// Remove a payroll, its key index entry and its ledger. `guard` decides
    /// whether the record may go.
    pub(crate) fn delete_payroll<F>(&self, payroll_id: &str, guard: F, witness: &PayrollWitness) -> Result<PayrollRecord>
    where
        F: Fn(&PayrollRecord, &[PayrollPayment]) -> Result<()>,
    {
        let result = (&self.payroll_keys, &self.payrolls, &self.payments, &self.audit).transaction(
            |(keys, payrolls, payments, audit)| {
                let (record, ledger) = load(payrolls, payments, payroll_id)?;
                abort_on(guard(&record, &ledger))?;

                keys.remove(record.key().to_string().as_bytes())?;
                payrolls.remove(payroll_id.as_bytes())?;
                payments.remove(payroll_id.as_bytes())?;
                write_witnesses(audit, std::slice::from_ref(witness))?;
                Ok(record)
            },
        )?;

        Ok(result)
    }
}

fn load(
    payrolls: &TransactionalTree,
    payments: &TransactionalTree,
    payroll_id: &str,
) -> ConflictableTransactionResult<Loaded, PayrollError> {
    let Some(bytes) = payrolls.get(payroll_id.as_bytes())? else {
        return abort_on(Err(PayrollError::NotFound(format!("payroll {payroll_id}"))));
    };
    let record = abort_on(decode(&bytes, "payroll"))?;
    let ledger = match payments.get(payroll_id.as_bytes())? {
        Some(bytes) => abort_on(decode(&bytes, "ledger"))?,
        None => vec![],
    };
    Ok((record, ledger))
}

fn write_witnesses(
    audit: &TransactionalTree,
    witnesses: &[PayrollWitness],
) -> ConflictableTransactionResult<(), PayrollError> {
    for witness in witnesses {
        let (hash, cbor) = abort_on(witness.build())?;
        audit.insert(witness.store_key(&hash).as_bytes(), cbor)?;
    }
    Ok(())
}
