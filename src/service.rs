//! Service layer API for the time-to-pay workflow
use super::audit::{PayrollWitness, WitnessKind};
use super::clock::{ClockEvent, ClockEventType};
use super::config::PayrollSettings;
use super::error::{PayrollError, Result};
use super::ledger::{self, NewPayment, PayrollPayment, Reconciliation};
use super::locks::KeyLocks;
use super::payroll::{self, PayPeriod, PayrollKey, PayrollRecord, PayrollStatus, StatusChange};
use super::rounding::{self, DayComputation};
use super::store::Store;
use super::timesheet::{Actor, ApprovalStatus, Timesheet, TimesheetKey};
use super::types::TimeStamp;
use super::utils::{self, CLOCK_EVENT_HRP, PAYMENT_HRP, PAYROLL_HRP};
use super::worker::WorkerProfile;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

pub struct PayrollService {
    store: Store,
    settings: PayrollSettings,
    generation: KeyLocks, // one payroll key regenerates at a time
}

/// Per-member result of a bulk operation.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub succeeded: Vec<(String, T)>,
    pub failed: Vec<(String, PayrollError)>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            succeeded: vec![],
            failed: vec![],
        }
    }
}

impl<T> BatchReport<T> {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
    pub fn succeeded_ids(&self) -> Vec<&str> {
        self.succeeded.iter().map(|(id, _)| id.as_str()).collect()
    }
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
    fn record(&mut self, id: String, result: Result<T>) {
        match result {
            Ok(value) => self.succeeded.push((id, value)),
            Err(err) => self.failed.push((id, err)),
        }
    }
}

/// Options for a payroll status change.
#[derive(Debug, Clone)]
pub struct StatusUpdateOptions {
    pub actor: Actor,
    /// Confirm even though the worker still has pending timesheets in the period.
    pub override_pending_timesheets: bool,
    /// When marking paid, first record a final payment for the remaining balance.
    pub auto_settle: bool,
}

impl StatusUpdateOptions {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            override_pending_timesheets: false,
            auto_settle: false,
        }
    }
}

/// What happened when a timesheet's approval changed.
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub timesheet: Timesheet,
    /// Present when the payroll for the period was generated or refreshed:
    /// on entering `approved`, or on reopening an approved sheet whose
    /// payroll already exists.
    pub payroll: Option<Result<PayrollRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimesheetCheck {
    pub payroll_id: String,
    pub worker_id: String,
    pub pending_count: usize,
}

/// One (worker, period) pair for batched payroll generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRequest {
    pub worker_id: String,
    pub period: PayPeriod,
    pub project_id: Option<String>,
}

impl PayrollService {
    pub fn new(store: Store, settings: PayrollSettings) -> Self {
        Self {
            store,
            settings,
            generation: KeyLocks::default(),
        }
    }

    pub fn open(instance: Arc<sled::Db>, settings: PayrollSettings) -> Result<Self> {
        Ok(Self::new(Store::open(instance)?, settings))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &PayrollSettings {
        &self.settings
    }

    pub fn register_worker(&self, profile: &WorkerProfile) -> Result<()> {
        self.store.upsert_worker(profile)
    }

    /// Record a QR clock scan. Clock events are append-only.
    pub fn record_clock_event(
        &self,
        worker_id: &str,
        project_id: &str,
        event_type: ClockEventType,
        event_time: TimeStamp<Utc>,
        qr_code_id: &str,
    ) -> Result<ClockEvent> {
        self.store.worker(worker_id)?.ensure_active()?;

        let event = ClockEvent::new(
            utils::new_id(CLOCK_EVENT_HRP)?,
            worker_id.to_string(),
            project_id.to_string(),
            event_type,
            event_time,
            qr_code_id.to_string(),
        );
        self.store.append_clock_event(&event)?;

        debug!(worker_id, project_id, ?event_type, "clock event recorded");
        Ok(event)
    }

    /// Mark a scan as deleted. The event stays stored and stops counting.
    pub fn soft_delete_clock_event(&self, event: &ClockEvent) -> Result<()> {
        self.store.soft_delete_clock_event(event)?;

        debug!(event = %event.id, worker_id = %event.worker_id, "clock event soft deleted");
        Ok(())
    }

    /// Hours worked so far on a day, counting an open clock-in up to `now`.
    pub fn live_hours(
        &self,
        worker_id: &str,
        project_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<DayComputation> {
        let profile = self.store.worker(worker_id)?;
        let events = self.store.clock_events_for_day(worker_id, project_id, date)?;

        rounding::compute_live(
            worker_id,
            date,
            &events,
            profile.hourly_rate,
            self.settings.rounding,
            now,
        )
    }

    /// Turn a day of clock events into a pending timesheet.
    pub fn generate_timesheet(&self, key: &TimesheetKey) -> Result<Timesheet> {
        if self.store.timesheet(key)?.is_some() {
            return Err(PayrollError::TimesheetAlreadyExists(key.to_string()));
        }

        let profile = self.store.worker(&key.worker_id)?;
        profile.ensure_active()?;
        let events = self
            .store
            .clock_events_for_day(&key.worker_id, &key.project_id, key.date)?;
        let day = rounding::compute_day(
            &key.worker_id,
            key.date,
            &events,
            profile.hourly_rate,
            self.settings.rounding,
        )?;

        let sheet = Timesheet::from_day(key, &day, profile.hourly_rate)?;
        self.store.insert_new_timesheet(&sheet)?;

        info!(
            timesheet = %key,
            raw_hours = %day.raw_hours,
            total_hours = %sheet.total_hours,
            overtime_hours = %sheet.overtime_hours,
            "timesheet generated"
        );
        Ok(sheet)
    }

    pub fn create_manual_timesheet(
        &self,
        key: &TimesheetKey,
        hours: Decimal,
        notes: Option<String>,
    ) -> Result<Timesheet> {
        let profile = self.store.worker(&key.worker_id)?;
        profile.ensure_active()?;
        let sheet = Timesheet::manual(key, hours, profile.hourly_rate, notes)?;
        self.store.insert_new_timesheet(&sheet)?;

        info!(timesheet = %key, total_hours = %sheet.total_hours, "manual timesheet created");
        Ok(sheet)
    }

    /// Correct hours on a timesheet that is not approved.
    pub fn correct_timesheet_hours(
        &self,
        key: &TimesheetKey,
        hours: Decimal,
        notes: Option<String>,
    ) -> Result<Timesheet> {
        let (sheet, ()) = self
            .store
            .update_timesheet(key, |sheet| sheet.correct_hours(hours, notes.clone()))?;

        info!(timesheet = %key, total_hours = %sheet.total_hours, "timesheet hours corrected");
        Ok(sheet)
    }

    /// Move a timesheet through the approval gate. Entering `approved`
    /// (re)generates the payroll for the pay period containing the timesheet,
    /// and an admin reopening an approved sheet refreshes that payroll without
    /// it. The payroll outcome is reported without undoing the approval.
    pub fn set_timesheet_approval(
        &self,
        key: &TimesheetKey,
        status: ApprovalStatus,
        actor: &Actor,
    ) -> Result<ApprovalOutcome> {
        let (timesheet, previous) = self.store.update_timesheet(key, |sheet| {
            let previous = sheet.supervisor_approval;
            sheet.transition(status, actor)?;
            Ok(previous)
        })?;

        info!(timesheet = %key, from = %previous, to = %status, actor = %actor.id, "timesheet approval changed");

        let period = PayPeriod::containing(key.date, self.settings.period_start);
        let payroll_key = PayrollKey::new(key.worker_id.clone(), period, None);
        let payroll = match (previous, status) {
            (_, ApprovalStatus::Approved) => Some(self.upsert_for_key(&payroll_key, false, false, actor)),
            (ApprovalStatus::Approved, _) => match self.store.payroll_by_key(&payroll_key) {
                Ok(Some(_)) => Some(self.upsert_for_key(&payroll_key, false, true, actor)),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            },
            _ => None,
        };
        if let Some(Err(err)) = &payroll {
            warn!(timesheet = %key, error = %err, "payroll not updated after approval change");
        }

        Ok(ApprovalOutcome { timesheet, payroll })
    }

    /// Idempotent upsert of the payroll for one worker and period. Records past
    /// `pending` are only recomputed when `regenerate` is set; they return to
    /// `pending` and keep their payment history.
    pub fn generate_payroll_for_worker_and_period(
        &self,
        worker_id: &str,
        period: PayPeriod,
        project_id: Option<String>,
        regenerate: bool,
        actor: &Actor,
    ) -> Result<PayrollRecord> {
        let key = PayrollKey::new(worker_id, period, project_id);
        self.upsert_for_key(&key, regenerate, false, actor)
    }

    /// Read the approved timesheets and write the totals while holding the
    /// key's lock, so a later trigger never loses to an earlier, staler one.
    /// With `allow_empty` an existing record drops to zero totals instead of
    /// failing with `NotFound`.
    fn upsert_for_key(
        &self,
        key: &PayrollKey,
        regenerate: bool,
        allow_empty: bool,
        actor: &Actor,
    ) -> Result<PayrollRecord> {
        let slot = self.generation.slot(&key.to_string());
        let _serialized = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let profile = self.store.worker(&key.worker_id)?;
        let sheets = self.store.timesheets_for_worker(&key.worker_id, &key.period)?;
        let rates = &self.settings.deductions;
        let totals = if allow_empty {
            payroll::totals_for(key, &sheets, profile.exemptions(), rates)?
        } else {
            payroll::aggregate(key, &sheets, profile.exemptions(), rates)?
        };

        let basis = self.settings.payment_basis;
        let new_id = utils::new_id(PAYROLL_HRP)?;

        let record = self.store.upsert_payroll(key, &new_id, |existing| {
            let Some((mut record, ledger)) = existing else {
                if totals.timesheet_count == 0 {
                    return Err(PayrollError::NotFound(format!("payroll {key}")));
                }
                let record = PayrollRecord::new(new_id.clone(), key, &totals, basis);
                let witness = PayrollWitness::new(&record.id, &actor.id, WitnessKind::Generated);
                return Ok((record.clone(), record, vec![witness]));
            };

            let previous_status = record.status;
            let previous_net = record.net_pay;
            if previous_status != PayrollStatus::Pending && !regenerate {
                return Err(PayrollError::RequiresRegeneration {
                    payroll_id: record.id.clone(),
                    status: previous_status.to_string(),
                });
            }
            record.status = PayrollStatus::Pending;

            record.apply_totals(&totals, basis);
            ledger::sync_record(&mut record, &ledger, basis);
            if record.total_paid > record.basis_amount(basis) {
                return Err(PayrollError::IntegrityGuard(format!(
                    "payroll {} already has {} paid, above the regenerated {}",
                    record.id,
                    record.total_paid,
                    record.basis_amount(basis)
                )));
            }

            let mut witnesses = vec![];
            if previous_net != record.net_pay || regenerate {
                witnesses.push(PayrollWitness::new(
                    &record.id,
                    &actor.id,
                    WitnessKind::Regenerated {
                        previous_net,
                        net: record.net_pay,
                    },
                ));
            }
            if previous_status != record.status {
                witnesses.push(PayrollWitness::new(
                    &record.id,
                    &actor.id,
                    WitnessKind::StatusChanged {
                        from: previous_status,
                        to: record.status,
                    },
                ));
            }
            Ok((record.clone(), record, witnesses))
        })?;

        info!(
            payroll = %record.id,
            key = %key,
            gross = %record.gross_pay,
            net = %record.net_pay,
            timesheets = totals.timesheet_count,
            "payroll generated"
        );
        Ok(record)
    }

    /// Batched generation over many (worker, period) pairs, one result per pair.
    pub fn generate_payrolls(
        &self,
        requests: &[PayrollRequest],
        regenerate: bool,
        actor: &Actor,
    ) -> BatchReport<PayrollRecord> {
        let mut report = BatchReport::default();
        for request in requests {
            let key = PayrollKey::new(
                request.worker_id.clone(),
                request.period,
                request.project_id.clone(),
            );
            let result = self.generate_payroll_for_worker_and_period(
                &request.worker_id,
                request.period,
                request.project_id.clone(),
                regenerate,
                actor,
            );
            report.record(key.to_string(), result);
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch payroll generation finished"
        );
        report
    }

    /// Count timesheets still awaiting approval in each payroll's worker and period.
    pub fn check_pending_timesheets_for_payrolls(
        &self,
        ids: &[String],
    ) -> Result<Vec<PendingTimesheetCheck>> {
        let records = self.store.payrolls(ids)?;
        ids.iter()
            .map(|id| -> Result<PendingTimesheetCheck> {
                let record = records
                    .get(id)
                    .ok_or_else(|| PayrollError::NotFound(format!("payroll {id}")))?;
                Ok(PendingTimesheetCheck {
                    payroll_id: id.clone(),
                    worker_id: record.worker_id.clone(),
                    pending_count: self.pending_timesheet_count(record)?,
                })
            })
            .collect()
    }

    fn pending_timesheet_count(&self, record: &PayrollRecord) -> Result<usize> {
        let key = record.key();
        let sheets = self.store.timesheets_for_worker(&record.worker_id, &key.period)?;

        Ok(sheets
            .iter()
            .filter(|sheet| sheet.supervisor_approval == ApprovalStatus::Pending)
            .filter(|sheet| {
                key.project_id
                    .as_ref()
                    .is_none_or(|project| *project == sheet.project_id)
            })
            .count())
    }

    /// Move payrolls towards `new_status` (pending, confirmed, paid or void).
    pub fn update_payroll_status(
        &self,
        ids: &[String],
        new_status: PayrollStatus,
        options: &StatusUpdateOptions,
    ) -> Result<BatchReport<PayrollRecord>> {
        self.apply_status_change(ids, StatusChange::towards(new_status), options)
    }

    /// Apply one lifecycle move to a batch. If any member is missing or in the
    /// wrong state the whole batch is rejected; otherwise each record moves in
    /// its own transaction and failures are reported per record.
    pub fn apply_status_change(
        &self,
        ids: &[String],
        change: StatusChange,
        options: &StatusUpdateOptions,
    ) -> Result<BatchReport<PayrollRecord>> {
        let records = self.store.payrolls(ids)?;

        let offenders: Vec<(String, PayrollError)> = ids
            .iter()
            .filter_map(|id| match records.get(id) {
                None => Some((id.clone(), PayrollError::NotFound(format!("payroll {id}")))),
                Some(record) if !change.accepts(record.status) => Some((
                    id.clone(),
                    PayrollError::StateConflict(format!(
                        "payroll {id} is {}; cannot move to {}",
                        record.status,
                        change.target()
                    )),
                )),
                Some(_) => None,
            })
            .collect();

        let mut report = BatchReport::default();
        if !offenders.is_empty() {
            warn!(
                offenders = offenders.len(),
                batch = ids.len(),
                target = %change.target(),
                "status batch rejected"
            );
            for id in ids {
                if offenders.iter().all(|(offender, _)| offender != id) {
                    report.failed.push((
                        id.clone(),
                        PayrollError::StateConflict(format!(
                            "batch rejected: {} of {} payrolls cannot move to {}",
                            offenders.len(),
                            ids.len(),
                            change.target()
                        )),
                    ));
                }
            }
            report.failed.extend(offenders);
            return Ok(report);
        }

        for id in ids {
            let result = self.transition_one(id, &records[id], change, options);
            report.record(id.clone(), result);
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            target = %change.target(),
            actor = %options.actor.id,
            "payroll status batch finished"
        );
        Ok(report)
    }

    fn transition_one(
        &self,
        payroll_id: &str,
        snapshot: &PayrollRecord,
        change: StatusChange,
        options: &StatusUpdateOptions,
    ) -> Result<PayrollRecord> {
        if change == StatusChange::Confirm && !options.override_pending_timesheets {
            let count = self.pending_timesheet_count(snapshot)?;
            if count > 0 {
                return Err(PayrollError::PendingTimesheets {
                    payroll_id: payroll_id.to_string(),
                    count,
                });
            }
        }

        let basis = self.settings.payment_basis;
        let settle_id = utils::new_id(PAYMENT_HRP)?;
        let actor = &options.actor;
        let require_settled = self.settings.require_full_settlement;

        let record = self.store.update_payroll(payroll_id, |record, ledger| {
            let mut witnesses = vec![];

            if change == StatusChange::MarkPaid {
                let remaining = record.remaining_for(basis);
                if remaining > Decimal::ZERO && options.auto_settle {
                    let payment = ledger::add_payment(
                        record,
                        ledger,
                        NewPayment {
                            id: settle_id.clone(),
                            amount: remaining,
                            payment_date: Utc::now().date_naive(),
                            notes: Some("final settlement on mark as paid".into()),
                            recorded_by: actor.id.clone(),
                        },
                        basis,
                    )?;
                    witnesses.push(PayrollWitness::new(
                        &record.id,
                        &actor.id,
                        WitnessKind::PaymentAdded {
                            payment_id: payment.id,
                            amount: payment.amount,
                        },
                    ));
                } else if remaining > Decimal::ZERO && require_settled {
                    return Err(PayrollError::IntegrityGuard(format!(
                        "payroll {} still has {remaining} outstanding",
                        record.id
                    )));
                }
            }

            let from = record.transition(change, actor, basis)?;
            witnesses.push(PayrollWitness::new(
                &record.id,
                &actor.id,
                WitnessKind::StatusChanged {
                    from,
                    to: record.status,
                },
            ));
            Ok((record.clone(), witnesses))
        })?;

        if change == StatusChange::MarkPaid && record.total_paid < record.basis_amount(basis) {
            warn!(
                payroll = %record.id,
                outstanding = %(record.basis_amount(basis) - record.total_paid),
                "payroll marked paid with an outstanding balance"
            );
        }
        info!(payroll = %record.id, status = %record.status, actor = %actor.id, "payroll status changed");
        Ok(record)
    }

    /// Append a payment to a confirmed or paid payroll.
    pub fn add_payroll_payment(
        &self,
        payroll_id: &str,
        amount: Decimal,
        payment_date: NaiveDate,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<PayrollPayment> {
        let basis = self.settings.payment_basis;
        let payment_id = utils::new_id(PAYMENT_HRP)?;

        let payment = self.store.update_payroll(payroll_id, |record, ledger| {
            let payment = ledger::add_payment(
                record,
                ledger,
                NewPayment {
                    id: payment_id.clone(),
                    amount,
                    payment_date,
                    notes: notes.clone(),
                    recorded_by: actor.id.clone(),
                },
                basis,
            )?;
            let witness = PayrollWitness::new(
                &record.id,
                &actor.id,
                WitnessKind::PaymentAdded {
                    payment_id: payment.id.clone(),
                    amount,
                },
            );
            Ok((payment, vec![witness]))
        })?;

        info!(payroll = %payroll_id, payment = %payment.id, amount = %amount, "payment recorded");
        Ok(payment)
    }

    /// Set the cumulative amount paid. Concurrent calls on one payroll
    /// serialize through the storage transaction; the last commit wins.
    pub fn set_payroll_payment_amount(
        &self,
        payroll_id: &str,
        total_amount: Decimal,
        actor: &Actor,
    ) -> Result<Reconciliation> {
        let basis = self.settings.payment_basis;
        let payment_id = utils::new_id(PAYMENT_HRP)?;

        let reconciliation = self.store.update_payroll(payroll_id, |record, ledger| {
            let result = ledger::reconcile_total(
                record,
                ledger,
                total_amount,
                NewPayment {
                    id: payment_id.clone(),
                    amount: total_amount,
                    payment_date: Utc::now().date_naive(),
                    notes: None,
                    recorded_by: actor.id.clone(),
                },
                basis,
            )?;
            let witnesses = if result.is_noop() {
                vec![]
            } else {
                vec![PayrollWitness::new(
                    &record.id,
                    &actor.id,
                    WitnessKind::PaymentReconciled {
                        from: result.previous_total,
                        to: result.target_total,
                    },
                )]
            };
            Ok((result, witnesses))
        })?;

        info!(
            payroll = %payroll_id,
            from = %reconciliation.previous_total,
            to = %reconciliation.target_total,
            "amount paid set"
        );
        Ok(reconciliation)
    }

    /// Remaining balance computed from the ledger, not the cached record field.
    pub fn remaining_balance(&self, payroll_id: &str) -> Result<Decimal> {
        let mut record = self.store.payroll(payroll_id)?;
        let ledger = self.store.ledger(payroll_id)?;
        ledger::sync_record(&mut record, &ledger, self.settings.payment_basis);

        Ok(record.remaining_balance)
    }

    /// Records with their ledgers, read as one batch.
    pub fn payrolls_with_payments(
        &self,
        ids: &[String],
    ) -> Result<Vec<(PayrollRecord, Vec<PayrollPayment>)>> {
        let mut records = self.store.payrolls(ids)?;
        let mut ledgers = self.store.payments_for(ids)?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                let record = records.remove(id)?;
                let ledger = ledgers.remove(id).unwrap_or_default();
                Some((record, ledger))
            })
            .collect())
    }

    /// Delete a pending or void payroll together with its ledger.
    pub fn delete_payroll(&self, payroll_id: &str, actor: &Actor) -> Result<PayrollRecord> {
        let witness = PayrollWitness::new(payroll_id, &actor.id, WitnessKind::Deleted);
        let record = self.store.delete_payroll(
            payroll_id,
            |record, _| match record.status {
                PayrollStatus::Pending | PayrollStatus::Void => Ok(()),
                status => Err(PayrollError::StateConflict(format!(
                    "payroll {payroll_id} is {status}; only pending or void payrolls can be deleted"
                ))),
            },
            &witness,
        )?;

        info!(payroll = %payroll_id, actor = %actor.id, "payroll deleted");
        Ok(record)
    }

    pub fn audit_trail(&self, payroll_id: &str) -> Result<Vec<PayrollWitness>> {
        self.store.audit_trail(payroll_id)
    }

    /// Lookup helper for callers holding a payroll key instead of an id.
    pub fn payroll_for(&self, key: &PayrollKey) -> Result<Option<PayrollRecord>> {
        self.store.payroll_by_key(key)
    }
}
