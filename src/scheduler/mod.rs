pub mod assigner;
pub mod preemption;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::cache::cluster_queue::{AdmittedWorkload, usage_ratio};
use crate::domain::cluster_queue::QueueingStrategy;
use crate::domain::ids::{ClusterQueueName, WorkloadKey};
use crate::domain::workload::{ConditionType, Workload};
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::QueueManager;
use crate::scheduler::assigner::{AssignResult, AssignmentMode, WorkloadAssignment};
use crate::scheduler::preemption::Preemptor;
use crate::store::{EventRecorder, WorkloadStore, update_with_retry};

/// Everything the admission core shares: the cache, the pending queues, the
/// external store, and the event sink. Created once at startup and passed
/// explicitly; there are no ambient singletons.
///
/// External controllers interact with the core exclusively through the three
/// narrow capabilities [`SchedulerContext::enqueue_workload`],
/// [`SchedulerContext::admission_released`], and
/// [`SchedulerContext::workload_finished`].
#[derive(Clone)]
pub struct SchedulerContext {
    pub cache: Cache,
    pub queues: QueueManager,
    pub store: Arc<dyn WorkloadStore>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl SchedulerContext {
    pub fn new(cache: Cache, queues: QueueManager, store: Arc<dyn WorkloadStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        SchedulerContext { cache, queues, store, recorder }
    }

    /// Capability for job controllers: a new or updated workload wants to be
    /// considered for admission.
    pub async fn enqueue_workload(&self, workload: Workload) {
        let key = workload.key();
        if self.queues.push(workload) {
            self.recorder.event(&key, "Created", "Workload registered for admission".to_string()).await;
        }
    }

    /// Capability for job controllers: a workload's admission went away (the job
    /// was suspended after an eviction, or deleted). Releases the quota, clears
    /// the reservation in the store, and requeues the workload if it still
    /// exists.
    pub async fn admission_released(&self, key: &WorkloadKey) {
        self.cache.forget_admission(key);

        match self.store.get(key).await {
            Ok(workload) => {
                if workload.admission.is_some() || workload.has_quota_reserved() {
                    let now = Utc::now();
                    let cleared = update_with_retry(self.store.as_ref(), key, |workload| {
                        workload.admission = None;
                        let reason = if workload.has_condition(ConditionType::Evicted) { "Preempted" } else { "AdmissionReleased" };
                        workload.set_condition(ConditionType::QuotaReserved, false, reason, "Quota reservation released".to_string(), now);
                        workload.set_condition(ConditionType::Admitted, false, reason, "Admission released".to_string(), now);
                    })
                    .await;

                    match cleared {
                        Ok(updated) => {
                            self.recorder.event(key, "EvictionAcknowledged", "Admission released, workload returns to the queue".to_string()).await;
                            self.queues.push(updated);
                        }
                        Err(error) => log::warn!("Clearing the admission of workload {} failed: {}", key, error),
                    }
                }
            }
            Err(Error::NotFound(_)) => {
                self.queues.delete(key);
            }
            Err(error) => log::warn!("Reading workload {} after admission release failed: {}", key, error),
        }

        // Freed quota may unblock parked workloads anywhere in the cohort.
        self.queues.flush_inadmissible();
        self.queues.wake();
    }

    /// Capability for job controllers: the workload finished and its quota, if
    /// any, must be returned.
    pub async fn workload_finished(&self, key: &WorkloadKey) {
        self.cache.forget_admission(key);
        self.queues.delete(key);
        self.queues.flush_inadmissible();
        self.queues.wake();
    }

    /// Rebuilds the admission accounting from the external store: every
    /// workload holding a reservation is replayed into the cache. Specs,
    /// flavors, and local queues are kept as-is.
    pub async fn resync(&self) -> Result<()> {
        self.cache.reset_admissions();
        let workloads = self.store.list().await?;

        let mut replayed = 0;
        for workload in &workloads {
            if workload.admission.is_some() && workload.has_quota_reserved() && !workload.is_finished() {
                if let Err(error) = self.cache.assume_admission(workload) {
                    log::error!("Replaying admission of workload {} failed: {}", workload.key(), error);
                } else {
                    replayed += 1;
                }
            }
        }

        log::info!("Cache resynced from the store: {} admissions replayed over {} workloads.", replayed, workloads.len());
        Ok(())
    }
}

/// Outcome counters of one scheduling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub admitted: usize,
    pub preempted: usize,
    pub evictions_issued: usize,
    pub inadmissible: usize,
    pub requeued: usize,
}

struct PendingAdmission {
    workload: Workload,
    assignment: WorkloadAssignment,
    victims: Vec<WorkloadKey>,
}

/// The single-instance scheduler loop.
///
/// A pass snapshots the cache, walks the cluster queues in fairness order
/// (lowest usage/nominal ratio first), assigns flavor choices to the pending
/// heads, and finally applies the recorded decisions to the store and the
/// cache. Within a pass all decisions are made against the one snapshot, so the
/// pass is serializable.
pub struct Scheduler {
    ctx: SchedulerContext,
    preemptor: Preemptor,
    pass_interval: Duration,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext) -> Self {
        let preemptor = Preemptor::new(ctx.store.clone(), ctx.recorder.clone());
        Scheduler { ctx, preemptor, pass_interval: Duration::from_millis(500) }
    }

    pub fn with_pass_interval(mut self, interval: Duration) -> Self {
        self.pass_interval = interval;
        self
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    /// Runs exactly one scheduling pass.
    pub async fn schedule_once(&self) -> Result<PassSummary> {
        self.pass(&CancellationToken::new()).await
    }

    /// Runs passes until cancellation, waking up on queue activity or after the
    /// configured interval, whichever comes first.
    pub async fn run(&self, cancel: CancellationToken) {
        let wakeup = self.ctx.queues.wakeup_handle();
        log::info!("Scheduler loop started (pass interval {:?}).", self.pass_interval);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.pass(&cancel).await {
                Ok(summary) => {
                    if summary != PassSummary::default() {
                        log::debug!("Pass finished: {:?}", summary);
                    }
                }
                Err(error) => {
                    // An invariant violation poisons the in-memory accounting;
                    // rebuild it from the store before the next pass.
                    log::error!("Scheduling pass aborted: {}", error);
                    if let Err(resync_error) = self.ctx.resync().await {
                        log::error!("Cache resync failed: {}", resync_error);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wakeup.notified() => {},
                _ = tokio::time::sleep(self.pass_interval) => {},
            }
        }

        log::info!("Scheduler loop stopped.");
    }

    async fn pass(&self, cancel: &CancellationToken) -> Result<PassSummary> {
        let mut snapshot = self.ctx.cache.snapshot();
        let mut summary = PassSummary::default();

        // Cluster queues with pending work, least loaded first so lenders get
        // their head considered before heavy borrowers.
        let mut order: Vec<(ClusterQueueName, f64)> = self
            .ctx
            .queues
            .queues_with_pending()
            .into_iter()
            .filter(|name| snapshot.cluster_queue(name).map(|queue| queue.active).unwrap_or(false))
            .map(|name| {
                let queue = snapshot.cluster_queue(&name).expect("filtered above");
                let ratio = usage_ratio(&queue.spec, &queue.usage);
                (name, ratio)
            })
            .collect();
        order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));

        let mut to_admit: Vec<PendingAdmission> = Vec::new();
        let mut requeue_plain: Vec<Workload> = Vec::new();
        let mut park_infeasible: Vec<(Workload, String)> = Vec::new();

        'queues: for (queue_name, _) in order {
            let strategy = snapshot.cluster_queue(&queue_name).map(|queue| queue.spec.queueing_strategy).unwrap_or_default();

            while let Some(workload) = self.ctx.queues.pop_head(&queue_name) {
                if cancel.is_cancelled() {
                    requeue_plain.push(workload);
                    break 'queues;
                }

                match assigner::assign(&workload, &queue_name, &snapshot) {
                    AssignResult::Assigned(assignment) if assignment.mode() == AssignmentMode::Fit => {
                        Self::commit_to_snapshot(&mut snapshot, &workload, &assignment);
                        to_admit.push(PendingAdmission { workload, assignment, victims: Vec::new() });
                    }
                    AssignResult::Assigned(assignment) => {
                        let victims = Preemptor::find_victims(&workload, &assignment, &mut snapshot);
                        if victims.is_empty() {
                            // Preemption refused: infeasible for this pass only.
                            log::debug!("Workload {} needs preemption but no victim set exists this pass.", workload.key());
                            requeue_plain.push(workload);
                            if strategy == QueueingStrategy::StrictFifo {
                                continue 'queues;
                            }
                            continue;
                        }

                        Self::commit_to_snapshot(&mut snapshot, &workload, &assignment);
                        to_admit.push(PendingAdmission { workload, assignment, victims });
                    }
                    AssignResult::Infeasible(reason) => {
                        park_infeasible.push((workload, reason));
                        if strategy == QueueingStrategy::StrictFifo {
                            continue 'queues;
                        }
                    }
                }
            }
        }

        self.apply(to_admit, &mut requeue_plain, &mut summary).await?;

        summary.requeued += requeue_plain.len();
        for workload in requeue_plain {
            self.ctx.queues.requeue(workload, false);
        }

        summary.inadmissible += park_infeasible.len();
        for (workload, reason) in park_infeasible {
            self.park_inadmissible(workload, reason).await;
        }

        if summary.admitted > 0 || summary.evictions_issued > 0 {
            // Admission changes may unblock borrowers and cohort peers.
            self.ctx.queues.wake();
        }

        metrics::refresh(&self.ctx.cache, &self.ctx.queues);
        Ok(summary)
    }

    fn commit_to_snapshot(snapshot: &mut crate::cache::snapshot::Snapshot, workload: &Workload, assignment: &WorkloadAssignment) {
        let entry = AdmittedWorkload {
            key: workload.key(),
            priority: workload.priority,
            admitted_at: None,
            admission: assignment.to_admission(),
            reclaimable: workload.reclaimable.clone(),
        };
        snapshot.add_admitted(&assignment.cluster_queue, entry);
    }

    /// Applies the recorded decisions: evictions are issued (and their quota
    /// released through the in-process admission hook) before the preemptor's
    /// admission is written, so the cache never overshoots its quota.
    async fn apply(&self, to_admit: Vec<PendingAdmission>, requeue_plain: &mut Vec<Workload>, summary: &mut PassSummary) -> Result<()> {
        for pending in to_admit {
            let key = pending.workload.key();

            if !pending.victims.is_empty() {
                let issued = self.preemptor.issue_evictions(&pending.victims, &key).await;
                summary.preempted += pending.victims.len();
                summary.evictions_issued += issued;

                if issued < pending.victims.len() {
                    // Without every victim gone the admission would overshoot;
                    // retry the whole decision next pass.
                    requeue_plain.push(pending.workload);
                    continue;
                }

                for victim in &pending.victims {
                    self.ctx.admission_released(victim).await;
                }
            }

            let admission = pending.assignment.to_admission();
            let queue_name = admission.cluster_queue.clone();
            let now = Utc::now();
            let written = update_with_retry(self.ctx.store.as_ref(), &key, |workload| {
                workload.admission = Some(admission.clone());
                let message = format!("Admitted by clusterQueue {}", queue_name);
                workload.set_condition(ConditionType::QuotaReserved, true, "QuotaReserved", message.clone(), now);
                workload.set_condition(ConditionType::Admitted, true, "Admitted", message, now);
                workload.set_condition(ConditionType::Evicted, false, "Admitted", String::new(), now);
            })
            .await;

            match written {
                Ok(updated) => {
                    match self.ctx.cache.assume_admission(&updated) {
                        Ok(()) => {}
                        Err(error @ Error::InvariantViolation(_)) => return Err(error),
                        Err(error) => {
                            log::warn!("Charging the admission of workload {} failed: {}", key, error);
                            requeue_plain.push(pending.workload);
                            continue;
                        }
                    }
                    summary.admitted += 1;
                    self.ctx.recorder.event(&key, "Admitted", format!("Admitted by clusterQueue {}", queue_name)).await;
                }
                Err(error) => {
                    log::warn!("Writing the admission of workload {} failed, retrying next pass: {}", key, error);
                    requeue_plain.push(pending.workload);
                }
            }
        }

        Ok(())
    }

    /// Records infeasibility on the workload and parks it until cluster state
    /// changes.
    async fn park_inadmissible(&self, workload: Workload, reason: String) {
        let key = workload.key();
        let now = Utc::now();
        let written = update_with_retry(self.ctx.store.as_ref(), &key, |workload| {
            workload.set_condition(ConditionType::QuotaReserved, false, "Inadmissible", reason.clone(), now);
        })
        .await;

        if let Err(error) = written {
            log::warn!("Recording inadmissibility of workload {} failed: {}", key, error);
        }

        log::debug!("Workload {} is inadmissible: {}", key, reason);
        self.ctx.queues.requeue(workload, true);
    }
}
