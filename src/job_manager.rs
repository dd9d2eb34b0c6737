//! Job Manager: owns the bounded work queue and the worker pool that drains
//! it (spec §5.2).
//!
//! One bounded `tokio::sync::mpsc` channel is shared by `worker.pool_size`
//! tasks (default `cpu_count * 4`), each pulling one contact at a time and
//! running it through the [`CascadeCoordinator`]. Progress is a per-job
//! counter in Postgres, incremented as each contact finishes; a process
//! restart resumes a job by re-enqueuing contacts still `pending`
//! (`ProviderResult` rows are append-only and the ledger is the charge
//! authority, so replaying a partially-worked contact is safe).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cascade::{CascadeCoordinator, CascadeDeps};
use crate::config::WorkerConfig;
use crate::core_types::domain::{Contact, Job, JobOrigin, JobState, PlanQuotas};
use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::logging::{log_error, log_info, log_warn};

struct WorkItem {
    contact: Contact,
    user_id: String,
    quotas: PlanQuotas,
}

/// Owns the shared queue and worker pool. Cheap to clone (everything
/// inside is `Arc`-backed); cloning gives another handle to the same pool,
/// not a second pool.
#[derive(Clone)]
pub struct JobManager {
    ctx: Arc<EngineContext>,
    sender: mpsc::Sender<WorkItem>,
    cancellations: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(ctx: Arc<EngineContext>, worker: WorkerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(worker.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancellations = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        for worker_id in 0..worker.pool_size {
            let ctx = ctx.clone();
            let receiver = receiver.clone();
            let cancellations = cancellations.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(Self::worker_loop(worker_id, ctx, receiver, cancellations, shutdown));
        }

        Self {
            ctx,
            sender,
            cancellations,
            shutdown,
        }
    }

    async fn worker_loop(
        worker_id: usize,
        ctx: Arc<EngineContext>,
        receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
        cancellations: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
        shutdown: CancellationToken,
    ) {
        log_info!(worker_id, "Cascade worker started");
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => None,
                item = async {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                } => item,
            };

            let Some(item) = item else {
                break;
            };

            let job_id = item.contact.job_id;
            let cancellation = cancellations
                .lock()
                .await
                .entry(job_id)
                .or_insert_with(CancellationToken::new)
                .clone();
            if cancellation.is_cancelled() {
                log_info!(worker_id, %job_id, contact_id = %item.contact.id, "Skipping contact: job cancelled");
                continue;
            }

            let deps = CascadeDeps {
                repo: &ctx.repo,
                cache: &ctx.cache,
                ledger: &ctx.ledger,
                rate_limiters: &ctx.rate_limiters,
                providers: &ctx.providers,
                hlr: ctx.hlr.as_ref(),
                cascade: &ctx.cascade_config,
                verification: &ctx.verification_config,
                events: &ctx.events,
                user_id: &item.user_id,
                quotas: item.quotas,
                cancellation: &cancellation,
            };

            let contact_id = item.contact.id;
            if let Err(err) = CascadeCoordinator::run(item.contact, &deps).await {
                log_error!(worker_id, %job_id, %contact_id, error = %err, "Cascade run failed");
            }
        }
        log_info!(worker_id, "Cascade worker stopped");
    }

    /// Create a job, persist its contacts as `pending`, and enqueue each
    /// for the worker pool. Every contact must satisfy the ingestion
    /// contract (a name+company triple or a profile URL); the whole batch
    /// is rejected if any contact doesn't, before a job is ever created.
    pub async fn submit_job(
        &self,
        owner: &str,
        origin: JobOrigin,
        contacts: Vec<Contact>,
        quotas: PlanQuotas,
    ) -> EngineResult<Job> {
        if let Some(bad) = contacts.iter().find(|c| !c.satisfies_ingestion_contract()) {
            return Err(EngineError::invalid_input(format!(
                "contact {} has neither a name+company triple nor a profile_url",
                bad.id
            )));
        }

        let now = chrono::Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            state: JobState::Pending,
            total: contacts.len() as i32,
            completed: 0,
            origin,
            created_at: now,
            updated_at: now,
        };
        self.ctx.repo.insert_job(&job).await?;

        for mut contact in contacts {
            contact.job_id = job.id;
            self.ctx.repo.insert_contact(&contact).await?;
            self.enqueue(contact, owner.to_string(), quotas).await;
        }

        Ok(job)
    }

    async fn enqueue(&self, contact: Contact, user_id: String, quotas: PlanQuotas) {
        let item = WorkItem {
            contact,
            user_id,
            quotas,
        };
        if self.sender.send(item).await.is_err() {
            log_warn!("Work queue closed, dropping enqueue");
        }
    }

    /// Re-enqueue a job's still-`pending` contacts, for resuming after a
    /// restart.
    pub async fn resume_job(&self, job_id: Uuid, owner: &str, quotas: PlanQuotas) -> EngineResult<usize> {
        let pending = self.ctx.repo.get_pending_contacts_for_job(job_id).await?;
        let count = pending.len();
        for contact in pending {
            self.enqueue(contact, owner.to_string(), quotas).await;
        }
        Ok(count)
    }

    pub async fn get_job(&self, id: Uuid) -> EngineResult<Option<Job>> {
        self.ctx.repo.get_job(id).await
    }

    pub async fn list_jobs(&self, owner: &str) -> EngineResult<Vec<Job>> {
        self.ctx.repo.list_jobs(owner).await
    }

    pub async fn get_contacts(&self, job_id: Uuid) -> EngineResult<Vec<Contact>> {
        self.ctx.repo.get_contacts_for_job(job_id).await
    }

    /// Mark a job cancelled: queued contacts for it are skipped as workers
    /// reach them; a contact already mid-flight finishes its current
    /// provider call but skips the remaining cascade steps. The job lands
    /// in `partial`, not `failed` — some contacts may still have enriched.
    pub async fn cancel_job(&self, job_id: Uuid) -> EngineResult<()> {
        let token = self
            .cancellations
            .lock()
            .await
            .entry(job_id)
            .or_insert_with(CancellationToken::new)
            .clone();
        token.cancel();
        self.ctx.repo.set_job_state(job_id, JobState::Partial).await.ok();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
