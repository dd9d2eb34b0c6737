//! The Credit Ledger: the only code path allowed to mutate `credit_balance`
//! or append to `credit_ledger` (spec §4.4).
//!
//! Every consumption is one `sqlx` transaction: `SELECT ... FOR UPDATE` on
//! the user's balance row, derive the day/month/provider-month counters
//! from the ledger itself inside the same transaction, check the hard
//! floor/ceilings, then `UPDATE` + `INSERT` + commit. The Postgres row lock
//! acquired by `FOR UPDATE` *is* the per-user serialization the spec asks
//! for — simpler than a hand-rolled `DashMap<UserId, Mutex<()>>` and
//! correct across multiple engine processes, which a process-local lock
//! would not be (see DESIGN.md).

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::QuotaConfig;
use crate::core_types::domain::{CreditLedgerEntry, LedgerOperation, PlanQuotas};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::logging::{log_info, log_warn};

/// One charge (or verification-only charge) to apply atomically.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub contact_id: Option<Uuid>,
    pub provider: Option<String>,
    pub operation: LedgerOperation,
    pub cost: f64,
    pub quotas: PlanQuotas,
    pub details: serde_json::Value,
}

/// What a successful ledger mutation gives back to the caller.
#[derive(Debug, Clone, Copy)]
pub struct LedgerReceipt {
    pub entry_id: Uuid,
    pub seq: i64,
    pub new_balance: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    total_credits: f64,
    used_credits: f64,
    expired_credits: f64,
}

impl BalanceRow {
    fn remaining(&self) -> f64 {
        (self.total_credits - self.expired_credits - self.used_credits).max(0.0)
    }
}

/// The atomic entry point for every credit mutation.
#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
    quota_defaults: QuotaConfig,
    events: EventBus,
}

impl CreditLedger {
    pub fn new(pool: PgPool, quota_defaults: QuotaConfig, events: EventBus) -> Self {
        Self {
            pool,
            quota_defaults,
            events,
        }
    }

    /// Read-only check used by the Coordinator's step 2 (spec §4.3): does
    /// the user plausibly have room for at least one more provider call?
    /// Not itself atomic — the authoritative check happens inside
    /// [`Self::consume`] under the balance row's lock — this exists only to
    /// fail a contact early without walking the whole cascade first.
    pub async fn precheck(&self, user_id: &str, max_provider_cost: f64, quotas: &PlanQuotas) -> EngineResult<()> {
        let balance = sqlx::query_as::<_, BalanceRow>(
            "SELECT total_credits, used_credits, expired_credits FROM credit_balance WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::quota_exceeded(user_id, "no credit balance provisioned"))?;

        if balance.remaining() < max_provider_cost {
            return Err(EngineError::quota_exceeded(user_id, "balance floor would be exceeded"));
        }

        let monthly_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('month', now())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if let Some(cap) = quotas.monthly.or(self.quota_defaults.monthly_default) {
            if monthly_consumed >= cap {
                return Err(EngineError::quota_exceeded(user_id, "monthly ceiling already reached"));
            }
        }

        let daily_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('day', now())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if let Some(cap) = quotas.daily.or(self.quota_defaults.daily_default) {
            if daily_consumed >= cap {
                return Err(EngineError::quota_exceeded(user_id, "daily ceiling already reached"));
            }
        }

        Ok(())
    }

    /// Whether `provider`'s per-user monthly cap is already exhausted, read
    /// outside any transaction since it only gates a skip, not a charge.
    pub async fn provider_monthly_exhausted(
        &self,
        user_id: &str,
        provider: crate::core_types::provider::ProviderName,
        quotas: &PlanQuotas,
    ) -> EngineResult<bool> {
        let Some(cap) = quotas.per_provider_month.or(self.quota_defaults.per_provider_month_default) else {
            return Ok(false);
        };
        let consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND provider = $2 AND success AND cost > 0
               AND created_at >= date_trunc('month', now())",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(consumed >= cap)
    }

    /// Charge `user_id` for `charge.cost`, failing the whole transaction
    /// (and appending a `success = false` audit row) if the balance floor,
    /// daily ceiling, monthly ceiling, or per-provider monthly ceiling
    /// would be breached.
    pub async fn consume(&self, user_id: &str, charge: ChargeRequest) -> EngineResult<LedgerReceipt> {
        let mut tx = self.pool.begin().await?;

        let balance = sqlx::query_as::<_, BalanceRow>(
            "SELECT total_credits, used_credits, expired_credits
             FROM credit_balance WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::quota_exceeded(user_id, "no credit balance provisioned"))?;

        let daily_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('day', now())",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let monthly_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('month', now())",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let provider_monthly_consumed: f64 = match &charge.provider {
            Some(provider) => {
                sqlx::query_scalar(
                    "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
                     WHERE user_id = $1 AND provider = $2 AND success AND cost > 0
                       AND created_at >= date_trunc('month', now())",
                )
                .bind(user_id)
                .bind(provider)
                .fetch_one(&mut *tx)
                .await?
            }
            None => 0.0,
        };

        let daily_cap = charge.quotas.daily.or(self.quota_defaults.daily_default);
        let monthly_cap = charge.quotas.monthly.or(self.quota_defaults.monthly_default);
        let provider_cap = charge
            .quotas
            .per_provider_month
            .or(self.quota_defaults.per_provider_month_default);

        let breach = if balance.remaining() < charge.cost {
            Some("balance floor")
        } else if daily_cap.is_some_and(|cap| daily_consumed + charge.cost > cap) {
            Some("daily ceiling")
        } else if monthly_cap.is_some_and(|cap| monthly_consumed + charge.cost > cap) {
            Some("monthly ceiling")
        } else if provider_cap.is_some_and(|cap| provider_monthly_consumed + charge.cost > cap) {
            Some("per-provider monthly ceiling")
        } else {
            None
        };

        if let Some(reason) = breach {
            let (_id, _seq): (Uuid, i64) = sqlx::query_as(
                "INSERT INTO credit_ledger
                    (id, user_id, contact_id, provider, operation, cost, success, details, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, false, $7, now())
                 RETURNING id, seq",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(charge.contact_id)
            .bind(&charge.provider)
            .bind(charge.operation)
            .bind(charge.cost)
            .bind(&charge.details)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            log_warn!(user_id, reason, cost = charge.cost, "Charge rejected by quota check");
            return Err(EngineError::quota_exceeded(
                user_id,
                format!("{reason} would be exceeded"),
            ));
        }

        sqlx::query(
            "UPDATE credit_balance SET used_credits = used_credits + $2, updated_at = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(charge.cost)
        .execute(&mut *tx)
        .await?;

        let (id, seq): (Uuid, i64) = sqlx::query_as(
            "INSERT INTO credit_ledger
                (id, user_id, contact_id, provider, operation, cost, success, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, true, $7, now())
             RETURNING id, seq",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(charge.contact_id)
        .bind(&charge.provider)
        .bind(charge.operation)
        .bind(charge.cost)
        .bind(&charge.details)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let new_balance = (balance.total_credits - balance.expired_credits - balance.used_credits - charge.cost).max(0.0);

        self.maybe_emit_low_credit(user_id, new_balance);

        Ok(LedgerReceipt {
            entry_id: id,
            seq,
            new_balance,
        })
    }

    /// Append a `success = false` audit row with no balance effect, for a
    /// charge that was already rejected before reaching [`Self::consume`]
    /// (the quota precheck, spec §4.3 step 2). `consume`'s own breach path
    /// covers the case where a real charge is attempted and found to
    /// breach; this method is for the case where the caller already knows
    /// the answer is no and only needs the audit trail.
    pub async fn record_rejected_charge(&self, user_id: &str, charge: ChargeRequest) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO credit_ledger
                (id, user_id, contact_id, provider, operation, cost, success, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, false, $7, now())",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(charge.contact_id)
        .bind(&charge.provider)
        .bind(charge.operation)
        .bind(0.0_f64)
        .bind(&charge.details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reverse a prior successful entry: inserts a `Refund` row with the
    /// cost sign inverted and restores `used_credits` symmetrically.
    pub async fn refund(
        &self,
        user_id: &str,
        original_entry_id: Uuid,
        reason: impl Into<String>,
    ) -> EngineResult<LedgerReceipt> {
        let reason = reason.into();
        let mut tx = self.pool.begin().await?;

        let original: CreditLedgerEntry = sqlx::query_as(
            "SELECT * FROM credit_ledger WHERE id = $1 AND user_id = $2",
        )
        .bind(original_entry_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            EngineError::internal(format!("refund target {original_entry_id} not found"))
        })?;

        sqlx::query(
            "UPDATE credit_balance SET used_credits = GREATEST(used_credits - $2, 0), updated_at = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(original.cost)
        .execute(&mut *tx)
        .await?;

        let (id, seq): (Uuid, i64) = sqlx::query_as(
            "INSERT INTO credit_ledger
                (id, user_id, contact_id, provider, operation, cost, success, details, created_at)
             VALUES ($1, $2, $3, $4, 'refund', $5, true, $6, now())
             RETURNING id, seq",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(original.contact_id)
        .bind(&original.provider)
        .bind(-original.cost)
        .bind(serde_json::json!({ "reason": reason, "original_entry_id": original_entry_id }))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let balance = sqlx::query_as::<_, BalanceRow>(
            "SELECT total_credits, used_credits, expired_credits FROM credit_balance WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        log_info!(user_id, original_entry_id = %original_entry_id, amount = original.cost, "Refund issued");

        Ok(LedgerReceipt {
            entry_id: id,
            seq,
            new_balance: balance.remaining(),
        })
    }

    /// Recompute a user's quota consumption straight from the ledger, for
    /// the `GetBalance`/`GetSubscription` read boundary. Always derived,
    /// never itself persisted (spec §4.4).
    pub async fn quota_state(&self, user_id: &str) -> EngineResult<crate::core_types::domain::QuotaState> {
        let today_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('day', now())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let month_consumed: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND success AND cost > 0 AND created_at >= date_trunc('month', now())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT provider, COALESCE(SUM(cost), 0) FROM credit_ledger
             WHERE user_id = $1 AND provider IS NOT NULL AND success AND cost > 0
               AND created_at >= date_trunc('month', now())
             GROUP BY provider",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(crate::core_types::domain::QuotaState {
            user_id: user_id.to_string(),
            today_consumed,
            month_consumed,
            per_provider_month_consumed: rows.into_iter().collect(),
        })
    }

    fn maybe_emit_low_credit(&self, user_id: &str, new_balance: f64) {
        if new_balance <= self.quota_defaults.low_credit_threshold {
            let _ = self.events.send(EngineEvent::LowCredit {
                user_id: user_id.to_string(),
                remaining: new_balance,
                threshold: self.quota_defaults.low_credit_threshold,
            });
        }
    }
}
