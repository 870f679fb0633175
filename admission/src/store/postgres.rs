//! `PostgreSQL` implementation of the storage traits.
//!
//! The capacity reservation holds `SELECT ... FOR UPDATE` on the event row for
//! the whole unit of work, so reservers across every replica are serialized
//! by the database. Every other state change is a single conditional
//! `UPDATE` whose `rows_affected()` says whether it won.

use super::{AttendeeStore, DirectoryStore, StoreResult, TicketStore, TransactionStore};
use crate::attendance_code::{AttendanceCode, MAX_CODE_ATTEMPTS};
use crate::config::PostgresConfig;
use crate::error::StoreError;
use crate::ledger::{Capacity, CapacityLedger, LedgerError};
use crate::types::{
    EventId, EventSnapshot, Money, Ticket, TicketDraft, TicketId, TicketStatus, Transaction,
    TransactionId, TransactionStatus, UserId, UserProfile,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const TICKET_COLUMNS: &str = "id, user_id, event_id, price_paid_cents, attendance_code, status, \
     is_checked_in, checked_in_at, purchased_at";

const TRANSACTION_COLUMNS: &str = "id, ticket_id, user_id, external_ref, amount_cents, status, \
     payment_method, created_at, completed_at";

const ATTENDANCE_CODE_CONSTRAINT: &str = "tickets_attendance_code_key";

/// Outcome of one reservation attempt with one candidate code.
enum Attempt {
    Reserved(Ticket),
    CodeCollision,
}

/// `PostgreSQL`-backed admission store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using pool settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running admission migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        info!("Admission migrations complete");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn reserve_once(
        &self,
        draft: &TicketDraft,
        code: AttendanceCode,
    ) -> Result<Attempt, LedgerError> {
        let event_id = draft.event_id;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        // Exclusive lock on the event row until commit or rollback.
        let row = sqlx::query("SELECT capacity, tickets_sold FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let Some(row) = row else {
            rollback(tx, event_id).await;
            return Err(LedgerError::EventNotFound(event_id));
        };
        let counter = Capacity::new(
            to_u32(row.try_get("capacity").map_err(StoreError::from)?)?,
            to_u32(row.try_get("tickets_sold").map_err(StoreError::from)?)?,
        );
        if let Err(exhausted) = counter.try_reserve(event_id) {
            rollback(tx, event_id).await;
            return Err(exhausted.into());
        }

        let ticket = draft.clone().into_ticket(code);
        let inserted = sqlx::query(
            "INSERT INTO tickets (id, user_id, event_id, price_paid_cents, attendance_code, status, \
             is_checked_in, checked_in_at, purchased_at) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, NULL, $7)",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.user_id.as_uuid())
        .bind(ticket.event_id.as_uuid())
        .bind(to_i64(ticket.price_paid)?)
        .bind(ticket.attendance_code.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.purchased_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation()
                    && db.constraint() == Some(ATTENDANCE_CODE_CONSTRAINT) =>
            {
                rollback(tx, event_id).await;
                return Ok(Attempt::CodeCollision);
            }
            Err(e) => {
                rollback(tx, event_id).await;
                return Err(StoreError::from(e).into());
            }
        }

        sqlx::query("UPDATE events SET tickets_sold = tickets_sold + 1 WHERE id = $1")
            .bind(event_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(Attempt::Reserved(ticket))
    }
}

impl CapacityLedger for PostgresStore {
    fn try_reserve(&self, draft: TicketDraft) -> BoxFuture<'_, Result<Ticket, LedgerError>> {
        Box::pin(async move {
            for attempt in 1..=MAX_CODE_ATTEMPTS {
                match self.reserve_once(&draft, AttendanceCode::generate()).await? {
                    Attempt::Reserved(ticket) => return Ok(ticket),
                    Attempt::CodeCollision => {
                        debug!(ticket_id = %draft.id, attempt, "Attendance code collision, retrying");
                    }
                }
            }
            Err(StoreError::Conflict(format!(
                "no unique attendance code after {MAX_CODE_ATTEMPTS} attempts"
            ))
            .into())
        })
    }

    fn release(&self, event_id: EventId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE events SET tickets_sold = GREATEST(tickets_sold - 1, 0) WHERE id = $1",
            )
            .bind(event_id.as_uuid())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("event", event_id));
            }
            Ok(())
        })
    }
}

impl TicketStore for PostgresStore {
    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
            sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(ticket_from_row)
                .transpose()
        })
    }

    fn ticket_by_code(
        &self,
        event_id: EventId,
        code: &AttendanceCode,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        let code = code.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE event_id = $1 AND attendance_code = $2"
            );
            sqlx::query(&sql)
                .bind(event_id.as_uuid())
                .bind(code.as_str())
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(ticket_from_row)
                .transpose()
        })
    }

    fn holding_ticket(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE user_id = $1 AND event_id = $2 AND status IN ('pending', 'active') \
                 ORDER BY purchased_at DESC LIMIT 1"
            );
            sqlx::query(&sql)
                .bind(user_id.as_uuid())
                .bind(event_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(ticket_from_row)
                .transpose()
        })
    }

    fn delete_ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM tickets WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn transition_ticket(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE tickets SET status = $1 WHERE id = $2 AND status = $3")
                .bind(to.as_str())
                .bind(id.as_uuid())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn mark_checked_in(&self, id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE tickets SET is_checked_in = TRUE, checked_in_at = $1 \
                 WHERE id = $2 AND status = 'active' AND is_checked_in = FALSE",
            )
            .bind(at)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn expire_pending(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE tickets SET status = 'expired' \
                 WHERE status = 'pending' AND purchased_at < $1 \
                 RETURNING {TICKET_COLUMNS}"
            );
            let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;
            rows.iter().map(ticket_from_row).collect()
        })
    }
}

impl TransactionStore for PostgresStore {
    fn insert_transaction(&self, transaction: Transaction) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO ticket_transactions (id, ticket_id, user_id, external_ref, amount_cents, \
                 status, payment_method, created_at, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(transaction.id.as_uuid())
            .bind(transaction.ticket_id.as_uuid())
            .bind(transaction.user_id.as_uuid())
            .bind(transaction.external_ref.as_str())
            .bind(to_i64(transaction.amount)?)
            .bind(transaction.status.as_str())
            .bind(transaction.payment_method.as_deref())
            .bind(transaction.created_at)
            .bind(transaction.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn transaction_by_ref(
        &self,
        external_ref: &str,
    ) -> BoxFuture<'_, StoreResult<Option<Transaction>>> {
        let external_ref = external_ref.to_owned();
        Box::pin(async move {
            let sql =
                format!("SELECT {TRANSACTION_COLUMNS} FROM ticket_transactions WHERE external_ref = $1");
            sqlx::query(&sql)
                .bind(external_ref.as_str())
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(transaction_from_row)
                .transpose()
        })
    }

    fn complete_transaction_if_pending(
        &self,
        external_ref: &str,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        let external_ref = external_ref.to_owned();
        let completed_at =
            matches!(to, TransactionStatus::Success | TransactionStatus::Refunded).then_some(at);
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE ticket_transactions \
                 SET status = $1, completed_at = COALESCE($2, completed_at) \
                 WHERE external_ref = $3 AND status = 'pending'",
            )
            .bind(to.as_str())
            .bind(completed_at)
            .bind(external_ref.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
    }
}

impl AttendeeStore for PostgresStore {
    fn register_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO event_attendees (event_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT (event_id, user_id) DO NOTHING",
            )
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn remove_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM event_attendees WHERE event_id = $1 AND user_id = $2")
                .bind(event_id.as_uuid())
                .bind(user_id.as_uuid())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn is_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM event_attendees WHERE event_id = $1 AND user_id = $2)",
            )
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
            Ok(row.try_get::<bool, _>(0)?)
        })
    }

    fn increment_attendance(&self, user_id: UserId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let result =
                sqlx::query("UPDATE users SET events_attended = events_attended + 1 WHERE id = $1")
                    .bind(user_id.as_uuid())
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("user", user_id));
            }
            Ok(())
        })
    }
}

impl DirectoryStore for PostgresStore {
    fn event(&self, id: EventId) -> BoxFuture<'_, StoreResult<Option<EventSnapshot>>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, title, host_id, capacity, tickets_sold, price_cents, starts_at \
                 FROM events WHERE id = $1",
            )
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
            row.map(|row| -> StoreResult<EventSnapshot> {
                Ok(EventSnapshot {
                    id: EventId::from_uuid(row.try_get("id")?),
                    title: row.try_get("title")?,
                    host_id: UserId::from_uuid(row.try_get("host_id")?),
                    capacity: to_u32(row.try_get("capacity")?)?,
                    sold: to_u32(row.try_get("tickets_sold")?)?,
                    price: to_money(row.try_get("price_cents")?)?,
                    starts_at: row.try_get("starts_at")?,
                })
            })
            .transpose()
        })
    }

    fn user(&self, id: UserId) -> BoxFuture<'_, StoreResult<Option<UserProfile>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name, email, events_attended FROM users WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            row.map(|row| -> StoreResult<UserProfile> {
                Ok(UserProfile {
                    id: UserId::from_uuid(row.try_get("id")?),
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    events_attended: to_u32(row.try_get("events_attended")?)?,
                })
            })
            .transpose()
        })
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }
}

/// Abandon a reservation attempt. A failed rollback is only logged: the
/// connection discards the open transaction when it returns to the pool.
async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>, event_id: EventId) {
    if let Err(e) = tx.rollback().await {
        debug!(event_id = %event_id, error = %e, "Reservation rollback failed");
    }
}

fn ticket_from_row(row: &PgRow) -> StoreResult<Ticket> {
    let status: String = row.try_get("status")?;
    let code: String = row.try_get("attendance_code")?;
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        price_paid: to_money(row.try_get("price_paid_cents")?)?,
        attendance_code: AttendanceCode::parse(&code)
            .map_err(|e| StoreError::Corrupt(format!("ticket attendance code: {e}")))?,
        status: TicketStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("ticket status {status:?}")))?,
        is_checked_in: row.try_get("is_checked_in")?,
        checked_in_at: row.try_get("checked_in_at")?,
        purchased_at: row.try_get("purchased_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        ticket_id: TicketId::from_uuid(row.try_get::<Uuid, _>("ticket_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        external_ref: row.try_get("external_ref")?,
        amount: to_money(row.try_get("amount_cents")?)?,
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("transaction status {status:?}")))?,
        payment_method: row.try_get("payment_method")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn to_u32(value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative counter {value}")))
}

fn to_money(cents: i64) -> StoreResult<Money> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Corrupt(format!("negative amount {cents}")))
}

fn to_i64(money: Money) -> StoreResult<i64> {
    i64::try_from(money.cents())
        .map_err(|_| StoreError::Corrupt(format!("amount {money} exceeds storage range")))
}
