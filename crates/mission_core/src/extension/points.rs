//! Points award completion, registered by hosts that run a points ledger.
//!
//! # Responsibility
//! - Define the ledger collaborator contract.
//! - Provide a `points` completion variant that credits the ledger inside
//!   the completion's transaction and revokes the entry on revert.
//!
//! # Invariants
//! - Ledger writes use the connection of the enclosing transaction.
//! - One completion creates at most one ledger entry.

use crate::engine::executor::ExecContext;
use crate::error::MissionResult;
use crate::model::complete::{Complete, CompleteId, UserId};
use crate::model::mission::Mission;
use crate::repo::mission_repo::{RepoError, RepoResult};
use crate::rules::completions::{ext_i64, invalid_config};
use crate::rules::registry::{RegistryError, RuleRegistry};
use crate::rules::{decode_config, Completion, Flow};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub const TAG: &str = "points";

const ENTRY_KEY: &str = "entryID";

/// One credit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsAward {
    pub uid: UserId,
    pub amount: i64,
    pub reason: String,
    pub complete_id: CompleteId,
}

/// Points ledger collaborator.
pub trait PointsLedger: Send + Sync {
    /// Records a credit and returns its entry id.
    fn award(&self, conn: &Connection, award: &PointsAward) -> RepoResult<i64>;
    /// Marks an entry revoked. Revoking twice is a no-op.
    fn revoke(&self, conn: &Connection, entry_id: i64) -> RepoResult<()>;
    /// Sum of non-revoked entries for `uid`.
    fn balance(&self, conn: &Connection, uid: UserId) -> RepoResult<i64>;
}

/// Ledger stored in the `points_ledger` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlitePointsLedger;

impl PointsLedger for SqlitePointsLedger {
    fn award(&self, conn: &Connection, award: &PointsAward) -> RepoResult<i64> {
        conn.execute(
            "INSERT INTO points_ledger (uid, amount, reason, complete_id)
             VALUES (?1, ?2, ?3, ?4);",
            params![award.uid, award.amount, award.reason, award.complete_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn revoke(&self, conn: &Connection, entry_id: i64) -> RepoResult<()> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM points_ledger WHERE id = ?1;",
                [entry_id],
                |row| row.get(0),
            )
            .optional()?;
        if found.is_none() {
            return Err(RepoError::InvalidData(format!(
                "points ledger entry {entry_id} does not exist"
            )));
        }
        conn.execute(
            "UPDATE points_ledger SET is_revoked = 1 WHERE id = ?1;",
            [entry_id],
        )?;
        Ok(())
    }

    fn balance(&self, conn: &Connection, uid: UserId) -> RepoResult<i64> {
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0)
             FROM points_ledger
             WHERE uid = ?1
               AND is_revoked = 0;",
            [uid],
            |row| row.get(0),
        )?)
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    amount: i64,
}

pub struct PointsAwardRule {
    id: String,
    pub amount: i64,
    ledger: Arc<dyn PointsLedger>,
}

impl Debug for PointsAwardRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointsAwardRule")
            .field("id", &self.id)
            .field("amount", &self.amount)
            .finish()
    }
}

impl PointsAwardRule {
    pub fn from_raw(
        id: String,
        raw: &Value,
        ledger: Arc<dyn PointsLedger>,
    ) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        if config.amount <= 0 {
            return Err(invalid_config(TAG, "amount must be positive"));
        }
        Ok(Self {
            id,
            amount: config.amount,
            ledger,
        })
    }
}

impl Completion for PointsAwardRule {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if ext_i64(complete, &self.id, ENTRY_KEY).is_some() {
            return Ok(Flow::Continue);
        }
        let entry_id = self.ledger.award(
            ctx.connection(),
            &PointsAward {
                uid: complete.uid,
                amount: self.amount,
                reason: format!("mission:{}", mission.id),
                complete_id: complete.id,
            },
        )?;
        complete.set_ext(&self.id, ENTRY_KEY, Value::from(entry_id));
        complete
            .result
            .insert(self.id.clone(), Value::from(self.amount));
        Ok(Flow::Continue)
    }

    fn revert(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if let Some(entry_id) = ext_i64(complete, &self.id, ENTRY_KEY) {
            self.ledger.revoke(ctx.connection(), entry_id)?;
        }
        Ok(Flow::Continue)
    }
}

/// Adds the `points` completion variant backed by `ledger`.
pub fn register_points_award(
    registry: &mut RuleRegistry,
    ledger: Arc<dyn PointsLedger>,
) -> Result<(), RegistryError> {
    registry.register_completion(TAG, move |id, raw| {
        Ok(Box::new(PointsAwardRule::from_raw(
            id,
            raw,
            Arc::clone(&ledger),
        )?))
    })
}
