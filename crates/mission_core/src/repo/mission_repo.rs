//! Mission and completion repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over `missions`, `mission_categories` and `completes`.
//! - Provide the single batched completion-time query used by the aggregator.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Soft-deleted missions are never returned.
//! - Stored mission status is always a persisted status (`open`, not live).
//! - Read paths reject invalid persisted state instead of masking it.
//! - The repository never opens transactions; callers own transaction scope.

use crate::db::DbError;
use crate::interval::Window;
use crate::model::complete::{Complete, CompleteId, CompleteStatus, UserId};
use crate::model::mission::{Mission, MissionId, MissionStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

const MISSION_SELECT_SQL: &str = "SELECT
    id,
    relate_id,
    type,
    name,
    description,
    profile,
    sort,
    status,
    prerequisites,
    completes,
    section_interval,
    active_interval,
    begin_time,
    end_time
FROM missions";

const COMPLETE_SELECT_SQL: &str = "SELECT
    id,
    uid,
    mission_id,
    status,
    section,
    result,
    ext,
    complete_time
FROM completes";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for mission and completion persistence.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{0}")]
    Db(#[from] DbError),
    #[error("mission not found: {0}")]
    MissionNotFound(MissionId),
    #[error("complete not found: {0}")]
    CompleteNotFound(CompleteId),
    #[error("invalid persisted mission data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Filter and pagination options for listing missions.
#[derive(Debug, Clone, Default)]
pub struct MissionListQuery {
    pub ids: Option<Vec<MissionId>>,
    pub kind: Option<String>,
    /// Persisted status filter; live statuses match `open`.
    pub status: Option<MissionStatus>,
    /// Substring match on name or description.
    pub search: Option<String>,
    /// Every pair must match the mission's correlation tags.
    pub relate_id: BTreeMap<String, String>,
    /// Mission must belong to at least one of these categories.
    pub category_ids: Vec<i64>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Filter options for listing completion records.
#[derive(Debug, Clone, Default)]
pub struct CompleteListQuery {
    pub mission_ids: Vec<MissionId>,
    pub uid: Option<UserId>,
    /// Empty means any status.
    pub statuses: Vec<CompleteStatus>,
    pub window: Window,
    pub exclude_id: Option<CompleteId>,
}

/// Batched completion-time lookup across many missions and windows.
#[derive(Debug, Clone, Default)]
pub struct CompletionTimeQuery {
    /// `None` means all users.
    pub uid: Option<UserId>,
    pub statuses: Vec<CompleteStatus>,
    /// Disjunction of `(mission, window)` constraints.
    pub clauses: Vec<(MissionId, Window)>,
}

/// One row of the batched completion-time lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTime {
    pub mission_id: MissionId,
    pub status: CompleteStatus,
    pub complete_time: DateTime<Utc>,
}

/// Repository interface used by the engine and by rule variants.
pub trait MissionRepository {
    fn create_mission(&self, mission: &Mission) -> RepoResult<MissionId>;
    fn update_mission(&self, mission: &Mission) -> RepoResult<()>;
    fn update_mission_status(&self, id: MissionId, status: MissionStatus) -> RepoResult<()>;
    fn soft_delete_mission(&self, id: MissionId) -> RepoResult<()>;
    fn get_mission(&self, id: MissionId) -> RepoResult<Option<Mission>>;
    fn get_missions(&self, ids: &[MissionId]) -> RepoResult<Vec<Mission>>;
    fn mission_ids_by_type(&self, kind: &str) -> RepoResult<Vec<MissionId>>;
    /// Returns the requested page and the unpaginated total.
    fn list_missions(&self, query: &MissionListQuery) -> RepoResult<(Vec<Mission>, u64)>;
    fn set_mission_categories(&self, id: MissionId, category_ids: &[i64]) -> RepoResult<()>;

    fn create_complete(&self, complete: &Complete) -> RepoResult<CompleteId>;
    fn update_complete(&self, complete: &Complete) -> RepoResult<()>;
    fn get_complete(&self, id: CompleteId) -> RepoResult<Option<Complete>>;
    /// Lists matching completions, newest first.
    fn list_completes(&self, query: &CompleteListQuery) -> RepoResult<Vec<Complete>>;
    fn set_complete_statuses(&self, ids: &[CompleteId], status: CompleteStatus)
        -> RepoResult<usize>;
    /// Runs one query for all clauses; returns nothing when there are none.
    fn completion_times(&self, query: &CompletionTimeQuery) -> RepoResult<Vec<CompletionTime>>;
}

/// SQLite-backed mission repository.
///
/// Works on a plain connection or on an open `Transaction`, which derefs to
/// `Connection`.
pub struct SqliteMissionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMissionRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Underlying connection, for extensions that must write in the same
    /// transaction.
    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }
}

impl MissionRepository for SqliteMissionRepository<'_> {
    fn create_mission(&self, mission: &Mission) -> RepoResult<MissionId> {
        self.conn.execute(
            "INSERT INTO missions (
                relate_id,
                type,
                name,
                description,
                profile,
                sort,
                status,
                prerequisites,
                completes,
                section_interval,
                active_interval,
                begin_time,
                end_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                to_json(&mission.relate_id)?,
                mission.kind.as_str(),
                mission.name.as_str(),
                mission.description.as_str(),
                to_json(&mission.profile)?,
                mission.sort,
                mission.status.as_db_str(),
                to_json(&mission.prerequisites)?,
                to_json(&mission.completes)?,
                mission.section_interval.as_deref(),
                mission.active_interval.as_deref(),
                mission.begin_time.map(to_millis),
                mission.end_time.map(to_millis),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_mission(&self, mission: &Mission) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE missions
             SET
                relate_id = ?1,
                type = ?2,
                name = ?3,
                description = ?4,
                profile = ?5,
                sort = ?6,
                status = ?7,
                prerequisites = ?8,
                completes = ?9,
                section_interval = ?10,
                active_interval = ?11,
                begin_time = ?12,
                end_time = ?13,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?14
               AND is_deleted = 0;",
            params![
                to_json(&mission.relate_id)?,
                mission.kind.as_str(),
                mission.name.as_str(),
                mission.description.as_str(),
                to_json(&mission.profile)?,
                mission.sort,
                mission.status.as_db_str(),
                to_json(&mission.prerequisites)?,
                to_json(&mission.completes)?,
                mission.section_interval.as_deref(),
                mission.active_interval.as_deref(),
                mission.begin_time.map(to_millis),
                mission.end_time.map(to_millis),
                mission.id,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::MissionNotFound(mission.id));
        }
        Ok(())
    }

    fn update_mission_status(&self, id: MissionId, status: MissionStatus) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE missions
             SET status = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND is_deleted = 0;",
            params![id, status.as_db_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::MissionNotFound(id));
        }
        Ok(())
    }

    fn soft_delete_mission(&self, id: MissionId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE missions
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        if changed == 0 {
            return Err(RepoError::MissionNotFound(id));
        }
        Ok(())
    }

    fn get_mission(&self, id: MissionId) -> RepoResult<Option<Mission>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MISSION_SELECT_SQL}
             WHERE id = ?1
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_mission_row(row)?));
        }
        Ok(None)
    }

    fn get_missions(&self, ids: &[MissionId]) -> RepoResult<Vec<Mission>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{MISSION_SELECT_SQL}
             WHERE is_deleted = 0
               AND id IN ({})
             ORDER BY id ASC;",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(ids.iter()))?;
        let mut missions = Vec::with_capacity(ids.len());
        while let Some(row) = rows.next()? {
            missions.push(parse_mission_row(row)?);
        }
        Ok(missions)
    }

    fn mission_ids_by_type(&self, kind: &str) -> RepoResult<Vec<MissionId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM missions
             WHERE type = ?1
               AND is_deleted = 0
             ORDER BY id ASC;",
        )?;
        let ids = stmt
            .query_map([kind], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn list_missions(&self, query: &MissionListQuery) -> RepoResult<(Vec<Mission>, u64)> {
        let mut where_sql = String::from(" WHERE is_deleted = 0");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(ids) = &query.ids {
            if ids.is_empty() {
                return Ok((Vec::new(), 0));
            }
            where_sql.push_str(&format!(" AND id IN ({})", placeholders(ids.len())));
            bind_values.extend(ids.iter().map(|id| Value::Integer(*id)));
        }

        if let Some(kind) = &query.kind {
            where_sql.push_str(" AND type = ?");
            bind_values.push(Value::Text(kind.clone()));
        }

        if let Some(status) = query.status {
            where_sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_db_str().to_string()));
        }

        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{}%", escape_like(search));
                where_sql.push_str(
                    " AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')",
                );
                bind_values.push(Value::Text(pattern.clone()));
                bind_values.push(Value::Text(pattern));
            }
        }

        for (key, value) in &query.relate_id {
            where_sql.push_str(" AND json_extract(relate_id, ?) = ?");
            bind_values.push(Value::Text(format!("$.\"{key}\"")));
            bind_values.push(Value::Text(value.clone()));
        }

        if !query.category_ids.is_empty() {
            where_sql.push_str(&format!(
                " AND id IN (
                    SELECT mission_id
                    FROM mission_categories
                    WHERE category_id IN ({})
                )",
                placeholders(query.category_ids.len())
            ));
            bind_values.extend(query.category_ids.iter().map(|id| Value::Integer(*id)));
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM missions{where_sql};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let mut sql = format!("{MISSION_SELECT_SQL}{where_sql} ORDER BY sort ASC, id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut missions = Vec::new();
        while let Some(row) = rows.next()? {
            missions.push(parse_mission_row(row)?);
        }

        Ok((missions, u64::try_from(total).unwrap_or(0)))
    }

    fn set_mission_categories(&self, id: MissionId, category_ids: &[i64]) -> RepoResult<()> {
        self.conn
            .execute("DELETE FROM mission_categories WHERE mission_id = ?1;", [id])?;
        for category_id in category_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO mission_categories (mission_id, category_id)
                 VALUES (?1, ?2);",
                params![id, category_id],
            )?;
        }
        Ok(())
    }

    fn create_complete(&self, complete: &Complete) -> RepoResult<CompleteId> {
        self.conn.execute(
            "INSERT INTO completes (
                uid,
                mission_id,
                status,
                section,
                result,
                ext,
                complete_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                complete.uid,
                complete.mission_id,
                complete.status.as_db_str(),
                complete.section.as_str(),
                to_json(&complete.result)?,
                to_json(&complete.ext)?,
                to_millis(complete.complete_time),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_complete(&self, complete: &Complete) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE completes
             SET
                status = ?2,
                section = ?3,
                result = ?4,
                ext = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                complete.id,
                complete.status.as_db_str(),
                complete.section.as_str(),
                to_json(&complete.result)?,
                to_json(&complete.ext)?,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::CompleteNotFound(complete.id));
        }
        Ok(())
    }

    fn get_complete(&self, id: CompleteId) -> RepoResult<Option<Complete>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{COMPLETE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_complete_row(row)?));
        }
        Ok(None)
    }

    fn list_completes(&self, query: &CompleteListQuery) -> RepoResult<Vec<Complete>> {
        let mut sql = format!("{COMPLETE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.mission_ids.is_empty() {
            sql.push_str(&format!(
                " AND mission_id IN ({})",
                placeholders(query.mission_ids.len())
            ));
            bind_values.extend(query.mission_ids.iter().map(|id| Value::Integer(*id)));
        }
        if let Some(uid) = query.uid {
            sql.push_str(" AND uid = ?");
            bind_values.push(Value::Integer(uid));
        }
        if !query.statuses.is_empty() {
            sql.push_str(&format!(
                " AND status IN ({})",
                placeholders(query.statuses.len())
            ));
            bind_values.extend(
                query
                    .statuses
                    .iter()
                    .map(|status| Value::Text(status.as_db_str().to_string())),
            );
        }
        push_window_sql(&mut sql, &mut bind_values, &query.window);
        if let Some(exclude_id) = query.exclude_id {
            sql.push_str(" AND id <> ?");
            bind_values.push(Value::Integer(exclude_id));
        }
        sql.push_str(" ORDER BY complete_time DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut completes = Vec::new();
        while let Some(row) = rows.next()? {
            completes.push(parse_complete_row(row)?);
        }
        Ok(completes)
    }

    fn set_complete_statuses(
        &self,
        ids: &[CompleteId],
        status: CompleteStatus,
    ) -> RepoResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE completes
             SET status = ?,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id IN ({});",
            placeholders(ids.len())
        );
        let mut bind_values = vec![Value::Text(status.as_db_str().to_string())];
        bind_values.extend(ids.iter().map(|id| Value::Integer(*id)));
        Ok(self.conn.execute(&sql, params_from_iter(bind_values))?)
    }

    fn completion_times(&self, query: &CompletionTimeQuery) -> RepoResult<Vec<CompletionTime>> {
        if query.clauses.is_empty() || query.statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT mission_id, status, complete_time
             FROM completes
             WHERE status IN ({})",
            placeholders(query.statuses.len())
        );
        let mut bind_values: Vec<Value> = query
            .statuses
            .iter()
            .map(|status| Value::Text(status.as_db_str().to_string()))
            .collect();

        if let Some(uid) = query.uid {
            sql.push_str(" AND uid = ?");
            bind_values.push(Value::Integer(uid));
        }

        let mut disjunction = Vec::with_capacity(query.clauses.len());
        for (mission_id, window) in &query.clauses {
            let mut clause = String::from("(mission_id = ?");
            bind_values.push(Value::Integer(*mission_id));
            push_window_sql(&mut clause, &mut bind_values, window);
            clause.push(')');
            disjunction.push(clause);
        }
        sql.push_str(&format!(" AND ({})", disjunction.join(" OR ")));
        sql.push_str(" ORDER BY complete_time ASC, id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut times = Vec::new();
        while let Some(row) = rows.next()? {
            let status_text: String = row.get(1)?;
            times.push(CompletionTime {
                mission_id: row.get(0)?,
                status: parse_complete_status(&status_text)?,
                complete_time: from_millis(row.get(2)?, "completes.complete_time")?,
            });
        }
        Ok(times)
    }
}

/// Looks up a mission, turning absence into `MissionNotFound`.
pub fn require_mission(repo: &dyn MissionRepository, id: MissionId) -> RepoResult<Mission> {
    repo.get_mission(id)?.ok_or(RepoError::MissionNotFound(id))
}

/// Looks up a completion, turning absence into `CompleteNotFound`.
pub fn require_complete(repo: &dyn MissionRepository, id: CompleteId) -> RepoResult<Complete> {
    repo.get_complete(id)?.ok_or(RepoError::CompleteNotFound(id))
}

fn push_window_sql(sql: &mut String, bind_values: &mut Vec<Value>, window: &Window) {
    if let Some(start) = window.start {
        sql.push_str(" AND complete_time >= ?");
        bind_values.push(Value::Integer(to_millis(start)));
    }
    if let Some(end) = window.end {
        sql.push_str(" AND complete_time < ?");
        bind_values.push(Value::Integer(to_millis(end)));
    }
}

fn parse_mission_row(row: &Row<'_>) -> RepoResult<Mission> {
    let status_text: String = row.get("status")?;
    let status = MissionStatus::from_db_str(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in missions.status"))
    })?;

    Ok(Mission {
        id: row.get("id")?,
        relate_id: from_json(row, "relate_id")?,
        kind: row.get("type")?,
        name: row.get("name")?,
        description: row.get("description")?,
        profile: from_json(row, "profile")?,
        sort: row.get("sort")?,
        status,
        prerequisites: from_json(row, "prerequisites")?,
        completes: from_json(row, "completes")?,
        section_interval: row.get("section_interval")?,
        active_interval: row.get("active_interval")?,
        begin_time: row
            .get::<_, Option<i64>>("begin_time")?
            .map(|value| from_millis(value, "missions.begin_time"))
            .transpose()?,
        end_time: row
            .get::<_, Option<i64>>("end_time")?
            .map(|value| from_millis(value, "missions.end_time"))
            .transpose()?,
        quota: None,
        complete_count: None,
    })
}

fn parse_complete_row(row: &Row<'_>) -> RepoResult<Complete> {
    let status_text: String = row.get("status")?;
    Ok(Complete {
        id: row.get("id")?,
        uid: row.get("uid")?,
        mission_id: row.get("mission_id")?,
        status: parse_complete_status(&status_text)?,
        section: row.get("section")?,
        result: from_json(row, "result")?,
        ext: from_json(row, "ext")?,
        complete_time: from_millis(row.get("complete_time")?, "completes.complete_time")?,
    })
}

fn parse_complete_status(value: &str) -> RepoResult<CompleteStatus> {
    CompleteStatus::from_db_str(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{value}` in completes.status"))
    })
}

fn from_json<T: DeserializeOwned>(row: &Row<'_>, column: &'static str) -> RepoResult<T> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode json: {err}")))
}

pub(crate) fn to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn from_millis(value: i64, column: &'static str) -> RepoResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid timestamp `{value}` in {column}"))
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
