//! SQLite-backed session store.
//!
//! Sessions keep their runs as a JSON column; one row per session.

use super::{
    ComponentKind, EvalRecord, KnowledgeEntry, MetricsRecord, RunMetrics, RunRecord, SessionInfo, SessionRecord,
    SessionSummary, UserMemory,
};
use crate::config::DatabaseSettings;
use crate::error::{Result, TroupeError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Names of the five tables.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub sessions: String,
    pub memory: String,
    pub metrics: String,
    pub evals: String,
    pub knowledge: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self::from_settings(&DatabaseSettings::default())
    }
}

impl TableNames {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            sessions: settings.session_table.clone(),
            memory: settings.memory_table.clone(),
            metrics: settings.metrics_table.clone(),
            evals: settings.eval_table.clone(),
            knowledge: settings.knowledge_table.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        for name in [&self.sessions, &self.memory, &self.metrics, &self.evals, &self.knowledge] {
            let valid = !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit());
            if !valid {
                return Err(TroupeError::Config(format!("Invalid table name: '{}'", name)));
            }
        }
        Ok(())
    }
}

/// Which sessions to list.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub component_id: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

/// SQLite session store. One connection, guarded by a mutex.
pub struct SessionStore {
    conn: Mutex<Connection>,
    tables: TableNames,
}

impl SessionStore {
    /// Open (or create) the database file.
    #[instrument(skip_all)]
    pub fn open(path: &Path, tables: TableNames) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn, tables)?;

        info!("Opened session store at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, TableNames::default())
    }

    fn with_connection(conn: Connection, tables: TableNames) -> Result<Self> {
        tables.validate()?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {sessions} (
                session_id TEXT PRIMARY KEY,
                user_id TEXT,
                component_id TEXT NOT NULL,
                component_kind TEXT NOT NULL,
                summary TEXT,
                runs TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{sessions}_component ON {sessions}(component_id);
            CREATE INDEX IF NOT EXISTS idx_{sessions}_user ON {sessions}(user_id);

            CREATE TABLE IF NOT EXISTS {memory} (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                memory TEXT NOT NULL,
                topics TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{memory}_user ON {memory}(user_id);

            CREATE TABLE IF NOT EXISTS {metrics} (
                date TEXT NOT NULL,
                component_id TEXT NOT NULL,
                runs INTEGER NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                model_calls INTEGER NOT NULL,
                tool_calls INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                PRIMARY KEY (date, component_id)
            );

            CREATE TABLE IF NOT EXISTS {evals} (
                id TEXT PRIMARY KEY,
                component_id TEXT NOT NULL,
                input TEXT NOT NULL,
                expected TEXT NOT NULL,
                output TEXT NOT NULL,
                passed INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {knowledge} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
            sessions = tables.sessions,
            memory = tables.memory,
            metrics = tables.metrics,
            evals = tables.evals,
            knowledge = tables.knowledge,
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            tables,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TroupeError::Storage(format!("Failed to acquire lock: {}", e)))
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    // Sessions

    #[instrument(skip(self))]
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.lock()?;
        self.read_session(&conn, session_id)
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub fn upsert_session(&self, session: &SessionRecord) -> Result<()> {
        let conn = self.lock()?;
        self.write_session(&conn, session)
    }

    fn read_session(&self, conn: &Connection, session_id: &str) -> Result<Option<SessionRecord>> {
        let sql = format!(
            "SELECT session_id, user_id, component_id, component_kind, summary, runs, created_at, updated_at
             FROM {} WHERE session_id = ?1",
            self.tables.sessions
        );
        let row = conn
            .query_row(&sql, params![session_id], read_session_row)
            .optional()?;
        row.map(SessionRow::into_record).transpose()
    }

    fn write_session(&self, conn: &Connection, session: &SessionRecord) -> Result<()> {
        let summary = session.summary.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            &format!(
                r#"
                INSERT OR REPLACE INTO {}
                (session_id, user_id, component_id, component_kind, summary, runs, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                self.tables.sessions
            ),
            params![
                session.session_id,
                session.user_id,
                session.component_id,
                session.component_kind.as_str(),
                summary,
                serde_json::to_string(&session.runs)?,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Saved session {} ({} runs)", session.session_id, session.runs.len());
        Ok(())
    }

    /// Append a run, creating the session on first use.
    ///
    /// The read and the write happen in one transaction under one lock, so
    /// concurrent runs on the same session never overwrite each other.
    pub fn append_run(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        component_id: &str,
        component_kind: ComponentKind,
        run: RunRecord,
    ) -> Result<SessionRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut session = self
            .read_session(&tx, session_id)?
            .unwrap_or_else(|| SessionRecord::new(session_id, user_id, component_id, component_kind));
        if session.user_id.is_none() {
            session.user_id = user_id.map(str::to_string);
        }
        session.runs.push(run);
        session.updated_at = Utc::now();
        self.write_session(&tx, &session)?;
        tx.commit()?;
        Ok(session)
    }

    pub fn set_summary(&self, session_id: &str, summary: &str) -> Result<()> {
        let value = SessionSummary {
            summary: summary.to_string(),
            updated_at: Utc::now(),
        };
        let conn = self.lock()?;
        let updated = conn.execute(
            &format!("UPDATE {} SET summary = ?1 WHERE session_id = ?2", self.tables.sessions),
            params![serde_json::to_string(&value)?, session_id],
        )?;
        if updated == 0 {
            return Err(TroupeError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    /// Sessions newest first.
    #[instrument(skip(self))]
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionInfo>> {
        Ok(self
            .query_sessions(filter)?
            .into_iter()
            .map(|s| SessionInfo {
                run_count: s.top_level_runs().count(),
                session_id: s.session_id,
                user_id: s.user_id,
                component_id: s.component_id,
                component_kind: s.component_kind,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect())
    }

    /// Full session records newest first.
    pub fn query_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            r#"
            SELECT session_id, user_id, component_id, component_kind, summary, runs, created_at, updated_at
            FROM {}
            WHERE (?1 IS NULL OR component_id = ?1) AND (?2 IS NULL OR user_id = ?2)
            ORDER BY updated_at DESC
            LIMIT ?3
            "#,
            self.tables.sessions
        );
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.component_id, filter.user_id, limit], read_session_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_record()?);
        }
        Ok(sessions)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE session_id = ?1", self.tables.sessions),
            params![session_id],
        )?;
        info!("Deleted {} session(s) with id {}", deleted, session_id);
        Ok(deleted > 0)
    }

    // User memories

    pub fn add_memory(&self, user_id: &str, memory: &str, topics: &[String]) -> Result<UserMemory> {
        let record = UserMemory {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            memory: memory.to_string(),
            topics: topics.to_vec(),
            created_at: Utc::now(),
        };
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, user_id, memory, topics, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                self.tables.memory
            ),
            params![
                record.id,
                record.user_id,
                record.memory,
                serde_json::to_string(&record.topics)?,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    /// Memories of a user, oldest first.
    pub fn list_memories(&self, user_id: &str) -> Result<Vec<UserMemory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, user_id, memory, topics, created_at FROM {} WHERE user_id = ?1 ORDER BY created_at",
            self.tables.memory
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            let topics: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(UserMemory {
                id: row.get(0)?,
                user_id: row.get(1)?,
                memory: row.get(2)?,
                topics: serde_json::from_str(&topics).unwrap_or_default(),
                created_at: parse_time(&created_at),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn delete_memory(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", self.tables.memory), params![id])?;
        Ok(deleted > 0)
    }

    // Metrics

    /// Add a run's counters to the component's row for `date`.
    pub fn record_metrics(&self, component_id: &str, date: NaiveDate, metrics: &RunMetrics) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO {table}
                (date, component_id, runs, input_tokens, output_tokens, total_tokens, model_calls, tool_calls, duration_ms)
                VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(date, component_id) DO UPDATE SET
                    runs = runs + 1,
                    input_tokens = input_tokens + excluded.input_tokens,
                    output_tokens = output_tokens + excluded.output_tokens,
                    total_tokens = total_tokens + excluded.total_tokens,
                    model_calls = model_calls + excluded.model_calls,
                    tool_calls = tool_calls + excluded.tool_calls,
                    duration_ms = duration_ms + excluded.duration_ms
                "#,
                table = self.tables.metrics
            ),
            params![
                date.format("%Y-%m-%d").to_string(),
                component_id,
                metrics.input_tokens as i64,
                metrics.output_tokens as i64,
                metrics.total_tokens as i64,
                metrics.model_calls as i64,
                metrics.tool_calls as i64,
                metrics.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    /// Metrics rows newest day first.
    pub fn list_metrics(&self, component_id: Option<&str>) -> Result<Vec<MetricsRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT date, component_id, runs, input_tokens, output_tokens, total_tokens, model_calls, tool_calls, duration_ms
            FROM {}
            WHERE ?1 IS NULL OR component_id = ?1
            ORDER BY date DESC, component_id
            "#,
            self.tables.metrics
        ))?;
        let rows = stmt.query_map(params![component_id], |row| {
            Ok(MetricsRecord {
                date: row.get(0)?,
                component_id: row.get(1)?,
                runs: row.get::<_, i64>(2)? as u64,
                input_tokens: row.get::<_, i64>(3)? as u64,
                output_tokens: row.get::<_, i64>(4)? as u64,
                total_tokens: row.get::<_, i64>(5)? as u64,
                model_calls: row.get::<_, i64>(6)? as u64,
                tool_calls: row.get::<_, i64>(7)? as u64,
                duration_ms: row.get::<_, i64>(8)? as u64,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // Evaluations

    pub fn add_eval(&self, eval: &EvalRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO {}
                (id, component_id, input, expected, output, passed, duration_ms, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                self.tables.evals
            ),
            params![
                eval.id,
                eval.component_id,
                eval.input,
                eval.expected,
                eval.output,
                eval.passed,
                eval.duration_ms as i64,
                eval.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Evaluations newest first.
    pub fn list_evals(&self, component_id: Option<&str>) -> Result<Vec<EvalRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT id, component_id, input, expected, output, passed, duration_ms, created_at
            FROM {}
            WHERE ?1 IS NULL OR component_id = ?1
            ORDER BY created_at DESC
            "#,
            self.tables.evals
        ))?;
        let rows = stmt.query_map(params![component_id], |row| {
            let created_at: String = row.get(7)?;
            Ok(EvalRecord {
                id: row.get(0)?,
                component_id: row.get(1)?,
                input: row.get(2)?,
                expected: row.get(3)?,
                output: row.get(4)?,
                passed: row.get(5)?,
                duration_ms: row.get::<_, i64>(6)? as u64,
                created_at: parse_time(&created_at),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // Knowledge

    /// Add or replace a knowledge entry by name.
    pub fn add_knowledge(&self, name: &str, content: &str) -> Result<KnowledgeEntry> {
        let entry = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, name, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                self.tables.knowledge
            ),
            params![entry.id, entry.name, entry.content, entry.created_at.to_rfc3339()],
        )?;
        info!("Added knowledge entry {} ({} bytes)", entry.name, entry.content.len());
        Ok(entry)
    }

    pub fn list_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, content, created_at FROM {} ORDER BY name",
            self.tables.knowledge
        ))?;
        let rows = stmt.query_map([], read_knowledge_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Remove an entry by id or name.
    pub fn remove_knowledge(&self, id_or_name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1 OR name = ?1", self.tables.knowledge),
            params![id_or_name],
        )?;
        Ok(deleted > 0)
    }

    /// Keyword search ranked by the number of query term occurrences.
    pub fn search_knowledge(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| t.len() > 1)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, KnowledgeEntry)> = self
            .list_knowledge()?
            .into_iter()
            .filter_map(|entry| {
                let haystack = format!("{} {}", entry.name, entry.content).to_lowercase();
                let score: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                (score > 0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, entry)| entry).collect())
    }
}

struct SessionRow {
    session_id: String,
    user_id: Option<String>,
    component_id: String,
    component_kind: String,
    summary: Option<String>,
    runs: String,
    created_at: String,
    updated_at: String,
}

fn read_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        component_id: row.get(2)?,
        component_kind: row.get(3)?,
        summary: row.get(4)?,
        runs: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            component_kind: self.component_kind.parse()?,
            summary: self.summary.as_deref().map(serde_json::from_str).transpose()?,
            runs: serde_json::from_str(&self.runs)?,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            session_id: self.session_id,
            user_id: self.user_id,
            component_id: self.component_id,
        })
    }
}

fn read_knowledge_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let created_at: String = row.get(3)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        created_at: parse_time(&created_at),
    })
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    fn run(component_id: &str, input: &str, answer: &str) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4().to_string(),
            component_id: component_id.to_string(),
            parent_run_id: None,
            input: input.to_string(),
            content: answer.to_string(),
            messages: vec![Message::user(input), Message::assistant(answer)],
            tool_calls: Vec::new(),
            metrics: RunMetrics::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_run_creates_and_extends_session() {
        let store = SessionStore::in_memory().unwrap();
        store
            .append_run("session_1", Some("user_1"), "assistant", ComponentKind::Agent, run("assistant", "hi", "hello"))
            .unwrap();
        let session = store
            .append_run("session_1", Some("user_1"), "assistant", ComponentKind::Agent, run("assistant", "again", "yes"))
            .unwrap();

        assert_eq!(session.runs.len(), 2);
        let loaded = store.get_session("session_1").unwrap().unwrap();
        assert_eq!(loaded.runs.len(), 2);
        assert_eq!(loaded.runs[1].input, "again");
        assert_eq!(loaded.user_id.as_deref(), Some("user_1"));
        assert_eq!(loaded.message_count(), 4);
        assert!(store.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_appends_keep_every_run() {
        let store = SessionStore::in_memory().unwrap();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..50 {
                        let input = format!("{}-{}", worker, i);
                        store
                            .append_run("shared", None, "assistant", ComponentKind::Agent, run("assistant", &input, "ok"))
                            .unwrap();
                    }
                });
            }
        });

        let session = store.get_session("shared").unwrap().unwrap();
        assert_eq!(session.runs.len(), 200);
        assert!(session.runs.iter().any(|r| r.input == "3-49"));
    }

    #[test]
    fn test_list_filter_and_delete_sessions() {
        let store = SessionStore::in_memory().unwrap();
        store
            .append_run("s1", Some("alice"), "writer", ComponentKind::Agent, run("writer", "a", "b"))
            .unwrap();
        store
            .append_run("s2", Some("bob"), "content-team", ComponentKind::Team, run("content-team", "c", "d"))
            .unwrap();

        let all = store.list_sessions(&SessionFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let teams = store
            .list_sessions(&SessionFilter {
                component_id: Some("content-team".to_string()),
                ..SessionFilter::default()
            })
            .unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].component_kind, ComponentKind::Team);

        let limited = store
            .list_sessions(&SessionFilter {
                limit: Some(1),
                ..SessionFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);

        assert!(store.delete_session("s1").unwrap());
        assert!(!store.delete_session("s1").unwrap());
        assert_eq!(store.list_sessions(&SessionFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_summary_round_trip() {
        let store = SessionStore::in_memory().unwrap();
        store
            .append_run("s1", None, "assistant", ComponentKind::Agent, run("assistant", "a", "b"))
            .unwrap();
        store.set_summary("s1", "User greeted the assistant.").unwrap();

        let session = store.get_session("s1").unwrap().unwrap();
        assert_eq!(session.summary.unwrap().summary, "User greeted the assistant.");
        assert!(matches!(store.set_summary("nope", "x"), Err(TroupeError::NotFound(_))));
    }

    #[test]
    fn test_metrics_aggregate_per_day() {
        let store = SessionStore::in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let metrics = RunMetrics {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
            model_calls: 2,
            tool_calls: 1,
            duration_ms: 500,
        };
        store.record_metrics("assistant", day, &metrics).unwrap();
        store.record_metrics("assistant", day, &metrics).unwrap();
        store.record_metrics("writer", day, &metrics).unwrap();

        let rows = store.list_metrics(Some("assistant")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, "2025-01-15");
        assert_eq!(rows[0].runs, 2);
        assert_eq!(rows[0].total_tokens, 240);
        assert_eq!(rows[0].model_calls, 4);
        assert_eq!(store.list_metrics(None).unwrap().len(), 2);
    }

    #[test]
    fn test_memories_and_evals() {
        let store = SessionStore::in_memory().unwrap();
        let memory = store
            .add_memory("alice", "Prefers answers in tables", &["formatting".to_string()])
            .unwrap();
        store.add_memory("bob", "Lives in Oslo", &[]).unwrap();

        let memories = store.list_memories("alice").unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].topics, vec!["formatting"]);
        assert!(store.delete_memory(&memory.id).unwrap());
        assert!(store.list_memories("alice").unwrap().is_empty());

        store
            .add_eval(&EvalRecord {
                id: "eval_1".to_string(),
                component_id: "assistant".to_string(),
                input: "2+2".to_string(),
                expected: "4".to_string(),
                output: "It is 4".to_string(),
                passed: true,
                duration_ms: 12,
                created_at: Utc::now(),
            })
            .unwrap();
        let evals = store.list_evals(Some("assistant")).unwrap();
        assert_eq!(evals.len(), 1);
        assert!(evals[0].passed);
        assert!(store.list_evals(Some("writer")).unwrap().is_empty());
    }

    #[test]
    fn test_knowledge_crud_and_search() {
        let store = SessionStore::in_memory().unwrap();
        store
            .add_knowledge("returns", "Items can be returned within 30 days. Returns need a receipt.")
            .unwrap();
        store.add_knowledge("shipping", "Shipping takes 3-5 business days.").unwrap();

        let hits = store.search_knowledge("How do returns work?", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "returns");
        assert!(store.search_knowledge("?", 5).unwrap().is_empty());

        // Re-adding by name replaces the entry.
        store.add_knowledge("shipping", "Shipping takes 2 days.").unwrap();
        assert_eq!(store.list_knowledge().unwrap().len(), 2);

        assert!(store.remove_knowledge("shipping").unwrap());
        assert_eq!(store.list_knowledge().unwrap().len(), 1);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("troupe.db");
        {
            let store = SessionStore::open(&path, TableNames::default()).unwrap();
            store
                .append_run("s1", None, "assistant", ComponentKind::Agent, run("assistant", "a", "b"))
                .unwrap();
        }
        let store = SessionStore::open(&path, TableNames::default()).unwrap();
        assert!(store.get_session("s1").unwrap().is_some());
    }

    #[test]
    fn test_rejects_unsafe_table_names() {
        let tables = TableNames {
            sessions: "sessions; DROP TABLE x".to_string(),
            ..TableNames::default()
        };
        let conn = Connection::open_in_memory().unwrap();
        assert!(SessionStore::with_connection(conn, tables).is_err());
    }
}
