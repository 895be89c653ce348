//! libSQL backend: durable tickets, execution log and conversation history.
//!
//! Supports local file and in-memory databases. Ticket creation relies on the
//! partial unique index over active `(instance_id, conversation_id)` pairs, so
//! `INSERT OR IGNORE` is the single create-if-absent operation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::executions::model::{AgentExecution, AssignmentStrategy, ExecutionStatus};
use crate::pipeline::types::{HistoryTurn, TurnRole};
use crate::store::migrations;
use crate::store::traits::{ConversationLog, ExecutionLog, TicketStore};
use crate::tickets::model::{
    AgentBinding, AgentKind, AiConfig, Ticket, TicketPriority, TicketStatus,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_ticket(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Option<Ticket>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_ticket(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Serialization(format!("{op}: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const TICKET_COLUMNS: &str = "id, conversation_id, instance_id, status, priority, client_tags, \
     agent_id, agent_kind, agent_name, ai_config, ai_interactions, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, message_id, ticket_id, agent_id, rule_id, strategy, input, \
     output, confidence, tokens_used, execution_time_ms, status, error, created_at";

const ACTIVE_STATUSES: &str = "('open', 'pending', 'in_progress')";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, String> {
    Uuid::parse_str(s).map_err(|e| format!("bad uuid '{s}': {e}"))
}

fn row_to_ticket(row: &libsql::Row) -> Result<Ticket, String> {
    let text = |idx: i32| row.get::<String>(idx).map_err(|e| e.to_string());

    let id = parse_uuid(&text(0)?)?;
    let status_str = text(3)?;
    let status =
        TicketStatus::parse(&status_str).ok_or_else(|| format!("unknown status '{status_str}'"))?;
    let priority = TicketPriority::parse(&text(4)?).unwrap_or_default();
    let client_tags: Vec<String> = serde_json::from_str(&text(5)?).unwrap_or_default();

    let agent_id: Option<String> = row.get(6).ok();
    let agent_kind: Option<String> = row.get(7).ok();
    let agent_name: Option<String> = row.get(8).ok();
    let assigned_agent = match (agent_id, agent_kind.as_deref()) {
        (Some(agent_id), Some(kind)) => Some(AgentBinding {
            agent_id,
            kind: if kind == "human" {
                AgentKind::Human
            } else {
                AgentKind::Ai
            },
            display_name: agent_name.unwrap_or_default(),
        }),
        _ => None,
    };

    let ai_config_str: Option<String> = row.get(9).ok();
    let ai_config = match ai_config_str {
        Some(raw) => Some(serde_json::from_str::<AiConfig>(&raw).map_err(|e| e.to_string())?),
        None => None,
    };

    let ai_interactions: i64 = row.get(10).unwrap_or(0);

    Ok(Ticket {
        id,
        conversation_id: text(1)?,
        instance_id: text(2)?,
        status,
        priority,
        client_tags,
        assigned_agent,
        ai_config,
        ai_interactions: u32::try_from(ai_interactions).unwrap_or(0),
        created_at: parse_datetime(&text(11)?),
        updated_at: parse_datetime(&text(12)?),
    })
}

fn row_to_execution(row: &libsql::Row) -> Result<AgentExecution, String> {
    let text = |idx: i32| row.get::<String>(idx).map_err(|e| e.to_string());

    let strategy_str = text(5)?;
    let status_str = text(11)?;
    let tokens: i64 = row.get(9).unwrap_or(0);
    let elapsed: i64 = row.get(10).unwrap_or(0);

    Ok(AgentExecution {
        id: parse_uuid(&text(0)?)?,
        message_id: text(1)?,
        ticket_id: parse_uuid(&text(2)?)?,
        agent_id: row.get(3).ok(),
        rule_id: row.get(4).ok(),
        strategy: AssignmentStrategy::parse(&strategy_str)
            .ok_or_else(|| format!("unknown strategy '{strategy_str}'"))?,
        input: text(6)?,
        output: text(7)?,
        confidence: row.get(8).unwrap_or(0.0),
        tokens_used: u32::try_from(tokens).unwrap_or(0),
        execution_time_ms: u64::try_from(elapsed).unwrap_or(0),
        status: ExecutionStatus::parse(&status_str)
            .ok_or_else(|| format!("unknown status '{status_str}'"))?,
        error: row.get(12).ok(),
        created_at: parse_datetime(&text(13)?),
    })
}

// ── Tickets ─────────────────────────────────────────────────────────

#[async_trait]
impl TicketStore for LibSqlBackend {
    async fn get_open_ticket_by_conversation(
        &self,
        conversation_id: &str,
        instance_id: &str,
    ) -> Result<Option<Ticket>, DatabaseError> {
        self.query_ticket(
            &format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE conversation_id = ?1 AND instance_id = ?2 AND status IN {ACTIVE_STATUSES}"
            ),
            params![conversation_id, instance_id],
            "get_open_ticket_by_conversation",
        )
        .await
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, DatabaseError> {
        self.query_ticket(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            params![id.to_string()],
            "get_ticket",
        )
        .await
    }

    async fn upsert_ticket(&self, ticket: &Ticket) -> Result<Ticket, DatabaseError> {
        let client_tags = serde_json::to_string(&ticket.client_tags)
            .map_err(|e| DatabaseError::Serialization(format!("client_tags: {e}")))?;
        let ai_config = ticket
            .ai_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("ai_config: {e}")))?;
        let binding = ticket.assigned_agent.as_ref();

        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO tickets (id, conversation_id, instance_id, status, priority,
                    client_tags, agent_id, agent_kind, agent_name, ai_config, ai_interactions,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    ticket.id.to_string(),
                    ticket.conversation_id.as_str(),
                    ticket.instance_id.as_str(),
                    ticket.status.as_str(),
                    ticket.priority.as_str(),
                    client_tags,
                    opt_text(binding.map(|b| b.agent_id.as_str())),
                    opt_text(binding.map(|b| b.kind.as_str())),
                    opt_text(binding.map(|b| b.display_name.as_str())),
                    opt_text(ai_config.as_deref()),
                    i64::from(ticket.ai_interactions),
                    ticket.created_at.to_rfc3339(),
                    ticket.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_ticket: {e}")))?;

        debug!(ticket_id = %ticket.id, inserted = inserted > 0, "Ticket upsert");

        let winner = if ticket.status.is_active() {
            self.get_open_ticket_by_conversation(&ticket.conversation_id, &ticket.instance_id)
                .await?
        } else {
            self.get_ticket(ticket.id).await?
        };
        winner.ok_or_else(|| DatabaseError::NotFound {
            entity: "ticket".into(),
            id: ticket.id.to_string(),
        })
    }

    async fn bind_agent(
        &self,
        ticket_id: Uuid,
        binding: &AgentBinding,
        ai_config: &AiConfig,
    ) -> Result<Option<Ticket>, DatabaseError> {
        let ai_config = serde_json::to_string(ai_config)
            .map_err(|e| DatabaseError::Serialization(format!("ai_config: {e}")))?;

        // The IS NOT guard makes a repeated identical bind a no-op.
        self.conn()
            .execute(
                &format!(
                    "UPDATE tickets
                     SET agent_id = ?2, agent_kind = ?3, agent_name = ?4, ai_config = ?5, updated_at = ?6
                     WHERE id = ?1 AND status IN {ACTIVE_STATUSES}
                       AND (agent_id IS NOT ?2 OR agent_kind IS NOT ?3 OR agent_name IS NOT ?4)"
                ),
                params![
                    ticket_id.to_string(),
                    binding.agent_id.as_str(),
                    binding.kind.as_str(),
                    binding.display_name.as_str(),
                    ai_config,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("bind_agent: {e}")))?;

        // Last writer wins: a concurrent bind of another agent still leaves an
        // active ticket, so only inactive or missing tickets are refused.
        let ticket = self.get_ticket(ticket_id).await?;
        Ok(ticket.filter(|t| t.status.is_active()))
    }

    async fn record_ai_interaction(&self, ticket_id: Uuid) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE tickets SET ai_interactions = ai_interactions + 1, updated_at = ?2 WHERE id = ?1",
                params![ticket_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_ai_interaction: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket_id.to_string(),
            });
        }
        Ok(())
    }

    async fn escalate_to_human(&self, ticket_id: Uuid) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE tickets
                 SET status = 'pending',
                     ai_config = json_set(COALESCE(ai_config, '{}'), '$.auto_response', json('false')),
                     updated_at = ?2
                 WHERE id = ?1",
                params![ticket_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("escalate_to_human: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket_id.to_string(),
            });
        }
        Ok(())
    }
}

// ── Executions ──────────────────────────────────────────────────────

#[async_trait]
impl ExecutionLog for LibSqlBackend {
    async fn append(&self, execution: &AgentExecution) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO agent_executions ({EXECUTION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    execution.id.to_string(),
                    execution.message_id.as_str(),
                    execution.ticket_id.to_string(),
                    opt_text(execution.agent_id.as_deref()),
                    opt_text(execution.rule_id.as_deref()),
                    execution.strategy.as_str(),
                    execution.input.as_str(),
                    execution.output.as_str(),
                    execution.confidence,
                    i64::from(execution.tokens_used),
                    i64::try_from(execution.execution_time_ms).unwrap_or(i64::MAX),
                    execution.status.as_str(),
                    opt_text(execution.error.as_deref()),
                    execution.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Constraint(format!("append execution: {e}")))?;
        Ok(())
    }

    async fn find_by_message(
        &self,
        message_id: &str,
    ) -> Result<Option<AgentExecution>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXECUTION_COLUMNS} FROM agent_executions WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_execution(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Serialization(format!("find_by_message: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_message: {e}"))),
        }
    }
}

// ── Conversation turns ──────────────────────────────────────────────

#[async_trait]
impl ConversationLog for LibSqlBackend {
    async fn append_turn(&self, ticket_id: Uuid, turn: &HistoryTurn) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO conversation_turns (ticket_id, message_id, role, text, at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ticket_id.to_string(),
                    turn.message_id.as_str(),
                    turn.role.as_str(),
                    turn.text.as_str(),
                    turn.at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_turn: {e}")))?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        ticket_id: Uuid,
        limit: usize,
    ) -> Result<Vec<HistoryTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, role, text, at FROM (
                    SELECT seq, message_id, role, text, at FROM conversation_turns
                    WHERE ticket_id = ?1 ORDER BY seq DESC LIMIT ?2
                 ) ORDER BY seq ASC",
                params![ticket_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_turns: {e}")))?;

        let mut turns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let message_id: String = row.get(0).unwrap_or_default();
            let role: String = row.get(1).unwrap_or_default();
            let text: String = row.get(2).unwrap_or_default();
            let at: String = row.get(3).unwrap_or_default();
            turns.push(HistoryTurn {
                message_id,
                role: if role == "agent" {
                    TurnRole::Agent
                } else {
                    TurnRole::Customer
                },
                text,
                at: parse_datetime(&at),
            });
        }
        Ok(turns)
    }
}
