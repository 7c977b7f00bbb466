// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Graph projection: sessions, agents, conversations and learning records
//! as Neo4j nodes, written through the HTTP transaction endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::consumer::{ConsumedEvent, EventSink};
use super::event::ConversationTurn;
use crate::error::SinkError;

/// Uniqueness constraints, one per node label.
pub const CONSTRAINTS: &[(&str, &str)] = &[
    ("Session", "id"),
    ("Agent", "id"),
    ("Conversation", "id"),
    ("Action", "action_id"),
    ("Decision", "decision_id"),
    ("Outcome", "outcome_id"),
];

/// One Cypher statement with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub statement: String,
    pub parameters: Value,
}

impl Statement {
    fn new(statement: &str, parameters: Value) -> Self {
        Self {
            statement: statement.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

const MERGE_TURN: &str = "\
MERGE (s:Session {id: $session_id})
  ON CREATE SET s.created_at = $timestamp
SET s.last_seen = $timestamp
MERGE (a:Agent {id: $agent_id})
MERGE (c:Conversation {id: $conversation_id})
SET c.turn_count = $turn_count, c.timestamp = $timestamp,
    c.user = $user, c.assistant = $assistant
MERGE (s)-[:HAS_CONVERSATION]->(c)
MERGE (a)-[:PARTICIPATED_IN]->(s)
MERGE (a)-[:INTERACTED_WITH]->(c)";

const MERGE_ACTION: &str = "\
MATCH (c:Conversation {id: $conversation_id})
MERGE (x:Action {action_id: $action_id})
SET x.type = $kind, x.tool = $tool, x.success = $success, x.error = $error,
    x.parameters = $parameters, x.result = $result, x.timestamp = $timestamp
MERGE (c)-[:CONTAINS]->(x)";

const MERGE_DECISION: &str = "\
MATCH (c:Conversation {id: $conversation_id})
MERGE (d:Decision {decision_id: $decision_id})
SET d.type = $kind, d.chosen = $chosen, d.reasoning = $reasoning,
    d.confidence = $confidence, d.options = $options, d.timestamp = $timestamp
MERGE (c)-[:CONTAINS]->(d)";

const MERGE_OUTCOME: &str = "\
MATCH (c:Conversation {id: $conversation_id})
MERGE (o:Outcome {outcome_id: $outcome_id})
SET o.success = $success, o.impact = $impact, o.error = $error, o.timestamp = $timestamp
MERGE (c)-[:CONTAINS]->(o)
WITH o
OPTIONAL MATCH (d:Decision {decision_id: $decision_id})
FOREACH (_ IN CASE WHEN d IS NULL THEN [] ELSE [1] END | MERGE (d)-[:LEADS_TO]->(o))";

const LINK_ACTIONS: &str = "\
MATCH (a:Action {action_id: $from}), (b:Action {action_id: $to})
MERGE (a)-[:FOLLOWED_BY]->(b)";

fn action_id(session: &str, index: usize) -> String {
    format!("{}_action_{}", session, index)
}

/// Statements projecting one turn. All are MERGEs, so replays are no-ops.
pub fn statements_for(turn: &ConversationTurn) -> Vec<Statement> {
    let agent_id = if turn.agent_id.is_empty() {
        "unknown"
    } else {
        turn.agent_id.as_str()
    };
    let conversation_id = turn.conversation_id();
    let mut statements = vec![Statement::new(
        MERGE_TURN,
        json!({
            "session_id": turn.session_id,
            "agent_id": agent_id,
            "conversation_id": conversation_id,
            "turn_count": turn.turn_count,
            "timestamp": turn.timestamp,
            "user": turn.user,
            "assistant": turn.assistant,
        }),
    )];

    for (i, action) in turn.agent_actions.iter().enumerate() {
        statements.push(Statement::new(
            MERGE_ACTION,
            json!({
                "conversation_id": conversation_id,
                "action_id": action_id(&turn.session_id, i),
                "kind": action.kind,
                "tool": action.tool,
                "success": action.success,
                "error": action.error,
                // Maps are not valid property values.
                "parameters": action.parameters.to_string(),
                "result": action.result.to_string(),
                "timestamp": turn.timestamp,
            }),
        ));
        if i > 0 {
            statements.push(Statement::new(
                LINK_ACTIONS,
                json!({
                    "from": action_id(&turn.session_id, i - 1),
                    "to": action_id(&turn.session_id, i),
                }),
            ));
        }
    }

    for (i, decision) in turn.decisions.iter().enumerate() {
        statements.push(Statement::new(
            MERGE_DECISION,
            json!({
                "conversation_id": conversation_id,
                "decision_id": turn.decision_id(i),
                "kind": decision.kind,
                "chosen": decision.chosen,
                "reasoning": decision.reasoning,
                "confidence": decision.confidence,
                "options": decision.options,
                "timestamp": turn.timestamp,
            }),
        ));
    }

    for (i, outcome) in turn.outcomes.iter().enumerate() {
        statements.push(Statement::new(
            MERGE_OUTCOME,
            json!({
                "conversation_id": conversation_id,
                "outcome_id": format!("{}_outcome_{}", turn.session_id, i),
                "decision_id": outcome.decision_id,
                "success": outcome.success,
                "impact": outcome.impact,
                "error": outcome.error,
                "timestamp": turn.timestamp,
            }),
        ));
    }

    statements
}

/// Constraint statements for [`CONSTRAINTS`].
pub fn constraint_statements() -> Vec<Statement> {
    CONSTRAINTS
        .iter()
        .map(|(label, key)| {
            let name = format!("{}_{}_unique", label.to_lowercase(), key);
            Statement::new(
                &format!(
                    "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                    name, label, key
                ),
                json!({}),
            )
        })
        .collect()
}

/// Neo4j HTTP sink.
pub struct Neo4jSink {
    client: Client,
    commit_url: String,
    user: String,
    password: String,
    constraints_ready: AtomicBool,
}

impl Neo4jSink {
    pub fn new(base_url: &str, user: &str, password: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            commit_url: format!("{}/db/neo4j/tx/commit", base_url.trim_end_matches('/')),
            user: user.to_string(),
            password: password.to_string(),
            constraints_ready: AtomicBool::new(false),
        })
    }

    /// Run statements in one auto-committed transaction.
    pub async fn commit(&self, statements: &[Statement]) -> Result<(), SinkError> {
        if statements.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.commit_url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::http(status.as_u16(), response.text().await.unwrap_or_default()));
        }
        let body: TxResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Decode(e.to_string()))?;
        match body.errors.first() {
            Some(err) => Err(SinkError::Rejected(format!("{}: {}", err.code, err.message))),
            None => Ok(()),
        }
    }

    async fn ensure_constraints(&self) -> Result<(), SinkError> {
        if self.constraints_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.commit(&constraint_statements()).await?;
        self.constraints_ready.store(true, Ordering::Release);
        info!("Graph constraints in place");
        Ok(())
    }
}

#[async_trait]
impl EventSink for Neo4jSink {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn store(&self, batch: &[ConsumedEvent]) -> Result<(), SinkError> {
        self.ensure_constraints().await?;
        let statements: Vec<Statement> = batch.iter().flat_map(|e| statements_for(&e.turn)).collect();
        debug!("Committing {} statements for {} events", statements.len(), batch.len());
        self.commit(&statements).await
    }
}
