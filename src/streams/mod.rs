// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Stream fan-out consumers.
//!
//! Each projection is a [`StreamConsumer`] in its own consumer group on
//! `<project>:semantic:conversations`, feeding one [`EventSink`]:
//!
//! | Consumer   | Group                  | Start | Batch       |
//! |------------|------------------------|-------|-------------|
//! | vector     | `weaviate-consumers`   | `0`   | 1           |
//! | graph      | `neo4j-consumers`      | `0`   | 1           |
//! | cold       | `clickhouse-consumers` | `$`   | 100 / 30 s  |
//!
//! Delivery is at-least-once per group; every sink writes idempotently.

mod cold;
mod consumer;
mod event;
mod graph;
mod vector;

pub use cold::{normalize_timestamp, rows_body, ClickHouseSink, StackRequest, CREATE_TABLE, DEFAULT_STARTUP_WAIT};
pub use consumer::{consumer_name, ConsumedEvent, ConsumerSettings, ConsumerStats, EventSink, StreamConsumer};
pub use event::{parse_turn, AgentAction, ConversationTurn, Decision, Outcome};
pub use graph::{constraint_statements, statements_for, Neo4jSink, Statement, CONSTRAINTS};
pub use vector::{conversation_object, conversation_schema, WeaviateSink};

use std::sync::Arc;
use std::time::Duration;

use crate::bus::{keys, SharedBus, StartId};
use crate::config::FabricConfig;
use crate::error::SinkError;

pub const VECTOR_GROUP: &str = "weaviate-consumers";
pub const GRAPH_GROUP: &str = "neo4j-consumers";
pub const COLD_GROUP: &str = "clickhouse-consumers";

/// Cold sink buffering.
pub const COLD_BATCH_SIZE: usize = 100;
pub const COLD_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Which projection to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Vector,
    Graph,
    Cold,
}

impl Projection {
    pub fn group(self) -> &'static str {
        match self {
            Self::Vector => VECTOR_GROUP,
            Self::Graph => GRAPH_GROUP,
            Self::Cold => COLD_GROUP,
        }
    }

    /// Cold storage only sees new traffic; the others backfill.
    pub fn start(self) -> StartId {
        match self {
            Self::Vector | Self::Graph => StartId::Beginning,
            Self::Cold => StartId::Tail,
        }
    }

    fn consumer_prefix(self) -> &'static str {
        match self {
            Self::Vector => "weaviate",
            Self::Graph => "neo4j",
            Self::Cold => "clickhouse",
        }
    }

    /// Settings for this projection in `project`.
    pub fn settings(self, project: &str) -> ConsumerSettings {
        let settings = ConsumerSettings::new(
            keys::semantic_conversations_stream(project),
            self.group(),
            self.consumer_prefix(),
            self.start(),
        );
        match self {
            Self::Cold => settings.with_batch(COLD_BATCH_SIZE, COLD_BATCH_TIMEOUT),
            Self::Vector | Self::Graph => settings,
        }
    }
}

/// Build the consumer for a projection from resolved configuration.
pub fn build_consumer(
    projection: Projection,
    bus: SharedBus,
    config: &FabricConfig,
) -> Result<StreamConsumer, SinkError> {
    let stores = &config.stores;
    let sink: Arc<dyn EventSink> = match projection {
        Projection::Vector => Arc::new(WeaviateSink::new(&stores.weaviate_url, stores.timeout())?),
        Projection::Graph => Arc::new(Neo4jSink::new(
            &stores.neo4j_url,
            &stores.neo4j_user,
            &stores.neo4j_password,
            stores.timeout(),
        )?),
        Projection::Cold => Arc::new(ClickHouseSink::new(
            &stores.clickhouse_url,
            stores.timeout(),
            Arc::clone(&bus),
        )?),
    };
    Ok(StreamConsumer::new(bus, sink, projection.settings(&config.project)))
}
