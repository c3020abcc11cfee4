// SPDX-License-Identifier: PMPL-1.0-or-later
//! Inventory fixtures for offline rule evaluation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use devgroup_engine::{EngineConfig, GroupEngine, RelationSchema, Row};
use devgroup_storage::InMemoryBackend;
use serde::Deserialize;
use tracing::debug;

/// Relation schemas and their rows, as read from a JSON file.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    /// Overrides the environment-derived engine configuration.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    pub relations: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rows: BTreeMap<String, Vec<Row>>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build an in-memory engine holding every relation and row.
    pub async fn into_engine(self) -> Result<GroupEngine<InMemoryBackend>> {
        let config = match self.config {
            Some(config) => config,
            None => EngineConfig::from_env()?,
        };
        let engine = GroupEngine::new(InMemoryBackend::new(), config)?;
        let store = engine.relations();

        for (name, columns) in self.relations {
            store
                .define_relation(RelationSchema::new(name.as_str(), columns))
                .await
                .with_context(|| format!("defining relation {name}"))?;
        }
        for (relation, rows) in self.rows {
            let count = rows.len();
            for row in rows {
                store
                    .insert_row(&relation, row)
                    .await
                    .with_context(|| format!("loading a row into {relation}"))?;
            }
            debug!(relation = %relation, rows = count, "Fixture rows loaded");
        }
        Ok(engine)
    }
}
