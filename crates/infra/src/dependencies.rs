//! Dependency Resolver: which rows elsewhere reference a target row.
//!
//! Declared foreign keys are authoritative. Schemas without them still get a
//! best-effort answer from column naming (`<singular>_id` / `<table>_id`).
//! Read-only; a row nobody references yields an empty list.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use shopledger_auth::{RequestContext, ensure_owner};
use shopledger_core::Identifier;

use crate::error::{EngineError, EngineResult};
use crate::store::{Filter, Row, Store};

pub const DEFAULT_SAMPLE_LIMIT: usize = 5;

/// Rows of `table.column` that reference the target row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyDescriptor {
    pub table: Identifier,
    pub column: Identifier,
    /// Column of the target row that `column` points at.
    pub referenced_column: Identifier,
    pub count: u64,
    pub samples: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    table: Identifier,
    column: Identifier,
    referenced_column: Identifier,
}

#[derive(Clone)]
pub struct DependencyResolver {
    store: Arc<dyn Store>,
    sample_limit: usize,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit.max(1);
        self
    }

    #[instrument(skip(self, ctx), fields(table = %table, primary_key = %primary_key), err)]
    pub async fn list_dependents(
        &self,
        ctx: &RequestContext,
        table: &Identifier,
        primary_key: &Identifier,
        value: &str,
    ) -> EngineResult<Vec<DependencyDescriptor>> {
        ensure_owner(ctx.actor())?;
        if value.is_empty() {
            return Err(EngineError::validation("primary key value cannot be empty"));
        }

        let columns = self.store.columns(table).await?;
        if !columns.contains(primary_key) {
            return Err(EngineError::validation(format!(
                "table {table} has no column {primary_key}"
            )));
        }

        let candidates = self.candidates(table, primary_key).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Only needed when some reference targets a column other than the key.
        let target = if candidates.iter().any(|c| &c.referenced_column != primary_key) {
            self.store
                .select(table, &Filter::eq(primary_key.clone(), value), Some(1))
                .await?
                .into_iter()
                .next()
        } else {
            None
        };

        let mut found = Vec::new();
        for candidate in candidates {
            let lookup = if &candidate.referenced_column == primary_key {
                JsonValue::String(value.to_string())
            } else {
                match target.as_ref().and_then(|row| row.get(candidate.referenced_column.as_str())) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => continue,
                }
            };

            let filter = Filter::eq(candidate.column.clone(), lookup);
            let count = self.store.count(&candidate.table, &filter).await?;
            if count == 0 {
                continue;
            }
            let samples = self
                .store
                .select(&candidate.table, &filter, Some(self.sample_limit))
                .await?;

            found.push(DependencyDescriptor {
                table: candidate.table,
                column: candidate.column,
                referenced_column: candidate.referenced_column,
                count,
                samples,
            });
        }

        debug!(dependents = found.len(), "dependents resolved");
        Ok(found)
    }

    async fn candidates(&self, table: &Identifier, primary_key: &Identifier) -> EngineResult<Vec<Candidate>> {
        let declared = self.store.foreign_keys_to(table).await?;
        if !declared.is_empty() {
            let mut candidates: Vec<Candidate> = declared
                .into_iter()
                .map(|fk| Candidate {
                    table: fk.table,
                    column: fk.column,
                    referenced_column: fk.referenced_column,
                })
                .collect();
            candidates.dedup();
            return Ok(candidates);
        }

        let names = fallback_column_names(table);
        let mut candidates = Vec::new();
        for other in self.store.tables().await? {
            if &other == table {
                continue;
            }
            let columns = self.store.columns(&other).await?;
            for column in columns.into_iter().filter(|c| names.iter().any(|n| n == c.as_str())) {
                candidates.push(Candidate {
                    table: other.clone(),
                    column,
                    referenced_column: primary_key.clone(),
                });
            }
        }
        Ok(candidates)
    }
}

/// `<singular(table)>_id` and `<table>_id`, deduplicated.
fn fallback_column_names(table: &Identifier) -> Vec<String> {
    let mut names = vec![format!("{}_id", singular(table.as_str())), format!("{table}_id")];
    names.dedup();
    names
}

fn singular(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["ches", "shes", "sses", "xes", "zes"] {
        if table.ends_with(suffix) {
            return table[..table.len() - 2].to_string();
        }
    }
    table.strip_suffix('s').unwrap_or(table).to_string()
}
