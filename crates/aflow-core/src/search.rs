//! Hybrid (vector + full-text) search over catalog records.
//!
//! Each record gets two raw scores: cosine similarity between the query and
//! record embeddings, and the fraction of query terms that occur in the
//! record's name and description. Each list is divided by its own maximum and
//! a record's final score is the larger of its two normalized scores.
//!
//! Hits carry relationship context: tasks using a tool, workflows containing
//! a task. Task and workflow records come back with their steps hydrated.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::BoxFuture;
use crate::embedding::hashing::tokens;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::AflowError;
use crate::registry::Catalog;
use crate::store::{Record, RecordKind, Relation};

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: Record,
    pub score: f32,
    /// Tasks using a tool hit, or workflows containing a task hit.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<String>,
}

/// Ranked retrieval over one record kind.
pub trait HybridSearch: Send + Sync {
    fn hybrid_search<'a>(
        &'a self,
        query: &'a str,
        kind: RecordKind,
        top_k: usize,
    ) -> BoxFuture<'a, Result<Vec<SearchHit>, AflowError>>;
}

/// [`HybridSearch`] computed in-process over the catalog's store.
pub struct StoreSearch {
    catalog: Arc<Catalog>,
    embedder: Arc<dyn Embedder>,
}

impl StoreSearch {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let embedder = Arc::clone(catalog.embedder());
        Self { catalog, embedder }
    }

    async fn records(&self, kind: RecordKind) -> Result<Vec<Record>, AflowError> {
        Ok(match kind {
            RecordKind::Tool => self
                .catalog
                .list_tools()
                .await?
                .into_iter()
                .map(Record::Tool)
                .collect(),
            RecordKind::Task => self
                .catalog
                .list_tasks()
                .await?
                .into_iter()
                .map(Record::Task)
                .collect(),
            RecordKind::Workflow => self
                .catalog
                .list_workflows()
                .await?
                .into_iter()
                .map(Record::Workflow)
                .collect(),
        })
    }

    async fn referenced_by(&self, record: &Record) -> Result<Vec<String>, AflowError> {
        match record {
            Record::Tool(tool) => {
                self.catalog
                    .referrers(RecordKind::Tool, &tool.name, Relation::Uses)
                    .await
            }
            Record::Task(task) => {
                self.catalog
                    .referrers(RecordKind::Task, &task.name, Relation::Contains)
                    .await
            }
            Record::Workflow(_) => Ok(Vec::new()),
        }
    }
}

impl HybridSearch for StoreSearch {
    fn hybrid_search<'a>(
        &'a self,
        query: &'a str,
        kind: RecordKind,
        top_k: usize,
    ) -> BoxFuture<'a, Result<Vec<SearchHit>, AflowError>> {
        Box::pin(async move {
            if top_k == 0 || query.trim().is_empty() {
                return Ok(Vec::new());
            }
            let query_vector = self.embedder.embed(query).await?;
            let records = self.records(kind).await?;

            let vector: Vec<f32> = records
                .iter()
                .map(|r| cosine_similarity(&query_vector, r.embedding()).max(0.0))
                .collect();
            let text: Vec<f32> = records.iter().map(|r| term_score(query, r)).collect();
            let scores = combine(&vector, &text);

            let mut ranked: Vec<(f32, Record)> = scores
                .into_iter()
                .zip(records)
                .filter(|(score, _)| *score > 0.0)
                .collect();
            ranked.sort_by(|a, b| {
                b.0.total_cmp(&a.0)
                    .then_with(|| a.1.name().cmp(b.1.name()))
            });
            ranked.truncate(top_k);

            let mut hits = Vec::with_capacity(ranked.len());
            for (score, record) in ranked {
                let referenced_by = self.referenced_by(&record).await?;
                hits.push(SearchHit {
                    record,
                    score,
                    referenced_by,
                });
            }
            Ok(hits)
        })
    }
}

/// Fraction of distinct query terms present in the record's name and description.
fn term_score(query: &str, record: &Record) -> f32 {
    let terms: BTreeSet<String> = tokens(query).collect();
    if terms.is_empty() {
        return 0.0;
    }
    let haystack: BTreeSet<String> = tokens(record.name())
        .chain(tokens(record.description()))
        .collect();
    let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
    matched as f32 / terms.len() as f32
}

/// Max-normalize each score list and take the element-wise maximum.
fn combine(vector: &[f32], text: &[f32]) -> Vec<f32> {
    let normalize = |scores: &[f32]| -> Vec<f32> {
        let max = scores.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            scores.iter().map(|s| s / max).collect()
        } else {
            vec![0.0; scores.len()]
        }
    };
    normalize(vector)
        .into_iter()
        .zip(normalize(text))
        .map(|(v, t)| v.max(t))
        .collect()
}
