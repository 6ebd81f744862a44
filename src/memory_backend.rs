//! Backend en memoria: aplica la consulta completa sobre registros locales.
//!
//! Se usa por defecto cuando no hay un servidor de anotación configurado y
//! como doble de pruebas del motor.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, SearchResults};
use crate::error::DispatchFailure;
use crate::models::{
    CategoricalField, Query, Record, RecordId, RecordStatus, SortOrder, SortSpec, SortableField,
};

type Datasets = HashMap<String, BTreeMap<RecordId, Record>>;

pub struct MemoryBackend {
    datasets: RwLock<Datasets>,
    page_size: usize,
}

impl MemoryBackend {
    pub fn new(page_size: usize) -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
            page_size,
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Datasets>, DispatchFailure> {
        self.datasets
            .write()
            .map_err(|_| DispatchFailure::Backend("almacén en memoria envenenado".to_string()))
    }

    fn upsert(&self, dataset: &str, records: Vec<Record>) -> Result<usize, DispatchFailure> {
        let mut datasets = self.write()?;
        let store = datasets.entry(dataset.to_string()).or_default();
        let count = records.len();
        for record in records {
            store.insert(record.id.clone(), record);
        }
        Ok(count)
    }
}

#[async_trait]
impl Dispatcher for MemoryBackend {
    fn name(&self) -> &str {
        "memoria"
    }

    async fn search(
        &self,
        dataset: &str,
        query: &Query,
        sort: &[SortSpec],
    ) -> Result<SearchResults, DispatchFailure> {
        let datasets = self
            .datasets
            .read()
            .map_err(|_| DispatchFailure::Backend("almacén en memoria envenenado".to_string()))?;
        let Some(store) = datasets.get(dataset) else {
            debug!("Dataset '{dataset}' vacío en memoria");
            return Ok(SearchResults::default());
        };

        let mut matches: Vec<&Record> = store.values().filter(|r| matches_query(r, query)).collect();
        if !sort.is_empty() {
            matches.sort_by(|a, b| compare(a, b, sort));
        }

        Ok(SearchResults {
            total: matches.len(),
            records: matches.into_iter().take(self.page_size).cloned().collect(),
        })
    }

    async fn validate_annotations(
        &self,
        dataset: &str,
        agent: &str,
        records: &[Record],
    ) -> Result<(), DispatchFailure> {
        let patched = records
            .iter()
            .cloned()
            .map(|mut record| {
                if let Some(annotation) = record.annotation.as_mut() {
                    annotation.agent.get_or_insert_with(|| agent.to_string());
                }
                record.status = RecordStatus::Validated;
                record
            })
            .collect();
        let count = self.upsert(dataset, patched)?;
        info!("{count} registro(s) validados por '{agent}' en '{dataset}'");
        Ok(())
    }

    async fn reset_annotations(&self, dataset: &str, records: &[Record]) -> Result<(), DispatchFailure> {
        let cleared = records
            .iter()
            .cloned()
            .map(|mut record| {
                record.annotation = None;
                record.status = RecordStatus::Default;
                record
            })
            .collect();
        let count = self.upsert(dataset, cleared)?;
        info!("{count} registro(s) restablecidos en '{dataset}'");
        Ok(())
    }

    async fn log_records(&self, dataset: &str, records: &[Record]) -> Result<usize, DispatchFailure> {
        self.upsert(dataset, records.to_vec())
    }

    async fn delete_dataset(&self, dataset: &str) -> Result<(), DispatchFailure> {
        let mut datasets = self.write()?;
        match datasets.remove(dataset) {
            Some(store) => info!("Dataset '{dataset}' borrado ({} registros)", store.len()),
            None => debug!("Dataset '{dataset}' no existía"),
        }
        Ok(())
    }

    async fn copy_dataset(
        &self,
        dataset: &str,
        name_of_copy: &str,
        workspace: Option<&str>,
    ) -> Result<(), DispatchFailure> {
        if let Some(workspace) = workspace {
            debug!("Sin workspaces en memoria; se ignora '{workspace}'");
        }
        let mut datasets = self.write()?;
        if datasets.contains_key(name_of_copy) {
            return Err(DispatchFailure::Backend(format!(
                "el dataset '{name_of_copy}' ya existe"
            )));
        }
        let copy = datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| DispatchFailure::Backend(format!("el dataset '{dataset}' no existe")))?;
        datasets.insert(name_of_copy.to_string(), copy);
        info!("Dataset '{dataset}' copiado como '{name_of_copy}'");
        Ok(())
    }
}

fn matches_query(record: &Record, query: &Query) -> bool {
    if let Some(text) = &query.text {
        let needle = text.to_lowercase();
        let in_text = record.text.to_lowercase().contains(&needle);
        let in_tokens = record.tokens.iter().any(|t| t.to_lowercase().contains(&needle));
        if !in_text && !in_tokens {
            return false;
        }
    }

    for field in CategoricalField::ALL {
        match query.categorical(field) {
            Some(values) if !values.is_empty() => {
                if !field_values(record, field).iter().any(|v| values.contains(v)) {
                    return false;
                }
            }
            _ => {}
        }
    }

    if let Some(range) = &query.score {
        if !record.top_score().is_some_and(|score| range.contains(score)) {
            return false;
        }
    }

    query.metadata.iter().all(|(key, values)| {
        values.is_empty()
            || record
                .metadata
                .get(key)
                .is_some_and(|value| metadata_strings(value).iter().any(|v| values.contains(v)))
    })
}

fn field_values(record: &Record, field: CategoricalField) -> Vec<String> {
    match field {
        CategoricalField::AnnotatedAs => record.annotated_labels(),
        CategoricalField::PredictedAs => record.predicted_labels(),
        CategoricalField::AnnotatedBy => record
            .annotation
            .as_ref()
            .and_then(|a| a.agent.clone())
            .into_iter()
            .collect(),
        CategoricalField::PredictedBy => record
            .prediction
            .as_ref()
            .and_then(|p| p.agent.clone())
            .into_iter()
            .collect(),
        CategoricalField::Status => vec![record.status.as_str().to_string()],
        CategoricalField::Predicted => {
            // "ok" si la predicción coincide con la anotación, "ko" si no.
            if record.annotation.is_none() {
                return Vec::new();
            }
            let mut predicted = record.predicted_labels();
            let mut annotated = record.annotated_labels();
            predicted.sort();
            annotated.sort();
            let verdict = if predicted == annotated { "ok" } else { "ko" };
            vec![verdict.to_string()]
        }
    }
}

fn metadata_strings(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(metadata_strings).collect(),
        other => vec![other.to_string()],
    }
}

fn compare(a: &Record, b: &Record, sort: &[SortSpec]) -> Ordering {
    sort.iter()
        .map(|spec| {
            let ordering = match spec.field {
                SortableField::AnnotatedAs => {
                    a.annotated_labels().first().cmp(&b.annotated_labels().first())
                }
                SortableField::PredictedAs => {
                    a.predicted_labels().first().cmp(&b.predicted_labels().first())
                }
                SortableField::Score => {
                    let sa = a.top_score().unwrap_or(f64::NEG_INFINITY);
                    let sb = b.top_score().unwrap_or(f64::NEG_INFINITY);
                    sa.total_cmp(&sb)
                }
            };
            match spec.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}
