//! Motor del explorador: une el compositor de consultas y las transiciones de
//! anotación con el backend.
//!
//! Flujo de cada intención:
//!   1. Se toma una copia del estado actual (dataset o registro).
//!   2. Se construye el comando (búsqueda o anotación) sin mutar nada.
//!   3. Se despacha al backend y se espera la respuesta.
//!   4. Solo si el backend confirma, se aplica el nuevo estado.
//!
//! Nunca se mantiene el cerrojo durante un `.await`. Cada búsqueda lleva un
//! número de generación; una respuesta más antigua que la ya aplicada se
//! descarta.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::annotation::{self, AnnotationCommand};
use crate::composer::{self, QueryIntent, SearchCommand};
use crate::dispatch::{Dispatcher, SearchResults};
use crate::error::EngineError;
use crate::models::{Dataset, Record, RecordId, ViewMode};

/// Estado confirmado de un dataset abierto.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    pub dataset: Dataset,
    pub total: usize,
    pub records: Vec<Record>,
    #[serde(skip)]
    generation: u64,
}

pub struct Engine {
    dispatcher: Arc<dyn Dispatcher>,
    agent: String,
    views: Mutex<HashMap<String, DatasetView>>,
    generation: AtomicU64,
}

impl Engine {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, agent: impl Into<String>) -> Self {
        Self {
            dispatcher,
            agent: agent.into(),
            views: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn backend_name(&self) -> &str {
        self.dispatcher.name()
    }

    pub fn view(&self, name: &str) -> Result<DatasetView, EngineError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDataset(name.to_string()))
    }

    /// Abre (o reabre) un dataset con la consulta vacía y lanza la primera búsqueda.
    pub async fn open_dataset(
        &self,
        name: &str,
        multi_label: bool,
        view_mode: ViewMode,
    ) -> Result<DatasetView, EngineError> {
        let dataset = Dataset::new(name, multi_label, view_mode);
        let command = composer::apply_sort(&dataset, Vec::new());
        let (generation, results) = self.dispatch_search(&command).await?;
        info!("Dataset '{name}' abierto ({} registros)", results.total);
        Ok(self.commit_search(dataset, generation, results))
    }

    /// Aplica una intención de filtrado/orden y reenvía la consulta completa.
    pub async fn apply(&self, name: &str, intent: QueryIntent) -> Result<DatasetView, EngineError> {
        let snapshot = self.view(name)?.dataset;
        let command = composer::compose(&snapshot, intent);
        self.run_search(command).await
    }

    /// Repite la búsqueda vigente, p. ej. tras registrar datos nuevos.
    pub async fn refresh(&self, name: &str) -> Result<DatasetView, EngineError> {
        let snapshot = self.view(name)?.dataset;
        let command = SearchCommand {
            dataset: snapshot.name.clone(),
            query: snapshot.query,
            sort: snapshot.sort,
        };
        self.run_search(command).await
    }

    pub fn set_view_mode(&self, name: &str, view_mode: ViewMode) -> Result<DatasetView, EngineError> {
        let mut views = self.lock();
        let view = views
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownDataset(name.to_string()))?;
        view.dataset.view_mode = view_mode;
        Ok(view.clone())
    }

    pub async fn validate(
        &self,
        name: &str,
        id: &RecordId,
        labels: &[String],
    ) -> Result<Vec<Record>, EngineError> {
        let (dataset, record) = self.snapshot_record(name, id)?;
        let command = annotation::validate(&dataset, &record, labels, &self.agent)?;
        self.execute(command).await
    }

    pub async fn validate_from_prediction(
        &self,
        name: &str,
        id: &RecordId,
    ) -> Result<Vec<Record>, EngineError> {
        let (dataset, record) = self.snapshot_record(name, id)?;
        let command = annotation::validate_from_prediction(&dataset, &record, &self.agent)?;
        self.execute(command).await
    }

    pub async fn reset(&self, name: &str, id: &RecordId) -> Result<Vec<Record>, EngineError> {
        let (dataset, record) = self.snapshot_record(name, id)?;
        self.execute(annotation::reset(&dataset, &record)).await
    }

    /// Envía registros nuevos al backend y, si el dataset está abierto,
    /// refresca su vista.
    pub async fn log_records(&self, name: &str, records: Vec<Record>) -> Result<usize, EngineError> {
        for record in &records {
            record.check()?;
        }
        let processed = self.dispatcher.log_records(name, &records).await.map_err(|e| {
            error!("Error registrando datos en '{name}': {e}");
            e
        })?;
        info!("{processed} registro(s) enviados a '{name}'");

        let is_open = self.lock().contains_key(name);
        if is_open {
            self.refresh(name).await?;
        }
        Ok(processed)
    }

    /// Borra el dataset en el backend y, tras la confirmación, cierra su vista.
    pub async fn delete_dataset(&self, name: &str) -> Result<(), EngineError> {
        self.dispatcher.delete_dataset(name).await.map_err(|e| {
            error!("Error borrando el dataset '{name}': {e}");
            e
        })?;
        if self.lock().remove(name).is_some() {
            debug!("Vista de '{name}' cerrada");
        }
        info!("Dataset '{name}' borrado");
        Ok(())
    }

    /// Copia un dataset (registros y metadatos), opcionalmente a otro workspace.
    pub async fn copy_dataset(
        &self,
        name: &str,
        name_of_copy: &str,
        workspace: Option<&str>,
    ) -> Result<(), EngineError> {
        self.dispatcher
            .copy_dataset(name, name_of_copy, workspace)
            .await
            .map_err(|e| {
                error!("Error copiando '{name}' en '{name_of_copy}': {e}");
                e
            })?;
        info!("Dataset '{name}' copiado como '{name_of_copy}'");
        Ok(())
    }

    /// Despacha un comando de anotación y, tras la confirmación, sustituye los
    /// registros en la vista.
    pub async fn execute(&self, command: AnnotationCommand) -> Result<Vec<Record>, EngineError> {
        let dataset = command.dataset().to_string();
        let outcome = match &command {
            AnnotationCommand::Validate { dataset, agent, records } => {
                debug!("Validando {} registro(s) en '{dataset}'", records.len());
                self.dispatcher.validate_annotations(dataset, agent, records).await
            }
            AnnotationCommand::Reset { dataset, records } => {
                debug!("Restableciendo {} registro(s) en '{dataset}'", records.len());
                self.dispatcher.reset_annotations(dataset, records).await
            }
        };
        if let Err(e) = outcome {
            error!("El backend '{}' rechazó el cambio en '{dataset}': {e}", self.backend_name());
            return Err(e.into());
        }

        let confirmed = command.into_confirmed();
        if let Some(view) = self.lock().get_mut(&dataset) {
            for record in &confirmed {
                if let Some(slot) = view.records.iter_mut().find(|r| r.id == record.id) {
                    *slot = record.clone();
                }
            }
        }
        Ok(confirmed)
    }

    async fn run_search(&self, command: SearchCommand) -> Result<DatasetView, EngineError> {
        let (generation, results) = self.dispatch_search(&command).await?;
        // La vista puede haber cambiado (modo de vista) mientras se esperaba.
        let mut dataset = self.view(&command.dataset)?.dataset;
        dataset.query = command.query;
        dataset.sort = command.sort;
        Ok(self.commit_search(dataset, generation, results))
    }

    async fn dispatch_search(&self, command: &SearchCommand) -> Result<(u64, SearchResults), EngineError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Búsqueda #{generation} en '{}': {:?}", command.dataset, command.query);

        let results = self
            .dispatcher
            .search(&command.dataset, &command.query, &command.sort)
            .await
            .map_err(|e| {
                error!("Búsqueda #{generation} en '{}' fallida: {e}", command.dataset);
                e
            })?;
        for record in &results.records {
            record.check()?;
        }
        Ok((generation, results))
    }

    fn commit_search(&self, dataset: Dataset, generation: u64, results: SearchResults) -> DatasetView {
        let mut views = self.lock();
        if let Some(current) = views.get(&dataset.name) {
            if current.generation > generation {
                warn!(
                    "Respuesta obsoleta de la búsqueda #{generation} en '{}' descartada (vigente: #{})",
                    dataset.name, current.generation
                );
                return current.clone();
            }
        }

        let view = DatasetView {
            dataset,
            total: results.total,
            records: results.records,
            generation,
        };
        views.insert(view.dataset.name.clone(), view.clone());
        view
    }

    fn snapshot_record(&self, name: &str, id: &RecordId) -> Result<(Dataset, Record), EngineError> {
        let views = self.lock();
        let view = views
            .get(name)
            .ok_or_else(|| EngineError::UnknownDataset(name.to_string()))?;
        // Un id leído de la URL ("7") puede corresponder a un id de texto "7".
        let raw = id.to_string();
        let record = view
            .records
            .iter()
            .find(|r| &r.id == id)
            .or_else(|| view.records.iter().find(|r| r.id.to_string() == raw))
            .cloned()
            .ok_or_else(|| EngineError::UnknownRecord {
                dataset: name.to_string(),
                id: id.clone(),
            })?;
        Ok((view.dataset.clone(), record))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DatasetView>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
