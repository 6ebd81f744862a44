//! Interfaz de despacho hacia el backend de persistencia y búsqueda.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchFailure;
use crate::models::{Query, Record, SortSpec};

/// Página de resultados devuelta por una búsqueda.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Backend al que el motor envía búsquedas y cambios de anotación.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Nombre legible para los logs.
    fn name(&self) -> &str;

    async fn search(
        &self,
        dataset: &str,
        query: &Query,
        sort: &[SortSpec],
    ) -> Result<SearchResults, DispatchFailure>;

    /// Persiste cada registro con su nueva anotación, a nombre de `agent`.
    async fn validate_annotations(
        &self,
        dataset: &str,
        agent: &str,
        records: &[Record],
    ) -> Result<(), DispatchFailure>;

    async fn reset_annotations(&self, dataset: &str, records: &[Record]) -> Result<(), DispatchFailure>;

    /// Ingesta de registros nuevos (o reemplazo por id).
    async fn log_records(&self, dataset: &str, records: &[Record]) -> Result<usize, DispatchFailure>;

    async fn delete_dataset(&self, dataset: &str) -> Result<(), DispatchFailure>;

    /// Copia registros y metadatos en `name_of_copy`; con `workspace`, en ese
    /// workspace.
    async fn copy_dataset(
        &self,
        dataset: &str,
        name_of_copy: &str,
        workspace: Option<&str>,
    ) -> Result<(), DispatchFailure>;
}
