//! Tipos de error del motor y del despacho al backend.

use thiserror::Error;

use crate::models::RecordId;

/// La llamada al backend fue rechazada o no llegó a completarse.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error("error de transporte: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("el backend respondió {status}: {body}")]
    Status { status: u16, body: String },

    #[error("respuesta del backend ilegible: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchFailure),

    /// Validar sin etiquetas no está soportado: se rechaza antes de despachar.
    #[error("no se puede validar un registro sin etiquetas")]
    EmptyAnnotation,

    #[error("dataset no abierto: {0}")]
    UnknownDataset(String),

    #[error("registro {id} no encontrado en el dataset {dataset}")]
    UnknownRecord { dataset: String, id: RecordId },

    #[error("registro {id} inválido: {reason}")]
    InvalidRecord { id: RecordId, reason: String },
}
