//! Transiciones de anotación de un registro (validar, restablecer y validar
//! desde la predicción).
//!
//! Las funciones de este módulo no tocan el backend: describen el efecto a
//! realizar con un `AnnotationCommand` que el motor despacha y confirma.

use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::models::{Annotation, ClassScore, Dataset, Record, RecordStatus};

/// Efecto pendiente sobre el backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AnnotationCommand {
    Validate {
        dataset: String,
        agent: String,
        records: Vec<Record>,
    },
    Reset {
        dataset: String,
        records: Vec<Record>,
    },
}

impl AnnotationCommand {
    pub fn dataset(&self) -> &str {
        match self {
            Self::Validate { dataset, .. } | Self::Reset { dataset, .. } => dataset,
        }
    }

    /// Estado de los registros una vez que el backend confirma el comando.
    pub fn into_confirmed(self) -> Vec<Record> {
        match self {
            Self::Validate { records, .. } => records,
            Self::Reset { records, .. } => records
                .into_iter()
                .map(|mut record| {
                    record.annotation = None;
                    record.status = RecordStatus::Default;
                    record
                })
                .collect(),
        }
    }
}

/// Indica si la interfaz debe ofrecer la validación del registro.
pub fn allow_validate(record: &Record, dataset: &Dataset) -> bool {
    record.status != RecordStatus::Validated
        && (record.annotation.is_some() || record.prediction.is_some() || dataset.multi_label)
}

/// Valida el registro con las etiquetas elegidas, todas con puntuación 1.0.
///
/// Las etiquetas repetidas se descartan conservando el primer orden de
/// aparición. Sin etiquetas no se produce comando.
pub fn validate(
    dataset: &Dataset,
    record: &Record,
    labels: &[String],
    agent: &str,
) -> Result<AnnotationCommand, EngineError> {
    let mut classes: Vec<&str> = Vec::with_capacity(labels.len());
    for label in labels {
        if !classes.contains(&label.as_str()) {
            classes.push(label);
        }
    }
    if classes.is_empty() {
        return Err(EngineError::EmptyAnnotation);
    }

    let annotation = Annotation {
        agent: Some(agent.to_string()),
        labels: classes.into_iter().map(ClassScore::human).collect(),
    };
    Ok(validated(dataset, record, annotation, agent))
}

/// Acepta la predicción sin editarla. Una anotación existente se conserva
/// intacta; solo en su ausencia se construye una a partir de `predicted_as`.
pub fn validate_from_prediction(
    dataset: &Dataset,
    record: &Record,
    agent: &str,
) -> Result<AnnotationCommand, EngineError> {
    match &record.annotation {
        Some(existing) if existing.is_empty() => Err(EngineError::EmptyAnnotation),
        Some(existing) => {
            debug!("Registro {} ya anotado, se conserva la anotación", record.id);
            Ok(validated(dataset, record, existing.clone(), agent))
        }
        None => validate(dataset, record, &record.predicted_labels(), agent),
    }
}

/// Devuelve el registro a `Default`, descartando la anotación.
pub fn reset(dataset: &Dataset, record: &Record) -> AnnotationCommand {
    AnnotationCommand::Reset {
        dataset: dataset.name.clone(),
        records: vec![record.clone()],
    }
}

fn validated(
    dataset: &Dataset,
    record: &Record,
    annotation: Annotation,
    agent: &str,
) -> AnnotationCommand {
    let mut patch = record.clone();
    patch.annotation = Some(annotation);
    patch.status = RecordStatus::Validated;
    AnnotationCommand::Validate {
        dataset: dataset.name.clone(),
        agent: agent.to_string(),
        records: vec![patch],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prediction, RecordId, ViewMode};

    fn dataset(multi_label: bool) -> Dataset {
        Dataset::new("sentiment", multi_label, ViewMode::Annotate)
    }

    fn predicted(label: &str, score: f64) -> Record {
        let mut record = Record::new(RecordId::Int(1), "me encanta");
        record.prediction = Some(Prediction {
            agent: Some("model".into()),
            labels: vec![ClassScore { class: label.into(), score }],
        });
        record.predicted_as = vec![label.into()];
        record
    }

    fn patched(cmd: AnnotationCommand) -> Record {
        let mut records = cmd.into_confirmed();
        assert_eq!(records.len(), 1);
        records.remove(0)
    }

    #[test]
    fn allow_validate_follows_status_and_content() {
        let ds = dataset(false);
        let record = predicted("positive", 0.9);
        assert!(allow_validate(&record, &ds));

        let bare = Record::new(RecordId::Int(2), "sin nada");
        assert!(!allow_validate(&bare, &ds));
        assert!(allow_validate(&bare, &dataset(true)));

        let mut done = predicted("positive", 0.9);
        done.annotation = Some(Annotation { agent: None, labels: vec![ClassScore::human("positive")] });
        done.status = RecordStatus::Validated;
        assert!(!allow_validate(&done, &ds));
        assert!(!allow_validate(&done, &dataset(true)));
    }

    #[test]
    fn validate_scores_every_label_at_one() {
        let ds = dataset(true);
        let record = predicted("positive", 0.42);
        let labels = vec!["b".to_string(), "a".to_string(), "b".to_string()];

        let cmd = validate(&ds, &record, &labels, "ana").unwrap();
        assert!(matches!(&cmd, AnnotationCommand::Validate { agent, .. } if agent == "ana"));
        let record = patched(cmd);

        let annotation = record.annotation.unwrap();
        assert_eq!(annotation.classes().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(annotation.labels.iter().all(|l| l.score == 1.0));
        assert_eq!(record.status, RecordStatus::Validated);
        // La predicción no se toca.
        assert_eq!(record.prediction.unwrap().labels[0].score, 0.42);
    }

    #[test]
    fn validate_without_labels_is_rejected() {
        let err = validate(&dataset(false), &predicted("x", 0.5), &[], "ana").unwrap_err();
        assert!(matches!(err, EngineError::EmptyAnnotation));
    }

    #[test]
    fn validate_from_prediction_uses_predicted_labels() {
        let record = predicted("positive", 0.73);
        let cmd = validate_from_prediction(&dataset(false), &record, "ana").unwrap();
        let annotation = patched(cmd).annotation.unwrap();
        assert_eq!(annotation.labels, vec![ClassScore { class: "positive".into(), score: 1.0 }]);
    }

    #[test]
    fn validate_from_prediction_keeps_existing_annotation() {
        let mut record = predicted("positive", 0.73);
        let existing = Annotation {
            agent: Some("luis".into()),
            labels: vec![ClassScore::human("negative")],
        };
        record.annotation = Some(existing.clone());
        record.status = RecordStatus::Edited;

        let cmd = validate_from_prediction(&dataset(false), &record, "ana").unwrap();
        let record = patched(cmd);
        assert_eq!(record.annotation, Some(existing));
        assert_eq!(record.status, RecordStatus::Validated);
    }

    #[test]
    fn validate_from_prediction_without_anything_is_rejected() {
        let record = Record::new(RecordId::Int(3), "vacío");
        let err = validate_from_prediction(&dataset(true), &record, "ana").unwrap_err();
        assert!(matches!(err, EngineError::EmptyAnnotation));
    }

    #[test]
    fn reset_clears_annotation_once_confirmed() {
        let mut record = predicted("positive", 0.9);
        record.annotation = Some(Annotation { agent: None, labels: vec![ClassScore::human("positive")] });
        record.status = RecordStatus::Validated;

        let cmd = reset(&dataset(false), &record);
        assert_eq!(cmd.dataset(), "sentiment");
        match &cmd {
            AnnotationCommand::Reset { records, .. } => assert_eq!(records[0], record),
            other => panic!("comando inesperado: {other:?}"),
        }

        let record = patched(cmd);
        assert_eq!(record.annotation, None);
        assert_eq!(record.status, RecordStatus::Default);
        assert!(record.prediction.is_some());
    }
}
