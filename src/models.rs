//! Modelos de dominio (registros, anotaciones, consultas y orden).
//!
//! La forma serializada coincide con la del backend de anotación, de modo que
//! los mismos tipos sirven para la API HTTP y para el cliente remoto.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Puntuación de una etiqueta confirmada por una persona.
pub const HUMAN_SCORE: f64 = 1.0;

/// Umbral a partir del cual una etiqueta predicha cuenta en datasets multi-etiqueta.
pub const MULTI_LABEL_THRESHOLD: f64 = 0.5;

/// Identificador opaco de un registro. El backend acepta enteros y cadenas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        s.parse::<i64>()
            .map(Self::Int)
            .unwrap_or_else(|_| Self::Text(s.to_string()))
    }
}

impl FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Una etiqueta con su puntuación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub class: String,
    pub score: f64,
}

impl ClassScore {
    /// Etiqueta introducida por una persona: confianza total.
    pub fn human(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            score: HUMAN_SCORE,
        }
    }
}

/// Etiquetas producidas por un modelo. Solo lectura desde la interfaz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub labels: Vec<ClassScore>,
}

impl Prediction {
    pub fn top(&self) -> Option<&ClassScore> {
        self.labels
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Etiquetas confirmadas por una persona.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub labels: Vec<ClassScore>,
}

impl Annotation {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.class.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[default]
    Default,
    Edited,
    Validated,
    Discarded,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Edited => "Edited",
            Self::Validated => "Validated",
            Self::Discarded => "Discarded",
        }
    }
}

/// Un registro de clasificación de texto tal y como lo devuelve el backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub multi_label: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicted_as: Vec<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: RecordId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            tokens: Vec::new(),
            multi_label: false,
            prediction: None,
            annotation: None,
            predicted_as: Vec::new(),
            status: RecordStatus::Default,
            metadata: BTreeMap::new(),
            event_timestamp: None,
        }
    }

    /// Etiquetas predichas: `predicted_as` si el backend lo envía; si no, se
    /// derivan de la predicción (la mejor etiqueta, o todas las que superan el
    /// umbral en multi-etiqueta).
    pub fn predicted_labels(&self) -> Vec<String> {
        if !self.predicted_as.is_empty() {
            return self.predicted_as.clone();
        }
        let Some(prediction) = &self.prediction else {
            return Vec::new();
        };
        if self.multi_label {
            prediction
                .labels
                .iter()
                .filter(|l| l.score >= MULTI_LABEL_THRESHOLD)
                .map(|l| l.class.clone())
                .collect()
        } else {
            prediction.top().map(|l| vec![l.class.clone()]).unwrap_or_default()
        }
    }

    pub fn annotated_labels(&self) -> Vec<String> {
        self.annotation
            .as_ref()
            .map(|a| a.classes().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Puntuación de la mejor predicción, usada por el filtro y el orden por `score`.
    pub fn top_score(&self) -> Option<f64> {
        self.prediction.as_ref().and_then(|p| p.top()).map(|l| l.score)
    }

    /// Validación en la frontera: un registro validado debe tener anotación.
    pub fn check(&self) -> Result<(), EngineError> {
        let annotated = self.annotation.as_ref().is_some_and(|a| !a.is_empty());
        if self.status == RecordStatus::Validated && !annotated {
            return Err(EngineError::InvalidRecord {
                id: self.id.clone(),
                reason: "registro validado sin anotación".to_string(),
            });
        }
        Ok(())
    }
}

/// Modo de visualización del dataset. Solo `annotate` expone la validación.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    #[default]
    Annotate,
    #[serde(alias = "exploration")]
    Explore,
    LabellingRules,
}

impl ViewMode {
    pub fn permits_annotation(self) -> bool {
        matches!(self, Self::Annotate)
    }
}

/// Campos categóricos (multi-valor) de la consulta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CategoricalField {
    AnnotatedAs,
    PredictedAs,
    AnnotatedBy,
    PredictedBy,
    Status,
    Predicted,
}

impl CategoricalField {
    pub const ALL: [Self; 6] = [
        Self::AnnotatedAs,
        Self::PredictedAs,
        Self::AnnotatedBy,
        Self::PredictedBy,
        Self::Status,
        Self::Predicted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnnotatedAs => "annotated_as",
            Self::PredictedAs => "predicted_as",
            Self::AnnotatedBy => "annotated_by",
            Self::PredictedBy => "predicted_by",
            Self::Status => "status",
            Self::Predicted => "predicted",
        }
    }
}

/// Clave de filtro: el rango numérico `score` o un campo categórico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterKey {
    Score,
    Categorical(CategoricalField),
}

impl FromStr for FilterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "score" {
            return Ok(Self::Score);
        }
        CategoricalField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .map(Self::Categorical)
            .ok_or_else(|| format!("Clave de filtro no soportada: {s}"))
    }
}

impl TryFrom<String> for FilterKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for CategoricalField {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.parse::<FilterKey>()? {
            FilterKey::Categorical(field) => Ok(field),
            FilterKey::Score => Err("`score` es un filtro de rango, no categórico".to_string()),
        }
    }
}

impl From<CategoricalField> for String {
    fn from(field: CategoricalField) -> Self {
        field.as_str().to_string()
    }
}

impl From<FilterKey> for String {
    fn from(key: FilterKey) -> Self {
        match key {
            FilterKey::Score => "score".to_string(),
            FilterKey::Categorical(field) => field.as_str().to_string(),
        }
    }
}

/// Rango numérico cerrado; un extremo ausente no limita.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

impl ScoreRange {
    pub fn contains(&self, score: f64) -> bool {
        self.from.map_or(true, |from| score >= from) && self.to.map_or(true, |to| score <= to)
    }
}

/// Consulta canónica enviada al backend.
///
/// En los campos categóricos `None` (sin filtro) y `Some(vec![])` (filtro
/// vaciado) son estados distintos y ambos se conservan al serializar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "query_text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_as: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_as: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_by: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_by: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreRange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Vec<String>>,
}

impl Query {
    pub fn categorical(&self, field: CategoricalField) -> Option<&Vec<String>> {
        match field {
            CategoricalField::AnnotatedAs => self.annotated_as.as_ref(),
            CategoricalField::PredictedAs => self.predicted_as.as_ref(),
            CategoricalField::AnnotatedBy => self.annotated_by.as_ref(),
            CategoricalField::PredictedBy => self.predicted_by.as_ref(),
            CategoricalField::Status => self.status.as_ref(),
            CategoricalField::Predicted => self.predicted.as_ref(),
        }
    }

    pub fn categorical_mut(&mut self, field: CategoricalField) -> &mut Option<Vec<String>> {
        match field {
            CategoricalField::AnnotatedAs => &mut self.annotated_as,
            CategoricalField::PredictedAs => &mut self.predicted_as,
            CategoricalField::AnnotatedBy => &mut self.annotated_by,
            CategoricalField::PredictedBy => &mut self.predicted_by,
            CategoricalField::Status => &mut self.status,
            CategoricalField::Predicted => &mut self.predicted,
        }
    }
}

/// Campos por los que se puede ordenar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortableField {
    AnnotatedAs,
    PredictedAs,
    Score,
}

/// Rango de comparación declarado para un campo ordenable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortRange {
    pub min: &'static str,
    pub max: &'static str,
}

impl SortableField {
    pub const ALL: [Self; 3] = [Self::AnnotatedAs, Self::PredictedAs, Self::Score];

    pub fn range(self) -> SortRange {
        match self {
            Self::AnnotatedAs | Self::PredictedAs => SortRange { min: "A", max: "Z" },
            Self::Score => SortRange { min: "0", max: "1" },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Criterio de orden en la forma del backend (`{"id": campo, "order": dir}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    #[serde(rename = "id", alias = "field")]
    pub field: SortableField,
    #[serde(default)]
    pub order: SortOrder,
}

/// Estado de un dataset abierto en el explorador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub multi_label: bool,
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub query: Query,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

impl Dataset {
    /// Dataset recién cargado: consulta vacía y sin orden.
    pub fn new(name: impl Into<String>, multi_label: bool, view_mode: ViewMode) -> Self {
        Self {
            name: name.into(),
            multi_label,
            view_mode,
            query: Query::default(),
            sort: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_accepts_numbers_and_strings() {
        let ids: Vec<RecordId> = serde_json::from_value(json!([7, "abc"])).unwrap();
        assert_eq!(ids, vec![RecordId::Int(7), RecordId::Text("abc".into())]);
        assert_eq!("42".parse::<RecordId>().unwrap(), RecordId::Int(42));
        assert_eq!("r-1".parse::<RecordId>().unwrap().to_string(), "r-1");
    }

    #[test]
    fn predicted_labels_fall_back_to_prediction() {
        let mut record = Record::new(RecordId::Int(1), "hola");
        record.prediction = Some(Prediction {
            agent: None,
            labels: vec![
                ClassScore { class: "neg".into(), score: 0.3 },
                ClassScore { class: "pos".into(), score: 0.7 },
            ],
        });
        assert_eq!(record.predicted_labels(), vec!["pos"]);

        record.multi_label = true;
        record.prediction.as_mut().unwrap().labels[0].score = 0.5;
        assert_eq!(record.predicted_labels(), vec!["neg", "pos"]);

        record.predicted_as = vec!["other".into()];
        assert_eq!(record.predicted_labels(), vec!["other"]);
    }

    #[test]
    fn validated_record_without_annotation_is_rejected() {
        let mut record = Record::new(RecordId::Int(1), "hola");
        record.status = RecordStatus::Validated;
        assert!(matches!(record.check(), Err(EngineError::InvalidRecord { .. })));

        record.annotation = Some(Annotation {
            agent: None,
            labels: vec![ClassScore::human("pos")],
        });
        assert!(record.check().is_ok());
    }

    #[test]
    fn query_keeps_cleared_filters_apart_from_absent_ones() {
        let mut query = Query::default();
        query.annotated_as = Some(Vec::new());
        query.metadata.insert("source".into(), Vec::new());

        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, json!({"annotated_as": [], "metadata": {"source": []}}));

        let back: Query = serde_json::from_value(value).unwrap();
        assert_eq!(back, query);
        assert_eq!(back.predicted_as, None);
    }

    #[test]
    fn filter_keys_parse_from_wire_names() {
        assert_eq!("score".parse::<FilterKey>(), Ok(FilterKey::Score));
        assert_eq!(
            "annotated_as".parse::<FilterKey>(),
            Ok(FilterKey::Categorical(CategoricalField::AnnotatedAs))
        );
        assert!("words".parse::<FilterKey>().is_err());
    }

    #[test]
    fn view_mode_accepts_exploration_alias() {
        let mode: ViewMode = serde_json::from_value(json!("exploration")).unwrap();
        assert_eq!(mode, ViewMode::Explore);
        assert!(!mode.permits_annotation());
        assert!(ViewMode::Annotate.permits_annotation());
    }

    #[test]
    fn sort_spec_uses_backend_shape() {
        let spec = SortSpec { field: SortableField::Score, order: SortOrder::Desc };
        assert_eq!(serde_json::to_value(spec).unwrap(), json!({"id": "score", "order": "desc"}));
        assert_eq!(SortableField::AnnotatedAs.range(), SortRange { min: "A", max: "Z" });
        assert_eq!(SortableField::Score.range(), SortRange { min: "0", max: "1" });
    }
}
