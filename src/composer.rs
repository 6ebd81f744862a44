//! Composición de la consulta canónica a partir de intenciones de la interfaz.
//!
//! Cada operación parte de la consulta actual del dataset, la fusiona clave a
//! clave con el cambio pedido y devuelve la búsqueda a despachar. Nada de lo
//! que hay aquí muta el dataset: el estado solo cambia cuando el backend
//! responde (ver `engine`).

use serde::{Deserialize, Serialize};

use crate::models::{CategoricalField, Dataset, FilterKey, Query, ScoreRange, SortSpec};

/// Referencia a un filtro por su clave, tal y como la envía la interfaz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRef<K> {
    pub key: K,
}

/// Intenciones de filtrado, búsqueda y orden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryIntent {
    TextSearch {
        #[serde(default)]
        text: Option<String>,
    },
    Filter {
        key: CategoricalField,
        #[serde(default)]
        values: Option<Vec<String>>,
    },
    MetaFilter {
        key: String,
        #[serde(default)]
        values: Vec<String>,
    },
    RemoveAllMetadataFilters {
        filters: Vec<FilterRef<String>>,
    },
    RemoveFiltersByGroup {
        filters: Vec<FilterRef<FilterKey>>,
    },
    #[serde(rename = "score_range")]
    ScoreFilter {
        #[serde(default)]
        range: Option<ScoreRange>,
    },
    Sort {
        sort: Vec<SortSpec>,
    },
}

/// Búsqueda completa lista para despachar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCommand {
    pub dataset: String,
    pub query: Query,
    pub sort: Vec<SortSpec>,
}

pub fn compose(dataset: &Dataset, intent: QueryIntent) -> SearchCommand {
    match intent {
        QueryIntent::TextSearch { text } => apply_text_search(dataset, text.as_deref()),
        QueryIntent::Filter { key, values } => apply_filter(dataset, key, values),
        QueryIntent::MetaFilter { key, values } => apply_meta_filter(dataset, &key, values),
        QueryIntent::RemoveAllMetadataFilters { filters } => {
            let keys: Vec<String> = filters.into_iter().map(|f| f.key).collect();
            remove_all_metadata_filters(dataset, &keys)
        }
        QueryIntent::RemoveFiltersByGroup { filters } => {
            let keys: Vec<FilterKey> = filters.into_iter().map(|f| f.key).collect();
            remove_filters_by_group(dataset, &keys)
        }
        QueryIntent::ScoreFilter { range } => apply_score_filter(dataset, range),
        QueryIntent::Sort { sort } => apply_sort(dataset, sort),
    }
}

/// Texto libre. La cadena vacía equivale a quitar el filtro.
pub fn apply_text_search(dataset: &Dataset, text: Option<&str>) -> SearchCommand {
    merged(dataset, |query| {
        query.text = text.filter(|t| !t.is_empty()).map(str::to_string);
    })
}

/// Filtro categórico. Una lista vacía equivale a quitar el filtro.
pub fn apply_filter(
    dataset: &Dataset,
    field: CategoricalField,
    values: Option<Vec<String>>,
) -> SearchCommand {
    merged(dataset, |query| {
        *query.categorical_mut(field) = values.filter(|v| !v.is_empty());
    })
}

/// Filtro de metadatos. Aquí la lista vacía es un valor explícito.
pub fn apply_meta_filter(dataset: &Dataset, key: &str, values: Vec<String>) -> SearchCommand {
    merged(dataset, |query| {
        query.metadata.insert(key.to_string(), values);
    })
}

/// Vacía cada filtro de metadatos indicado, sin borrar la clave.
pub fn remove_all_metadata_filters(dataset: &Dataset, keys: &[String]) -> SearchCommand {
    merged(dataset, |query| {
        for key in keys {
            query.metadata.insert(key.clone(), Vec::new());
        }
    })
}

/// Quita un grupo de filtros: el rango `score` desaparece, los categóricos
/// quedan vacíos.
pub fn remove_filters_by_group(dataset: &Dataset, keys: &[FilterKey]) -> SearchCommand {
    merged(dataset, |query| {
        for key in keys {
            match key {
                FilterKey::Score => query.score = None,
                FilterKey::Categorical(field) => *query.categorical_mut(*field) = Some(Vec::new()),
            }
        }
    })
}

pub fn apply_score_filter(dataset: &Dataset, range: Option<ScoreRange>) -> SearchCommand {
    merged(dataset, |query| {
        query.score = range;
    })
}

/// Sustituye el orden completo; la consulta se reenvía tal cual.
pub fn apply_sort(dataset: &Dataset, sort: Vec<SortSpec>) -> SearchCommand {
    SearchCommand {
        dataset: dataset.name.clone(),
        query: dataset.query.clone(),
        sort,
    }
}

fn merged(dataset: &Dataset, change: impl FnOnce(&mut Query)) -> SearchCommand {
    let mut query = dataset.query.clone();
    change(&mut query);
    SearchCommand {
        dataset: dataset.name.clone(),
        query,
        sort: dataset.sort.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortOrder, SortableField, ViewMode};
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::new("sentiment", false, ViewMode::Annotate)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn empty_text_search_unsets_the_field() {
        let mut ds = dataset();
        ds.query = apply_text_search(&ds, Some("great")).query;
        assert_eq!(ds.query.text.as_deref(), Some("great"));

        let cmd = apply_text_search(&ds, Some(""));
        assert_eq!(cmd.query.text, None);
    }

    #[test]
    fn empty_categorical_filter_equals_unset() {
        let mut ds = dataset();
        ds.query.annotated_as = Some(strings(&["pos"]));

        let emptied = apply_filter(&ds, CategoricalField::AnnotatedAs, Some(Vec::new()));
        let unset = apply_filter(&ds, CategoricalField::AnnotatedAs, None);
        assert_eq!(emptied, unset);
        assert_eq!(emptied.query.annotated_as, None);
    }

    #[test]
    fn operations_preserve_unrelated_keys_and_sort() {
        let mut ds = dataset();
        ds.query.text = Some("hola".into());
        ds.sort = vec![SortSpec { field: SortableField::Score, order: SortOrder::Desc }];

        let cmd = apply_filter(&ds, CategoricalField::PredictedAs, Some(strings(&["neg"])));
        assert_eq!(cmd.query.text.as_deref(), Some("hola"));
        assert_eq!(cmd.query.predicted_as, Some(strings(&["neg"])));
        assert_eq!(cmd.sort, ds.sort);
        assert_eq!(cmd.dataset, "sentiment");
        // El dataset de partida no cambia.
        assert_eq!(ds.query.predicted_as, None);
    }

    #[test]
    fn meta_filter_then_remove_leaves_an_empty_list() {
        let mut ds = dataset();
        ds.query = apply_meta_filter(&ds, "source", strings(&["x"])).query;
        assert_eq!(ds.query.metadata["source"], strings(&["x"]));

        let cmd = remove_all_metadata_filters(&ds, &["source".to_string()]);
        assert_eq!(cmd.query.metadata.get("source"), Some(&Vec::new()));
    }

    #[test]
    fn meta_filter_keeps_explicit_empty_values() {
        let cmd = apply_meta_filter(&dataset(), "split", Vec::new());
        assert_eq!(cmd.query.metadata.get("split"), Some(&Vec::new()));
    }

    #[test]
    fn removing_score_differs_from_removing_categorical() {
        let mut ds = dataset();
        ds.query.score = Some(ScoreRange { from: Some(0.2), to: Some(0.8) });
        ds.query.annotated_as = Some(strings(&["pos"]));

        let score = remove_filters_by_group(&ds, &[FilterKey::Score]);
        let annotated =
            remove_filters_by_group(&ds, &[FilterKey::Categorical(CategoricalField::AnnotatedAs)]);

        assert_eq!(score.query.score, None);
        assert_eq!(score.query.annotated_as, Some(strings(&["pos"])));
        assert_eq!(annotated.query.annotated_as, Some(Vec::new()));
        assert!(annotated.query.score.is_some());
        assert_ne!(score.query, annotated.query);
    }

    #[test]
    fn sort_replaces_previous_order() {
        let mut ds = dataset();
        ds.query.text = Some("hola".into());
        ds.sort = vec![SortSpec { field: SortableField::Score, order: SortOrder::Desc }];

        let sort = vec![SortSpec { field: SortableField::AnnotatedAs, order: SortOrder::Asc }];
        let cmd = apply_sort(&ds, sort.clone());
        assert_eq!(cmd.sort, sort);
        assert_eq!(cmd.query, ds.query);
    }

    #[test]
    fn intents_deserialize_from_ui_payloads() {
        let intent: QueryIntent = serde_json::from_value(json!({
            "type": "remove_filters_by_group",
            "filters": [{"key": "score"}, {"key": "predicted_as"}]
        }))
        .unwrap();
        let mut ds = dataset();
        ds.query.score = Some(ScoreRange { from: Some(0.5), to: None });
        let cmd = compose(&ds, intent);
        assert_eq!(cmd.query.score, None);
        assert_eq!(cmd.query.predicted_as, Some(Vec::new()));

        let bad = serde_json::from_value::<QueryIntent>(json!({
            "type": "filter", "key": "score", "values": ["1"]
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn score_range_intent_sets_and_clears_the_range() {
        let intent: QueryIntent = serde_json::from_value(json!({
            "type": "score_range",
            "range": {"from": 0.25, "to": 0.75}
        }))
        .unwrap();
        let mut ds = dataset();
        ds.query = compose(&ds, intent.clone()).query;
        assert_eq!(ds.query.score, Some(ScoreRange { from: Some(0.25), to: Some(0.75) }));
        assert_eq!(serde_json::to_value(&intent).unwrap()["type"], "score_range");

        let cleared: QueryIntent =
            serde_json::from_value(json!({"type": "score_range", "range": null})).unwrap();
        assert_eq!(compose(&ds, cleared).query.score, None);
    }
}
