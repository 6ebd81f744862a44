//! Cliente HTTP del servidor de anotación (API REST de Rubrix).
//!
//! Endpoints usados:
//!   - `GET  /api/me`
//!   - `POST /api/datasets/{name}/TextClassification:search`
//!   - `POST /api/datasets/{name}/TextClassification:bulk`
//!   - `DELETE /api/datasets/{name}`
//!   - `PUT  /api/datasets/{name}:copy`

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, SearchResults};
use crate::error::DispatchFailure;
use crate::models::{Query, Record, RecordStatus, SortSpec};

pub const API_KEY_HEADER: &str = "X-Rubrix-Api-Key";
pub const WORKSPACE_HEADER: &str = "X-Rubrix-Workspace";

/// Tamaño de lote al registrar muchos registros de golpe.
pub const LOG_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub workspaces: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    processed: usize,
    #[serde(default)]
    failed: usize,
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    records: &'a [Record],
}

#[derive(Serialize)]
struct CopyRequest<'a> {
    name: &'a str,
    target_workspace: Option<&'a str>,
}

pub struct RubrixClient {
    http: reqwest::Client,
    base_url: Url,
    workspace: Option<String>,
    page_size: usize,
}

impl RubrixClient {
    /// Construye el cliente sin tocar la red.
    pub fn new(
        api_url: &str,
        api_key: &str,
        timeout: Duration,
        page_size: usize,
    ) -> Result<Self> {
        let base_url = Url::parse(api_url.trim_end_matches('/'))?;
        if base_url.cannot_be_a_base() {
            bail!("URL de la API no válida: {api_url}");
        }

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(api_key)?);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            workspace: None,
            page_size,
        })
    }

    /// Conecta con el servidor, identifica al usuario y fija el workspace.
    /// Devuelve el cliente y el usuario autenticado.
    pub async fn connect_from_config(cfg: &AppConfig) -> Result<(Self, User)> {
        let mut client = Self::new(
            &cfg.rubrix_api_url,
            &cfg.rubrix_api_key,
            Duration::from_secs(cfg.rubrix_timeout_secs),
            cfg.search_page_size,
        )?;

        info!("Conectando al servidor de anotación en {}...", client.base_url);
        let user = client.whoami().await?;
        client.workspace = resolve_workspace(&user, cfg.rubrix_workspace.as_deref())?;
        info!(
            "Conexión OK como '{}' (workspace: {})",
            user.username,
            client.workspace.as_deref().unwrap_or(&user.username)
        );
        Ok((client, user))
    }

    pub async fn whoami(&self) -> Result<User, DispatchFailure> {
        let url = self.endpoint(&["api", "me"])?;
        let response = self.execute(self.http.get(url)).await?;
        decode(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DispatchFailure> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DispatchFailure::Backend(format!("URL base inválida: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn dataset_endpoint(&self, dataset: &str, action: &str) -> Result<Url, DispatchFailure> {
        let action = format!("TextClassification:{action}");
        self.endpoint(&["api", "datasets", dataset, action.as_str()])
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DispatchFailure> {
        let request = match &self.workspace {
            Some(workspace) => request.header(WORKSPACE_HEADER, workspace),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchFailure::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn bulk(&self, dataset: &str, records: &[Record]) -> Result<usize, DispatchFailure> {
        let url = self.dataset_endpoint(dataset, "bulk")?;
        let response = self
            .execute(self.http.post(url).json(&BulkRequest { records }))
            .await?;
        let summary: BulkResponse = decode(response).await?;
        if summary.failed > 0 {
            return Err(DispatchFailure::Backend(format!(
                "{} de {} registro(s) rechazados en '{dataset}'",
                summary.failed,
                records.len()
            )));
        }
        Ok(summary.processed)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, DispatchFailure> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Un workspace igual al nombre de usuario es el privado y no lleva cabecera.
pub fn resolve_workspace(user: &User, requested: Option<&str>) -> Result<Option<String>> {
    let Some(workspace) = requested else {
        return Ok(None);
    };
    if workspace == user.username {
        return Ok(None);
    }
    if let Some(allowed) = &user.workspaces {
        if !allowed.iter().any(|w| w == workspace) {
            return Err(anyhow!("Workspace no permitido para '{}': {workspace}", user.username));
        }
    }
    Ok(Some(workspace.to_string()))
}

#[async_trait]
impl Dispatcher for RubrixClient {
    fn name(&self) -> &str {
        "rubrix"
    }

    async fn search(
        &self,
        dataset: &str,
        query: &Query,
        sort: &[SortSpec],
    ) -> Result<SearchResults, DispatchFailure> {
        let mut url = self.dataset_endpoint(dataset, "search")?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string());
        debug!("POST {url}");
        let response = self
            .execute(self.http.post(url).json(&json!({ "query": query, "sort": sort })))
            .await?;
        decode(response).await
    }

    async fn validate_annotations(
        &self,
        dataset: &str,
        agent: &str,
        records: &[Record],
    ) -> Result<(), DispatchFailure> {
        let patched: Vec<Record> = records
            .iter()
            .cloned()
            .map(|mut record| {
                if let Some(annotation) = record.annotation.as_mut() {
                    annotation.agent.get_or_insert_with(|| agent.to_string());
                }
                record
            })
            .collect();
        self.bulk(dataset, &patched).await?;
        Ok(())
    }

    async fn reset_annotations(&self, dataset: &str, records: &[Record]) -> Result<(), DispatchFailure> {
        let cleared: Vec<Record> = records
            .iter()
            .cloned()
            .map(|mut record| {
                record.annotation = None;
                record.status = RecordStatus::Default;
                record
            })
            .collect();
        self.bulk(dataset, &cleared).await?;
        Ok(())
    }

    /// Los lotes se envían en orden; el primero que falla corta el envío.
    async fn log_records(&self, dataset: &str, records: &[Record]) -> Result<usize, DispatchFailure> {
        stream::iter(records.chunks(LOG_CHUNK_SIZE).map(Ok::<_, DispatchFailure>))
            .try_fold(0, |processed, chunk| async move {
                let done = self.bulk(dataset, chunk).await?;
                debug!("Lote de {} registro(s) enviado a '{dataset}'", chunk.len());
                Ok::<_, DispatchFailure>(processed + done)
            })
            .await
    }

    async fn delete_dataset(&self, dataset: &str) -> Result<(), DispatchFailure> {
        let url = self.endpoint(&["api", "datasets", dataset])?;
        debug!("DELETE {url}");
        self.execute(self.http.delete(url)).await?;
        Ok(())
    }

    async fn copy_dataset(
        &self,
        dataset: &str,
        name_of_copy: &str,
        workspace: Option<&str>,
    ) -> Result<(), DispatchFailure> {
        let segment = format!("{dataset}:copy");
        let url = self.endpoint(&["api", "datasets", segment.as_str()])?;
        debug!("PUT {url}");
        let body = CopyRequest {
            name: name_of_copy,
            target_workspace: workspace,
        };
        self.execute(self.http.put(url).json(&body)).await?;
        Ok(())
    }
}
