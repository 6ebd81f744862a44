//! Carga y gestión de configuración de la aplicación (servidor + backend de anotación).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Rubrix,
}

impl BackendKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "memoria" => Ok(Self::Memory),
            "rubrix" => Ok(Self::Rubrix),
            other => Err(anyhow!("Backend de anotación no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub backend: BackendKind,
    pub rubrix_api_url: String,
    pub rubrix_api_key: String,
    pub rubrix_workspace: Option<String>,
    pub rubrix_timeout_secs: u64,

    /// Agente que firma las validaciones. Si falta, se usa el usuario del backend.
    pub agent: Option<String>,
    pub search_page_size: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let backend_str = lookup("ANNOTATION_BACKEND").unwrap_or_else(|| "memory".to_string());
        let backend = BackendKind::from_str(&backend_str)?;

        let rubrix_api_url = lookup("RUBRIX_API_URL")
            .unwrap_or_else(|| "http://localhost:6900".to_string())
            .trim_end_matches('/')
            .to_string();
        let rubrix_api_key = lookup("RUBRIX_API_KEY").unwrap_or_else(|| "rubrix.apikey".to_string());
        let rubrix_workspace = lookup("RUBRIX_WORKSPACE").filter(|w| !w.is_empty());

        let rubrix_timeout_secs = match lookup("RUBRIX_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow!("RUBRIX_TIMEOUT_SECS no es un número válido: {raw}"))?,
            None => 60,
        };
        let search_page_size = match lookup("SEARCH_PAGE_SIZE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow!("SEARCH_PAGE_SIZE no es un número válido: {raw}"))?,
            None => 50,
        };

        let agent = lookup("ANNOTATION_AGENT").filter(|a| !a.is_empty());

        Ok(Self {
            server_addr,
            backend,
            rubrix_api_url,
            rubrix_api_key,
            rubrix_workspace,
            rubrix_timeout_secs,
            agent,
            search_page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_point_to_local_memory_backend() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.backend, BackendKind::Memory);
        assert_eq!(cfg.rubrix_api_url, "http://localhost:6900");
        assert_eq!(cfg.rubrix_api_key, "rubrix.apikey");
        assert_eq!(cfg.rubrix_timeout_secs, 60);
        assert_eq!(cfg.search_page_size, 50);
        assert!(cfg.agent.is_none());
        assert!(cfg.rubrix_workspace.is_none());
    }

    #[test]
    fn strips_trailing_slash_and_reads_overrides() {
        let cfg = load(&[
            ("ANNOTATION_BACKEND", "Rubrix"),
            ("RUBRIX_API_URL", "http://rubrix:9090/"),
            ("RUBRIX_WORKSPACE", "equipo"),
            ("ANNOTATION_AGENT", "ana"),
            ("SEARCH_PAGE_SIZE", "10"),
        ])
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Rubrix);
        assert_eq!(cfg.rubrix_api_url, "http://rubrix:9090");
        assert_eq!(cfg.rubrix_workspace.as_deref(), Some("equipo"));
        assert_eq!(cfg.agent.as_deref(), Some("ana"));
        assert_eq!(cfg.search_page_size, 10);
    }

    #[test]
    fn rejects_unknown_backend_and_bad_numbers() {
        assert!(load(&[("ANNOTATION_BACKEND", "elastic")]).is_err());
        assert!(load(&[("RUBRIX_TIMEOUT_SECS", "mucho")]).is_err());
    }
}
