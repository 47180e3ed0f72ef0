//! Carga y gestión de configuración de la aplicación (Neo4j, LLM, explorador
//! e ingesta).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::checkpoint::default_checkpoint_dir;

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    /// Dimensión de los vectores del modelo de embeddings (índice `keyelements`).
    pub embedding_dimensions: usize,
    pub llm_chat_model: String,

    /// Pasos máximos por sesión de exploración.
    pub recursion_limit: usize,
    /// Candidatos pedidos a cada búsqueda en la selección inicial.
    pub initial_candidates: usize,
    /// `false` → checkpoints en memoria; `true` → ficheros JSON en `checkpoint_dir`.
    pub persistent_checkpoint: bool,
    pub checkpoint_dir: PathBuf,

    pub chunk_max_chars: usize,
    pub key_element_similarity_threshold: Option<f64>,
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {name} ('{value}'): {e}")),
    }
}

/// Dimensión conocida de los modelos de embeddings de OpenAI.
pub fn known_embedding_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

fn parse_bool(name: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
        Some(v) => Err(anyhow!("Valor inválido para {name}: '{v}'")),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, leyendo las variables con `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("Falta {key} en el entorno"));

        let neo4j_uri = required("NEO4J_URI")?;
        let neo4j_user = required("NEO4J_USER")?;
        let neo4j_password = required("NEO4J_PASSWORD")?;

        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let llm_provider = lookup("LLM_PROVIDER")
            .unwrap_or_else(|| "openai".to_string())
            .parse()?;
        let llm_embedding_model = lookup("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let embedding_dimensions = match lookup("LLM_EMBEDDING_DIMENSIONS") {
            Some(raw) => parse_var("LLM_EMBEDDING_DIMENSIONS", Some(raw), 0)?,
            None => known_embedding_dimensions(&llm_embedding_model).ok_or_else(|| {
                anyhow!(
                    "Dimensión desconocida para el modelo de embeddings '{llm_embedding_model}'; defina LLM_EMBEDDING_DIMENSIONS"
                )
            })?,
        };
        if embedding_dimensions == 0 {
            return Err(anyhow!("LLM_EMBEDDING_DIMENSIONS debe ser mayor que 0"));
        }
        let llm_chat_model = lookup("LLM_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        let recursion_limit = parse_var("RECURSION_LIMIT", lookup("RECURSION_LIMIT"), 100)?;
        let initial_candidates = parse_var("INITIAL_CANDIDATES", lookup("INITIAL_CANDIDATES"), 50)?;
        let persistent_checkpoint =
            parse_bool("PERSISTENT_CHECKPOINT", lookup("PERSISTENT_CHECKPOINT"), true)?;
        let checkpoint_dir = match lookup("CHECKPOINT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_checkpoint_dir()
                .unwrap_or_else(|| PathBuf::from("data").join("checkpoints")),
        };

        let chunk_max_chars = parse_var("CHUNK_MAX_CHARS", lookup("CHUNK_MAX_CHARS"), 2000)?;
        let key_element_similarity_threshold = match lookup("KEY_ELEMENT_SIMILARITY_THRESHOLD") {
            None => None,
            Some(raw) => {
                let threshold: f64 =
                    parse_var("KEY_ELEMENT_SIMILARITY_THRESHOLD", Some(raw), 0.0)?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(anyhow!(
                        "KEY_ELEMENT_SIMILARITY_THRESHOLD debe estar entre 0 y 1 (recibido {threshold})"
                    ));
                }
                Some(threshold)
            }
        };

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            embedding_dimensions,
            llm_chat_model,
            recursion_limit,
            initial_candidates,
            persistent_checkpoint,
            checkpoint_dir,
            chunk_max_chars,
            key_element_similarity_threshold,
        })
    }
}
