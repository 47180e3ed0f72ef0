//! Errores del explorador del grafo.
//!
//! El núcleo (máquina de estados, oráculo, gateway del grafo, runner) devuelve
//! `ExplorerError`; el resto de la aplicación sigue usando `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorerError {
    /// El oráculo devolvió una acción que no se puede interpretar.
    #[error("respuesta del oráculo no interpretable: {0}")]
    OracleParse(String),

    /// El LLM no responde (red, cuota, timeout del transporte...).
    #[error("oráculo no disponible: {0}")]
    OracleUnavailable(String),

    /// Se agotó el número máximo de pasos sin llegar a `AnswerReasoning`.
    #[error("límite de pasos alcanzado ({limit}) sin respuesta final")]
    StepLimitExceeded { limit: usize },

    #[error("error consultando el grafo: {0}")]
    GraphQuery(String),

    /// Un handler encontró vacía una cola que debía tener elementos.
    /// Indica un defecto en las transiciones, no un caso recuperable.
    #[error("invariante violado: la cola '{queue}' está vacía")]
    EmptyQueueUnderflow { queue: &'static str },

    #[error("error de checkpoint: {0}")]
    Checkpoint(String),

    #[error("no existe ninguna sesión para el hilo '{thread_id}'")]
    SessionNotFound { thread_id: String },
}

pub type Result<T> = std::result::Result<T, ExplorerError>;

impl ExplorerError {
    /// Etiqueta estable para clientes (API, logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OracleParse(_) => "oracle_parse_error",
            Self::OracleUnavailable(_) => "oracle_unavailable",
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::GraphQuery(_) => "graph_query_error",
            Self::EmptyQueueUnderflow { .. } => "empty_queue_underflow",
            Self::Checkpoint(_) => "checkpoint_error",
            Self::SessionNotFound { .. } => "session_not_found",
        }
    }
}

impl From<neo4rs::Error> for ExplorerError {
    fn from(err: neo4rs::Error) -> Self {
        Self::GraphQuery(err.to_string())
    }
}
