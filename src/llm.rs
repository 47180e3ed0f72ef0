//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! `LlmManager` cubre tres usos:
//!   - embeddings (key elements y consultas),
//!   - extracción de hechos atómicos durante la ingesta,
//!   - el oráculo de decisiones del explorador (`DecisionOracle`).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::error::ExplorerError;
use crate::models::{AtomicFactRow, ChunkText};
use crate::oracle::{
    AnswerDecision, AtomicFactDecision, ChunkDecision, DecisionOracle, ExplorationContext,
    InitialNodes, NeighborDecision, ScoredNode,
};
use crate::prompts;

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Hecho atómico extraído de un chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedFact {
    /// Key elements mencionados en el hecho.
    pub key_elements: Vec<String>,
    /// Frase breve e indivisible.
    pub atomic_fact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Extraction {
    pub atomic_facts: Vec<ExtractedFact>,
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

/// Añade al prompt de sistema el JSON Schema que debe cumplir la respuesta.
fn with_schema<T: JsonSchema>(system: &str) -> String {
    let schema = schemars::schema_for!(T);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "{system}\nLa salida DEBE ser un único objeto JSON válido que cumpla este JSON Schema. No incluyas explicaciones, sólo el JSON.\n{schema}"
    )
}

/// Limpia la respuesta del LLM (bloques ```json) y la deserializa.
pub fn parse_json_reply<T: DeserializeOwned>(response: &str) -> serde_json::Result<T> {
    let json = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(json)
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula un embedding por texto, en el mismo orden.
    ///
    /// Nota: sólo implementado para OpenAI.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model.embed_texts(texts).await?;

        if embeddings.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            ));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Una llamada de chat con prompt de sistema y mensaje de usuario.
    pub async fn complete(&self, system: &str, input: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(system, input).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn complete_with_openai(&self, system: &str, input: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            DEFAULT_CHAT_MODEL
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(system)
            .temperature(0.0)
            .build();

        let answer = agent.prompt(input).await?;
        Ok(answer)
    }

    /// Pide una respuesta estructurada `T`. Los fallos de transporte son
    /// `OracleUnavailable`; un JSON que no encaja es `OracleParse`.
    async fn complete_json<T>(&self, system: &str, input: &str) -> Result<T, ExplorerError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let response = self
            .complete(&with_schema::<T>(system), input)
            .await
            .map_err(|e| ExplorerError::OracleUnavailable(e.to_string()))?;

        parse_json_reply(&response).map_err(|e| {
            debug!("Respuesta LLM no válida: '{response}'");
            ExplorerError::OracleParse(format!("JSON inválido: {e}"))
        })
    }

    // ---------------------------------------------------------------------
    // EXTRACCIÓN DE HECHOS ATÓMICOS
    // ---------------------------------------------------------------------

    /// Extrae hechos atómicos y key elements de un chunk.
    pub async fn extract_atomic_facts(&self, text: &str) -> Result<Extraction> {
        let system = with_schema::<Extraction>(prompts::EXTRACTION_SYSTEM);
        let response = self.complete(&system, text).await?;

        match parse_json_reply::<Extraction>(&response) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("No se pudo parsear el JSON de extracción para un chunk. Error: {}. Respuesta LLM: '{}'", e, response);
                // Resultado vacío para no detener la ingesta.
                Ok(Extraction::default())
            }
        }
    }
}

#[async_trait]
impl DecisionOracle for LlmManager {
    async fn plan(&self, question: &str) -> Result<String, ExplorerError> {
        let plan = self
            .complete(prompts::RATIONAL_PLAN_SYSTEM, question)
            .await
            .map_err(|e| ExplorerError::OracleUnavailable(e.to_string()))?;
        Ok(plan.trim().to_string())
    }

    async fn select_initial_nodes(
        &self,
        question: &str,
        rational_plan: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredNode>, ExplorerError> {
        let nodes: InitialNodes = self
            .complete_json(
                &prompts::initial_nodes_system(),
                &prompts::initial_nodes_input(question, rational_plan, candidates),
            )
            .await?;
        Ok(nodes.initial_nodes)
    }

    async fn check_atomic_facts(
        &self,
        ctx: ExplorationContext<'_>,
        atomic_facts: &[AtomicFactRow],
    ) -> Result<AtomicFactDecision, ExplorerError> {
        self.complete_json(
            &prompts::atomic_fact_system(),
            &prompts::atomic_facts_input(&ctx, atomic_facts),
        )
        .await
    }

    async fn read_chunk(
        &self,
        ctx: ExplorationContext<'_>,
        chunk: &ChunkText,
    ) -> Result<ChunkDecision, ExplorerError> {
        self.complete_json(&prompts::chunk_read_system(), &prompts::chunk_input(&ctx, chunk))
            .await
    }

    async fn select_neighbor(
        &self,
        ctx: ExplorationContext<'_>,
        candidates: &[String],
    ) -> Result<NeighborDecision, ExplorerError> {
        self.complete_json(
            &prompts::neighbor_select_system(),
            &prompts::neighbors_input(&ctx, candidates),
        )
        .await
    }

    async fn reason_answer(&self, question: &str, notebook: &str) -> Result<AnswerDecision, ExplorerError> {
        self.complete_json(
            &prompts::answer_reasoning_system(),
            &prompts::answer_input(question, notebook),
        )
        .await
    }
}
