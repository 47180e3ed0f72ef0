//! Acciones que el oráculo elige en cada estado.
//!
//! El LLM responde con un descriptor tipo llamada a función
//! (`read_chunk(['a1', 'b2'])`, `termination()`...). `parse_call` lo separa en
//! nombre + argumentos y cada estado lo convierte en su propio enum cerrado.
//! Un descriptor que no encaja es siempre un `ExplorerError::OracleParse`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ExplorerError, Result};

/// Argumento posicional de un descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Text(String),
    List(Vec<String>),
}

impl CallArg {
    fn into_strings(self) -> Vec<String> {
        match self {
            CallArg::Text(s) => vec![s],
            CallArg::List(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCall {
    pub name: String,
    pub args: Vec<CallArg>,
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^\s*(\w+)\s*(?:\((.*)\))?\s*$").expect("regex válida"))
}

/// Interpreta `nombre(arg1, arg2, ...)`. Devuelve `None` si el texto no tiene
/// esa forma o si las comillas/corchetes no están balanceados.
pub fn parse_call(input: &str) -> Option<ParsedCall> {
    let caps = call_regex().captures(input)?;
    let name = caps.get(1)?.as_str().to_string();
    let raw_args = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    let mut args = Vec::new();
    for raw in split_top_level(raw_args)? {
        if raw.is_empty() {
            continue;
        }
        if raw.starts_with('[') {
            if !raw.ends_with(']') {
                return None;
            }
            let inner = &raw[1..raw.len() - 1];
            let items = split_top_level(inner)?
                .into_iter()
                .filter(|item| !item.is_empty())
                .map(|item| unquote(&item))
                .collect();
            args.push(CallArg::List(items));
        } else {
            args.push(CallArg::Text(unquote(&raw)));
        }
    }

    Some(ParsedCall { name, args })
}

/// Separa por comas de primer nivel, respetando comillas y corchetes.
fn split_top_level(input: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth = depth.checked_sub(1)?;
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    if quote.is_some() || depth != 0 {
        return None;
    }
    parts.push(current.trim().to_string());
    Some(parts)
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    for q in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

/// Etiqueta de la última acción elegida (se guarda en el estado de sesión).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    ReadChunk,
    StopAndReadNeighbor,
    SearchMore,
    SearchNeighbor,
    ReadPreviousChunk,
    ReadSubsequentChunk,
    ReadNeighborNode,
    Termination,
}

impl ActionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadChunk => "read_chunk",
            Self::StopAndReadNeighbor => "stop_and_read_neighbor",
            Self::SearchMore => "search_more",
            Self::SearchNeighbor => "search_neighbor",
            Self::ReadPreviousChunk => "read_previous_chunk",
            Self::ReadSubsequentChunk => "read_subsequent_chunk",
            Self::ReadNeighborNode => "read_neighbor_node",
            Self::Termination => "termination",
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_or_fail(descriptor: &str) -> Result<ParsedCall> {
    parse_call(descriptor).ok_or_else(|| {
        ExplorerError::OracleParse(format!("descriptor de acción mal formado: '{descriptor}'"))
    })
}

fn unknown_action(state: &str, call: &ParsedCall) -> ExplorerError {
    ExplorerError::OracleParse(format!(
        "acción '{}' no permitida en {state}",
        call.name
    ))
}

/// Acciones tras revisar los hechos atómicos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicFactAction {
    ReadChunk { ids: Vec<String> },
    StopAndReadNeighbor,
}

impl AtomicFactAction {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::ReadChunk { .. } => ActionTag::ReadChunk,
            Self::StopAndReadNeighbor => ActionTag::StopAndReadNeighbor,
        }
    }
}

impl FromStr for AtomicFactAction {
    type Err = ExplorerError;

    fn from_str(descriptor: &str) -> Result<Self> {
        let call = parse_or_fail(descriptor)?;
        match call.name.as_str() {
            "read_chunk" => {
                let ids: Vec<String> = call
                    .args
                    .into_iter()
                    .flat_map(CallArg::into_strings)
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect();
                if ids.is_empty() {
                    return Err(ExplorerError::OracleParse(
                        "read_chunk sin identificadores de chunk".to_string(),
                    ));
                }
                Ok(Self::ReadChunk { ids })
            }
            "stop_and_read_neighbor" => Ok(Self::StopAndReadNeighbor),
            _ => Err(unknown_action("atomic_fact_check", &call)),
        }
    }
}

/// Acciones tras leer un chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    SearchMore,
    ReadPreviousChunk,
    ReadSubsequentChunk,
    Termination,
}

impl ChunkAction {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::SearchMore => ActionTag::SearchMore,
            Self::ReadPreviousChunk => ActionTag::ReadPreviousChunk,
            Self::ReadSubsequentChunk => ActionTag::ReadSubsequentChunk,
            Self::Termination => ActionTag::Termination,
        }
    }
}

impl FromStr for ChunkAction {
    type Err = ExplorerError;

    fn from_str(descriptor: &str) -> Result<Self> {
        let call = parse_or_fail(descriptor)?;
        match call.name.as_str() {
            "search_more" => Ok(Self::SearchMore),
            "read_previous_chunk" => Ok(Self::ReadPreviousChunk),
            "read_subsequent_chunk" => Ok(Self::ReadSubsequentChunk),
            "termination" => Ok(Self::Termination),
            _ => Err(unknown_action("chunk_check", &call)),
        }
    }
}

/// Acciones tras revisar los vecinos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborAction {
    ReadNeighborNode { key: String },
    Termination,
}

impl NeighborAction {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::ReadNeighborNode { .. } => ActionTag::ReadNeighborNode,
            Self::Termination => ActionTag::Termination,
        }
    }
}

impl FromStr for NeighborAction {
    type Err = ExplorerError;

    fn from_str(descriptor: &str) -> Result<Self> {
        let call = parse_or_fail(descriptor)?;
        match call.name.as_str() {
            "read_neighbor_node" => {
                // Un key element sin comillas puede contener comas: se recompone.
                let key = call
                    .args
                    .into_iter()
                    .flat_map(CallArg::into_strings)
                    .collect::<Vec<_>>()
                    .join(", ");
                if key.trim().is_empty() {
                    return Err(ExplorerError::OracleParse(
                        "read_neighbor_node sin key element".to_string(),
                    ));
                }
                Ok(Self::ReadNeighborNode {
                    key: key.trim().to_string(),
                })
            }
            "termination" => Ok(Self::Termination),
            _ => Err(unknown_action("neighbor_select", &call)),
        }
    }
}
