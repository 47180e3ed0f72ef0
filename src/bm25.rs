//! Ranking léxico BM25 sobre los identificadores de los `:KeyElement`.
//!
//! Cada key element es un "documento" muy corto (su id); la consulta es el texto
//! de la pregunta. Se usa junto a la búsqueda vectorial para obtener candidatos
//! iniciales que el embedding por sí solo no encuentra (nombres propios, cifras).

use std::collections::{HashMap, HashSet};

use crate::models::ScoredKeyElement;

const K1: f64 = 1.2;
const B: f64 = 0.75;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does",
    "did", "what", "which", "who", "where", "when", "why", "how", "this", "that", "these",
    "those", "el", "la", "los", "las", "un", "una", "y", "o", "de", "del", "en", "que", "por",
    "con", "para", "es", "qué", "quién", "cómo", "cuál",
];

/// Minúsculas, separación por caracteres no alfanuméricos y sin palabras vacías.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Devuelve los `k` key elements con mayor puntuación BM25 (descendente).
/// Los que no comparten ningún término con la consulta se descartan.
pub fn rank(query: &str, key_elements: &[String], k: usize) -> Vec<ScoredKeyElement> {
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() || key_elements.is_empty() || k == 0 {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = key_elements.iter().map(|id| tokenize(id)).collect();
    let total_docs = docs.len() as f64;
    let avg_doc_len = (docs.iter().map(Vec::len).sum::<usize>() as f64 / total_docs).max(1.0);

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            if query_terms.contains(term) {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<ScoredKeyElement> = docs
        .iter()
        .zip(key_elements)
        .filter_map(|(doc, id)| {
            let doc_len = doc.len() as f64;
            let mut score = 0.0;
            for term in &query_terms {
                let tf = doc.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = *doc_freq.get(term.as_str()).unwrap_or(&0) as f64;
                let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc_len / avg_doc_len));
            }
            (score > 0.0).then(|| ScoredKeyElement {
                id: id.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
