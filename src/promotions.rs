use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditLog;
use crate::homologate::{Field, Homologated};
use crate::models::cell;
use crate::segment::{segment_label, Segmentation};

pub const RECENT_CLAIM_MARKER: &str = "reclamación reciente";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromotionError {
    #[error("missing customer id")]
    MissingCustomerId,
    #[error("missing segment")]
    MissingSegment,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionRequest {
    pub id_cliente: String,
    pub segmento: String,
    pub historial: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionSuggestion {
    pub id_cliente: String,
    pub promociones_sugeridas: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fixed promotion table keyed by segment label.
pub fn promotions_for(segment: &str, history: &[String]) -> Vec<String> {
    let mut promotions = vec![match segment {
        "A" => "Descuento 20% en seguro de auto",
        "B" => "Membresía gratuita por 3 meses",
        _ => "Asesoría personalizada sin costo",
    }
    .to_string()];

    if history.iter().any(|h| h.trim() == RECENT_CLAIM_MARKER) {
        promotions.push("Bonificación por fidelidad".to_string());
    }
    promotions
}

pub fn suggest(request: &PromotionRequest) -> Result<PromotionSuggestion, PromotionError> {
    let id = request.id_cliente.trim();
    if id.is_empty() {
        return Err(PromotionError::MissingCustomerId);
    }
    let segment = request.segmento.trim();
    if segment.is_empty() {
        return Err(PromotionError::MissingSegment);
    }

    let suggestion = PromotionSuggestion {
        id_cliente: id.to_string(),
        promociones_sugeridas: promotions_for(segment, &request.historial),
        timestamp: Utc::now(),
    };
    tracing::info!(
        id_cliente = %suggestion.id_cliente,
        promotions = ?suggestion.promociones_sugeridas,
        "promotions generated"
    );
    Ok(suggestion)
}

/// One request per clustered customer (first assignment wins). History comes
/// from the `;`-separated history column when the policy base has one.
pub fn requests_from(segmentation: &Segmentation, policies: &Homologated) -> Vec<PromotionRequest> {
    let mut history: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let (Some(id_col), Some(hist_col)) = (
        policies
            .column(Field::CustomerId)
            .and_then(|c| policies.table.column_index(c)),
        policies
            .column(Field::History)
            .and_then(|c| policies.table.column_index(c)),
    ) {
        for row in policies.table.rows() {
            let (Some(id), Some(events)) = (cell(&row[id_col]), cell(&row[hist_col])) else {
                continue;
            };
            history
                .entry(id.trim().to_string())
                .or_default()
                .extend(
                    events
                        .split(';')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(str::to_string),
                );
        }
    }

    let mut seen = HashSet::new();
    segmentation
        .assignments
        .iter()
        .filter(|a| seen.insert(a.id_cliente.clone()))
        .map(|a| PromotionRequest {
            id_cliente: a.id_cliente.clone(),
            segmento: segment_label(a.cluster),
            historial: history.get(&a.id_cliente).cloned().unwrap_or_default(),
        })
        .collect()
}

pub fn consolidate(
    requests: &[PromotionRequest],
    audit: &mut AuditLog,
) -> Vec<PromotionSuggestion> {
    let mut results = Vec::new();
    for request in requests {
        let id = if request.id_cliente.trim().is_empty() {
            "sin_id"
        } else {
            request.id_cliente.trim()
        };
        match suggest(request) {
            Ok(suggestion) => {
                audit.success(format!("promotions generated for customer {id}"));
                results.push(suggestion);
            }
            Err(err) => audit.warning(format!("promotions not generated for customer {id}: {err}")),
        }
    }
    results
}
