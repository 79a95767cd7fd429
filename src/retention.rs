use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::{ErrorKind, Outcome};
use crate::homologate::{Field, Homologated};
use crate::metrics::{distinct, premium_rows, premium_total};
use crate::models::{cell, Metric, Table};

const POLICY_WEIGHT: f64 = 0.5;
const PRODUCT_WEIGHT: f64 = 0.3;
const EXPIRATION_WEIGHT: f64 = 0.2;
const SCALE: f64 = 10.0;

/// Uncalibrated engagement heuristic over raw counts.
pub fn retention_score(policy_count: usize, distinct_products: usize, expirations: usize) -> f64 {
    (policy_count as f64 * POLICY_WEIGHT
        + distinct_products as f64 * PRODUCT_WEIGHT
        + expirations as f64 * EXPIRATION_WEIGHT)
        / SCALE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    #[serde(rename = "Prioritario")]
    Prioritario,
    #[serde(rename = "Promotor")]
    Promotor,
    #[serde(rename = "En riesgo")]
    EnRiesgo,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Prioritario => "Prioritario",
            Classification::Promotor => "Promotor",
            Classification::EnRiesgo => "En riesgo",
        })
    }
}

pub fn classify(score: f64) -> Classification {
    if score >= 7.0 {
        Classification::Prioritario
    } else if score >= 4.0 {
        Classification::Promotor
    } else {
        Classification::EnRiesgo
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerProfile {
    pub id_cliente: String,
    pub contractor_name: String,
    pub policy_count: usize,
    pub insurers: usize,
    pub products: usize,
    pub expirations: usize,
    pub premium_total: Metric<f64>,
    pub score: f64,
    pub classification: Classification,
}

/// Profile over one customer's rows. Premium validation is applied first,
/// so policies without a positive premium do not count.
fn build_profile(customer_id: &str, rows: &Homologated) -> CustomerProfile {
    let contractor_name = rows
        .column(Field::ContractorName)
        .and_then(|c| rows.table.values(c).next())
        .unwrap_or("Sin nombre")
        .to_string();

    let valid = premium_rows(rows);
    let policy_count = valid.table.len();
    let products = distinct(&valid, Field::Product).available().unwrap_or(0);
    let expirations = valid
        .column(Field::EndDate)
        .map(|c| valid.table.values(c).count())
        .unwrap_or(0);
    let score = retention_score(policy_count, products, expirations);

    CustomerProfile {
        id_cliente: customer_id.to_string(),
        contractor_name,
        policy_count,
        insurers: distinct(&valid, Field::Insurer).available().unwrap_or(0),
        products,
        expirations,
        premium_total: premium_total(&valid),
        score,
        classification: classify(score),
    }
}

pub fn profile(
    policies: &Homologated,
    customer_id: &str,
    audit: &mut AuditLog,
) -> Outcome<CustomerProfile> {
    let Some(idx) = policies
        .column(Field::CustomerId)
        .and_then(|c| policies.table.column_index(c))
    else {
        audit.failure("customer id column missing; customer profile unavailable");
        return Outcome::error(
            ErrorKind::SchemaMismatch,
            "policy base has no id_cliente column",
        );
    };

    let wanted = customer_id.trim();
    let rows = policies
        .table
        .filter(|row| cell(&row[idx]).map(str::trim) == Some(wanted));
    if rows.is_empty() {
        audit.warning(format!("no policies found for customer {wanted}"));
        return Outcome::error(
            ErrorKind::InvalidInput,
            format!("customer {wanted} does not exist in the policy base"),
        );
    }

    let profile = build_profile(wanted, &policies.with_table(rows));
    audit.success(format!(
        "customer profile {} scored {:.2} ({})",
        profile.id_cliente, profile.score, profile.classification
    ));
    Outcome::Ok(profile)
}

/// Every customer's profile, highest score first.
pub fn score_customers(policies: &Homologated) -> Vec<CustomerProfile> {
    let Some(idx) = policies
        .column(Field::CustomerId)
        .and_then(|c| policies.table.column_index(c))
    else {
        return Vec::new();
    };

    let mut grouped: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
    for row in policies.table.rows() {
        if let Some(id) = cell(&row[idx]) {
            grouped
                .entry(id.trim().to_string())
                .or_default()
                .push(row.clone());
        }
    }

    let headers = policies.table.headers().to_vec();
    let mut values: Vec<CustomerProfile> = grouped
        .into_iter()
        .map(|(id, rows)| {
            let subset = policies.with_table(Table::new(headers.clone(), rows));
            build_profile(&id, &subset)
        })
        .collect();
    values.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id_cliente.cmp(&b.id_cliente))
    });
    values
}
