use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::{ErrorKind, Outcome};
use crate::homologate::{parse_date, Field, Homologated};
use crate::models::{cell, parse_number, round2, Metric};

/// Sidebar-style selection. An empty list selects everything; a selection
/// on a field the dataset does not have is ignored.
#[derive(Debug, Clone, Default)]
pub struct PortfolioFilter {
    pub insurers: Vec<String>,
    pub products: Vec<String>,
    pub lines: Vec<String>,
    pub sublines: Vec<String>,
}

impl PortfolioFilter {
    fn selections(&self) -> [(Field, &[String]); 4] {
        [
            (Field::Insurer, self.insurers.as_slice()),
            (Field::Product, self.products.as_slice()),
            (Field::Line, self.lines.as_slice()),
            (Field::SubLine, self.sublines.as_slice()),
        ]
    }
}

pub fn apply_filter(policies: &Homologated, filter: &PortfolioFilter) -> Homologated {
    let active: Vec<(usize, Vec<String>)> = filter
        .selections()
        .into_iter()
        .filter(|(_, selected)| !selected.is_empty())
        .filter_map(|(field, selected)| {
            let column = policies.column(field)?;
            let idx = policies.table.column_index(column)?;
            Some((idx, selected.iter().map(|s| s.trim().to_uppercase()).collect()))
        })
        .collect();

    if active.is_empty() {
        return policies.clone();
    }

    let table = policies.table.filter(|row| {
        active.iter().all(|(idx, selected)| {
            cell(&row[*idx])
                .map(|v| selected.contains(&v.trim().to_uppercase()))
                .unwrap_or(false)
        })
    });
    policies.with_table(table)
}

/// Keeps rows whose premium parses to a positive number. Without a premium
/// column the view is returned unchanged.
pub fn premium_rows(view: &Homologated) -> Homologated {
    let Some(idx) = view
        .column(Field::Premium)
        .and_then(|c| view.table.column_index(c))
    else {
        return view.clone();
    };

    view.with_table(view.table.filter(|row| {
        cell(&row[idx])
            .and_then(parse_number)
            .map(|v| v > 0.0)
            .unwrap_or(false)
    }))
}

/// `premium_rows` with an audit entry describing what was kept.
pub fn positive_premium(view: &Homologated, audit: &mut AuditLog) -> Homologated {
    let filtered = premium_rows(view);
    if view.bindings.contains(Field::Premium) {
        audit.success(format!(
            "premium validated: {} of {} rows positive and numeric",
            filtered.table.len(),
            view.table.len()
        ));
    }
    filtered
}

pub fn premium_total(view: &Homologated) -> Metric<f64> {
    Metric::from_option(view.column(Field::Premium).map(|column| {
        view.table
            .values(column)
            .filter_map(parse_number)
            .filter(|v| *v > 0.0)
            .sum()
    }))
}

pub fn distinct(view: &Homologated, field: Field) -> Metric<usize> {
    Metric::from_option(view.column(field).map(|c| view.table.distinct_count(c)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioMetrics {
    pub policies: Metric<usize>,
    pub customers: Metric<usize>,
    pub insurers: Metric<usize>,
    pub products: Metric<usize>,
    pub premium_total: Metric<f64>,
    pub rows: usize,
}

/// Headline figures over an already filtered view.
pub fn portfolio_metrics(view: &Homologated, audit: &mut AuditLog) -> PortfolioMetrics {
    let metrics = PortfolioMetrics {
        policies: distinct(view, Field::PolicyNumber),
        customers: distinct(view, Field::CustomerId),
        insurers: distinct(view, Field::Insurer),
        products: distinct(view, Field::Product),
        premium_total: premium_total(view),
        rows: view.table.len(),
    };

    for (field, available) in [
        (Field::PolicyNumber, metrics.policies.is_available()),
        (Field::CustomerId, metrics.customers.is_available()),
        (Field::Insurer, metrics.insurers.is_available()),
        (Field::Product, metrics.products.is_available()),
        (Field::Premium, metrics.premium_total.is_available()),
    ] {
        if !available {
            audit.warning(format!(
                "{} column not present; portfolio metric reported as N/D",
                field.label()
            ));
        }
    }
    metrics
}

/// Row counts per value, largest first.
pub fn distribution(view: &Homologated, field: Field) -> Metric<Vec<(String, usize)>> {
    Metric::from_option(view.column(field).map(|column| {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in view.table.values(column) {
            *counts.entry(value).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(value, count)| (value.to_string(), count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarterlySales {
    pub insurer: String,
    pub quarter: String,
    pub total: f64,
}

pub fn quarter_label(date: NaiveDate) -> String {
    format!("{}Q{}", date.year(), date.month0() / 3 + 1)
}

/// Insurance lines present in the sales dataset, for selection.
pub fn sales_lines(sales: &Homologated) -> Vec<String> {
    sales
        .column(Field::Line)
        .map(|c| sales.table.distinct_values(c))
        .unwrap_or_default()
}

/// Sales summed per (insurer, fiscal quarter), optionally for one line.
pub fn quarterly_sales(
    sales: &Homologated,
    line: Option<&str>,
    audit: &mut AuditLog,
) -> Outcome<Vec<QuarterlySales>> {
    let mut columns = Vec::new();
    for field in [Field::SaleDate, Field::InsurerName, Field::SalesAmount] {
        match sales
            .column(field)
            .and_then(|c| sales.table.column_index(c))
        {
            Some(idx) => columns.push(idx),
            None => {
                audit.warning(format!(
                    "{} column missing; quarterly sales unavailable",
                    field.label()
                ));
                return Outcome::error(
                    ErrorKind::SchemaMismatch,
                    format!("sales dataset has no {} column", field.label()),
                );
            }
        }
    }
    let (date_idx, insurer_idx, amount_idx) = (columns[0], columns[1], columns[2]);

    let line_filter = match line {
        None => None,
        Some(selected) => {
            let Some(idx) = sales
                .column(Field::Line)
                .and_then(|c| sales.table.column_index(c))
            else {
                audit.warning("insurance line column missing; line selection not possible");
                return Outcome::error(
                    ErrorKind::SchemaMismatch,
                    "sales dataset has no insurance line column",
                );
            };
            Some((idx, selected.trim().to_uppercase()))
        }
    };

    let mut totals: BTreeMap<(String, String), f64> = BTreeMap::new();
    let (mut bad_dates, mut bad_amounts, mut no_insurer) = (0usize, 0usize, 0usize);

    for row in sales.table.rows() {
        if let Some((idx, selected)) = &line_filter {
            let value = cell(&row[*idx]).map(|v| v.trim().to_uppercase());
            if value.as_deref() != Some(selected.as_str()) {
                continue;
            }
        }
        let Some(date) = cell(&row[date_idx]).and_then(parse_date) else {
            bad_dates += 1;
            continue;
        };
        let Some(insurer) = cell(&row[insurer_idx]) else {
            no_insurer += 1;
            continue;
        };
        let Some(amount) = cell(&row[amount_idx]).and_then(parse_number) else {
            bad_amounts += 1;
            continue;
        };
        *totals
            .entry((insurer.trim().to_string(), quarter_label(date)))
            .or_insert(0.0) += amount;
    }

    if bad_dates > 0 {
        audit.warning(format!("{bad_dates} sales rows dropped: unparseable date"));
    }
    if no_insurer > 0 {
        audit.warning(format!("{no_insurer} sales rows dropped: missing insurer"));
    }
    if bad_amounts > 0 {
        audit.warning(format!("{bad_amounts} sales rows dropped: non-numeric sales"));
    }

    if totals.is_empty() {
        return Outcome::Empty(match line {
            Some(selected) => format!("no sales rows for line {selected}"),
            None => "no sales rows".to_string(),
        });
    }

    audit.success(format!("quarterly sales computed ({} groups)", totals.len()));
    Outcome::Ok(
        totals
            .into_iter()
            .map(|((insurer, quarter), total)| QuarterlySales {
                insurer,
                quarter,
                total: round2(total),
            })
            .collect(),
    )
}
