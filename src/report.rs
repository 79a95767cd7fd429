use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::audit::AuditLog;
use crate::error::Outcome;
use crate::homologate::{validate_required_columns, Field};
use crate::metrics::{
    distribution, portfolio_metrics, positive_premium, quarterly_sales, PortfolioMetrics,
    QuarterlySales,
};
use crate::models::Metric;
use crate::retention::{score_customers, CustomerProfile};
use crate::segment::{segment_customers, segment_label, Segmentation};
use crate::session::Datasets;

const TOP_CUSTOMERS: usize = 10;

/// Everything the report renders, computed once per session.
pub struct ReportData {
    pub missing_columns: Vec<&'static str>,
    pub metrics: PortfolioMetrics,
    pub insurers: Metric<Vec<(String, usize)>>,
    pub products: Metric<Vec<(String, usize)>>,
    pub customers: Vec<CustomerProfile>,
    pub sales: Outcome<Vec<QuarterlySales>>,
    pub segmentation: Outcome<Segmentation>,
}

pub fn collect(datasets: &Datasets, audit: &mut AuditLog) -> ReportData {
    let missing_columns = validate_required_columns(&datasets.policies, audit);
    let view = positive_premium(&datasets.policies, audit);

    ReportData {
        missing_columns,
        metrics: portfolio_metrics(&view, audit),
        insurers: distribution(&view, Field::Insurer),
        products: distribution(&view, Field::Product),
        customers: score_customers(&datasets.policies),
        sales: quarterly_sales(&datasets.sales, None, audit),
        segmentation: segment_customers(&datasets.policies, audit),
    }
}

fn write_distribution(output: &mut String, title: &str, counts: &Metric<Vec<(String, usize)>>) {
    let _ = writeln!(output, "### {title}");
    match counts {
        Metric::Available(counts) if !counts.is_empty() => {
            for (value, count) in counts {
                let _ = writeln!(output, "- {value}: {count}");
            }
        }
        Metric::Available(_) => {
            let _ = writeln!(output, "No records.");
        }
        Metric::NotAvailable => {
            let _ = writeln!(output, "N/D");
        }
    }
    let _ = writeln!(output);
}

pub fn build_report(data: &ReportData, audit: &AuditLog, generated_at: DateTime<Local>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Madoli360 Portfolio Report");
    let _ = writeln!(
        output,
        "Session {} generated {}",
        audit.session_id(),
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Key Indicators");
    let _ = writeln!(output, "- Policies: {}", data.metrics.policies);
    let _ = writeln!(output, "- Customers: {}", data.metrics.customers);
    let _ = writeln!(output, "- Insurers: {}", data.metrics.insurers);
    let _ = writeln!(output, "- Products: {}", data.metrics.products);
    match data.metrics.premium_total {
        Metric::Available(total) => {
            let _ = writeln!(output, "- Total premium (MXN): {total:.2}");
        }
        Metric::NotAvailable => {
            let _ = writeln!(output, "- Total premium (MXN): N/D");
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Portfolio Distribution");
    write_distribution(&mut output, "By insurer", &data.insurers);
    write_distribution(&mut output, "By product", &data.products);

    let _ = writeln!(output, "## Top Customers by Retention Score");
    if data.customers.is_empty() {
        let _ = writeln!(output, "N/D");
    } else {
        for customer in data.customers.iter().take(TOP_CUSTOMERS) {
            let _ = writeln!(
                output,
                "- {} ({}) score {:.2} [{}] across {} policies, premium {}",
                customer.contractor_name,
                customer.id_cliente,
                customer.score,
                customer.classification,
                customer.policy_count,
                customer.premium_total
            );
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Sectoral Sales by Quarter");
    match &data.sales {
        Outcome::Ok(rows) if !rows.is_empty() => {
            let _ = writeln!(output, "| insurer | quarter | sales |");
            let _ = writeln!(output, "|---|---|---|");
            for row in rows {
                let _ = writeln!(
                    output,
                    "| {} | {} | {:.2} |",
                    row.insurer, row.quarter, row.total
                );
            }
        }
        Outcome::Ok(_) => {
            let _ = writeln!(output, "No sales rows survived validation.");
        }
        other => {
            let _ = writeln!(output, "N/D ({})", other.reason().unwrap_or_default());
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Customer Segments");
    match &data.segmentation {
        Outcome::Ok(segmentation) => {
            for (cluster, count) in segmentation.counts() {
                let _ = writeln!(
                    output,
                    "- Cluster {cluster} (segment {}): {count} rows",
                    segment_label(cluster)
                );
            }
        }
        other => {
            let _ = writeln!(output, "N/D ({})", other.reason().unwrap_or_default());
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Audit Log");
    if audit.is_empty() {
        let _ = writeln!(output, "No entries recorded.");
    } else {
        for entry in audit.entries() {
            let _ = writeln!(output, "- {entry}");
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Structural Validation");
    if data.missing_columns.is_empty() {
        let _ = writeln!(output, "All required policy columns are present.");
    } else {
        let _ = writeln!(
            output,
            "Missing required columns: {}",
            data.missing_columns.join(", ")
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homologate::{homologate, Domain, Homologated};
    use crate::models::Table;

    fn load(csv: &str, domain: Domain, audit: &mut AuditLog) -> Homologated {
        homologate(Table::from_bytes(csv.as_bytes()).unwrap(), domain, audit)
            .ok()
            .unwrap()
    }

    #[test]
    fn report_renders_every_section() {
        let mut audit = AuditLog::new();
        let datasets = Datasets {
            policies: load(
                "policy_number,id_cliente,contractor_name,source,product,premium_mxn\n\
                 P1,C1,Ana,GNP,GMM,1000\n\
                 P2,C1,Ana,AXA,VIDA,500\n\
                 P3,C2,Beto,GNP,GMM,-3\n",
                Domain::PolicyBase,
                &mut audit,
            ),
            sales: load(
                "fecha,nombre,Ventas\n2024-02-10,GNP,100.1\n2024-03-01,GNP,50.2\n",
                Domain::Sales,
                &mut audit,
            ),
            ..Datasets::default()
        };

        let data = collect(&datasets, &mut audit);
        let report = build_report(&data, &audit, Local::now());

        assert!(report.starts_with("# Madoli360 Portfolio Report\n"));
        assert!(report.contains(&audit.session_id().to_string()));
        assert!(report.contains("- Policies: 2"));
        assert!(report.contains("- Total premium (MXN): 1500.00"));
        assert!(report.contains("- GNP: 1"));
        assert!(report.contains("| GNP | 2024Q1 | 150.30 |"));
        assert!(report.contains("Missing required columns: Ramo, Subramo"));
        for entry in audit.entries() {
            assert!(report.contains(&entry.to_string()));
        }
    }

    #[test]
    fn unavailable_sections_render_nd() {
        let mut audit = AuditLog::new();
        let data = collect(&Datasets::default(), &mut audit);
        let report = build_report(&data, &audit, Local::now());

        assert!(report.contains("- Customers: N/D"));
        assert!(report.contains("- Total premium (MXN): N/D"));
        assert!(report.contains("## Sectoral Sales by Quarter\nN/D (schema mismatch"));
        assert!(report.contains("## Customer Segments\nN/D"));
    }
}
