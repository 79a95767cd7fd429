use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod api;
mod audit;
mod config;
mod error;
mod homologate;
mod loader;
mod metrics;
mod models;
mod notify;
mod promotions;
mod report;
mod retention;
mod segment;
mod session;
mod territorial;

use config::Settings;
use error::Outcome;
use homologate::Field;
use session::Session;

#[derive(Parser)]
#[command(name = "madoli360")]
#[command(about = "Insurance brokerage portfolio analytics for Madoli360", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Portfolio indicators and distributions
    Kpis {
        #[arg(long = "aseguradora")]
        insurers: Vec<String>,
        #[arg(long = "producto")]
        products: Vec<String>,
        #[arg(long = "ramo")]
        lines: Vec<String>,
        #[arg(long = "subramo")]
        sublines: Vec<String>,
    },
    /// Retention profile of one customer, or the top ranked customers
    Profile {
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Businesses and census data for a municipality
    Territorial {
        #[arg(long)]
        municipio: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Sectoral sales per insurer and fiscal quarter
    Sectoral {
        #[arg(long)]
        ramo: Option<String>,
    },
    /// Cluster customers into three segments
    Cluster {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Suggest promotions per customer segment
    Promotions {
        /// Deliver the suggestions to the notification endpoint
        #[arg(long)]
        send: bool,
    },
    /// Load every dataset and print the audit log
    Audit,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the JSON endpoints
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

fn print_outcome_reason<T>(label: &str, outcome: &Outcome<T>) {
    if let Some(reason) = outcome.reason() {
        println!("{label}: N/D ({reason})");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let client = cli
        .settings
        .http_client()
        .context("failed to build http client")?;

    let mut session = Session::new(cli.settings.clone(), client.clone());

    match cli.command {
        Commands::Kpis {
            insurers,
            products,
            lines,
            sublines,
        } => {
            let policies = session.policies().await;
            print_outcome_reason("Policy base", &policies);
            let policies = policies.unwrap_or_default();
            let filter = metrics::PortfolioFilter {
                insurers,
                products,
                lines,
                sublines,
            };
            let view = metrics::apply_filter(&policies, &filter);
            let view = metrics::positive_premium(&view, session.audit_mut());
            let kpis = metrics::portfolio_metrics(&view, session.audit_mut());

            println!("Policies: {}", kpis.policies);
            println!("Customers: {}", kpis.customers);
            println!("Insurers: {}", kpis.insurers);
            println!("Products: {}", kpis.products);
            println!("Total premium (MXN): {}", kpis.premium_total);
            for (title, field) in [("insurer", Field::Insurer), ("product", Field::Product)] {
                println!("Policies by {title}:");
                match metrics::distribution(&view, field) {
                    models::Metric::Available(counts) => {
                        for (value, count) in counts {
                            println!("- {value}: {count}");
                        }
                    }
                    models::Metric::NotAvailable => println!("- N/D"),
                }
            }
        }
        Commands::Profile { id, top } => {
            let policies = session.policies().await;
            print_outcome_reason("Policy base", &policies);
            let policies = policies.unwrap_or_default();
            match id {
                Some(id) => match retention::profile(&policies, &id, session.audit_mut()) {
                    Outcome::Ok(profile) => {
                        println!("Customer {} ({})", profile.id_cliente, profile.contractor_name);
                        println!("- Policies: {}", profile.policy_count);
                        println!("- Insurers: {}", profile.insurers);
                        println!("- Products: {}", profile.products);
                        println!("- Expirations: {}", profile.expirations);
                        println!("- Total premium (MXN): {}", profile.premium_total);
                        println!(
                            "- Retention score {:.2}: {}",
                            profile.score, profile.classification
                        );
                    }
                    other => print_outcome_reason("Customer profile", &other),
                },
                None => {
                    let ranked = retention::score_customers(&policies);
                    if ranked.is_empty() {
                        println!("No customers available for scoring.");
                        return Ok(());
                    }
                    println!("Top customers by retention score:");
                    for profile in ranked.iter().take(top) {
                        println!(
                            "- {} ({}) score {:.2} [{}] across {} policies",
                            profile.contractor_name,
                            profile.id_cliente,
                            profile.score,
                            profile.classification,
                            profile.policy_count
                        );
                    }
                }
            }
        }
        Commands::Territorial { municipio, out } => {
            let registry = session.registry().await.unwrap_or_default();
            let census = session.census().await.unwrap_or_default();
            let Some(municipio) = municipio else {
                println!("Municipalities:");
                for name in territorial::municipalities(&registry) {
                    println!("- {name}");
                }
                return Ok(());
            };
            match territorial::municipality_view(
                &registry,
                &census,
                &municipio,
                session.audit_mut(),
            ) {
                Outcome::Ok(view) => {
                    println!(
                        "{}: {} businesses, {} census rows, {} mapped",
                        view.municipality,
                        view.businesses.len(),
                        view.census.len(),
                        view.coordinates.len()
                    );
                    if !view.missing_columns.is_empty() {
                        println!("Missing columns: {}", view.missing_columns.join(", "));
                    }
                    let listing = view.listing();
                    println!("{}", listing.headers().join(" | "));
                    for row in listing.rows() {
                        println!("{}", row.join(" | "));
                    }
                    let path = out.unwrap_or_else(|| PathBuf::from(view.download_name()));
                    let bytes = view
                        .businesses_csv()
                        .context("failed to encode business listing")?;
                    std::fs::write(&path, bytes)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Business listing written to {}.", path.display());
                }
                other => print_outcome_reason("Territorial view", &other),
            }
        }
        Commands::Sectoral { ramo } => {
            let sales = session.sales().await.unwrap_or_default();
            let lines = metrics::sales_lines(&sales);
            if !lines.is_empty() {
                println!("Lines available: {}", lines.join(", "));
            }
            match metrics::quarterly_sales(&sales, ramo.as_deref(), session.audit_mut()) {
                Outcome::Ok(rows) if rows.is_empty() => {
                    println!("No sales rows for this selection.");
                }
                Outcome::Ok(rows) => {
                    println!("Sales by insurer and quarter:");
                    for row in rows {
                        println!("- {} {}: {:.2}", row.insurer, row.quarter, row.total);
                    }
                }
                other => print_outcome_reason("Sectoral sales", &other),
            }
        }
        Commands::Cluster { out } => {
            let policies = session.policies().await.unwrap_or_default();
            match segment::segment_customers(&policies, session.audit_mut()) {
                Outcome::Ok(segmentation) => {
                    for (cluster, count) in segmentation.counts() {
                        println!("Cluster {cluster}: {count} rows");
                    }
                    let path = out.unwrap_or_else(|| PathBuf::from(segment::DOWNLOAD_NAME));
                    segmentation
                        .to_table()
                        .write_csv(
                            std::fs::File::create(&path)
                                .with_context(|| format!("failed to create {}", path.display()))?,
                        )
                        .context("failed to write clustered customers")?;
                    println!("Clustered customers written to {}.", path.display());
                }
                other => print_outcome_reason("Clustering", &other),
            }
        }
        Commands::Promotions { send } => {
            let policies = session.policies().await.unwrap_or_default();
            let segmentation = match segment::segment_customers(&policies, session.audit_mut()) {
                Outcome::Ok(segmentation) => segmentation,
                other => {
                    print_outcome_reason("Promotions", &other);
                    return Ok(());
                }
            };
            let requests = promotions::requests_from(&segmentation, &policies);
            let suggestions = promotions::consolidate(&requests, session.audit_mut());
            for suggestion in &suggestions {
                println!(
                    "- {}: {}",
                    suggestion.id_cliente,
                    suggestion.promociones_sugeridas.join("; ")
                );
            }
            if send {
                let notifier = notify::Notifier::new(client, session.settings().notify_url.clone());
                let mark = session.audit().len();
                let delivery = notifier.deliver_all(&suggestions, session.audit_mut()).await;
                for entry in session.audit().since(mark) {
                    println!("{entry}");
                }
                match delivery.outcome() {
                    Outcome::Ok(sent) => println!("{sent} promotions delivered."),
                    other => print_outcome_reason("Delivery", &other),
                }
            }
        }
        Commands::Audit => {
            let datasets = session.load_all().await;
            session.validate(&datasets.policies);
            for entry in session.audit().entries() {
                println!("{entry}");
            }
            println!(
                "{} entries: {} warnings, {} failures.",
                session.audit().len(),
                session.audit().count(audit::AuditLevel::Warning),
                session.audit().count(audit::AuditLevel::Failure)
            );
        }
        Commands::Report { out } => {
            let datasets = session.load_all().await;
            let data = report::collect(&datasets, session.audit_mut());
            let report = report::build_report(&data, session.audit(), Local::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            let state = api::AppState {
                settings: cli.settings,
                client,
            };
            api::serve(state, bind).await?;
        }
    }

    Ok(())
}
