use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::audit::AuditLog;
use crate::config::Settings;
use crate::error::{ErrorKind, Outcome, SourceError};
use crate::models::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Policies,
    Registry,
    Sales,
    Census,
}

impl Dataset {
    pub fn file_name(self) -> &'static str {
        match self {
            Dataset::Policies => "madoli_base.csv",
            Dataset::Registry => "denue.csv",
            Dataset::Sales => "ventas_sectoriales.csv",
            Dataset::Census => "censo_inegi.csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Mirror(String),
    PublicObject(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "local file {}", path.display()),
            Source::Mirror(url) => write!(f, "mirror {url}"),
            Source::PublicObject(url) => write!(f, "public storage {url}"),
        }
    }
}

/// Resolves datasets through the local → mirror → public-storage chain. One
/// loader belongs to one session; its census cache is never shared.
pub struct Loader {
    settings: Settings,
    client: reqwest::Client,
    census_cache: HashMap<String, Outcome<Table>>,
}

impl Loader {
    pub fn new(settings: Settings, client: reqwest::Client) -> Self {
        Self {
            settings,
            client,
            census_cache: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sources(&self, dataset: Dataset) -> Vec<Source> {
        let file_name = dataset.file_name();
        let mut sources = vec![
            Source::Local(self.settings.data_dir.join(file_name)),
            Source::Mirror(self.settings.mirror_url_for(file_name)),
        ];
        if dataset == Dataset::Census {
            sources.push(Source::PublicObject(self.settings.census_url.clone()));
        }
        sources
    }

    pub async fn load(&mut self, dataset: Dataset, audit: &mut AuditLog) -> Outcome<Table> {
        if dataset != Dataset::Census {
            return self.load_chain(dataset, audit).await;
        }

        let key = self.settings.census_url.clone();
        if let Some(cached) = self.census_cache.get(&key) {
            audit.info(format!(
                "{} served from session cache",
                dataset.file_name()
            ));
            return cached.clone();
        }
        let outcome = self.load_chain(dataset, audit).await;
        self.census_cache.insert(key, outcome.clone());
        outcome
    }

    async fn load_chain(&self, dataset: Dataset, audit: &mut AuditLog) -> Outcome<Table> {
        let name = dataset.file_name();
        let mut last_error = String::from("no sources configured");

        for source in self.sources(dataset) {
            match self.fetch(&source).await {
                Ok(table) => {
                    audit.success(format!(
                        "{name} loaded from {source} ({} records)",
                        table.len()
                    ));
                    if table.is_empty() {
                        return Outcome::Empty(format!("{name} has no records"));
                    }
                    return Outcome::Ok(table);
                }
                Err(err) => {
                    audit.failure(format!("{name} could not be loaded from {source}: {err}"));
                    last_error = err.to_string();
                }
            }
        }

        Outcome::error(ErrorKind::SourceUnavailable, format!("{name}: {last_error}"))
    }

    async fn fetch(&self, source: &Source) -> Result<Table, SourceError> {
        match source {
            Source::Local(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => {
                        SourceError::NotFound(path.display().to_string())
                    }
                    _ => SourceError::Io(err),
                })?;
                Ok(Table::from_bytes(&bytes)?)
            }
            Source::Mirror(url) | Source::PublicObject(url) => {
                let bytes = self
                    .client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await?;
                Ok(Table::from_bytes(&bytes)?)
            }
        }
    }
}
