use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::Settings;
use crate::error::Outcome;
use crate::homologate::{homologate, validate_required_columns, Domain, Homologated};
use crate::loader::{Dataset, Loader};

/// One pipeline run: its own audit log, its own loader (and census cache).
/// Nothing here is shared between sessions.
pub struct Session {
    audit: AuditLog,
    loader: Loader,
}

/// Every dataset after homologation, degraded to empty where unavailable.
#[derive(Debug, Default)]
pub struct Datasets {
    pub policies: Homologated,
    pub registry: Homologated,
    pub sales: Homologated,
    pub census: Homologated,
}

impl Session {
    pub fn new(settings: Settings, client: reqwest::Client) -> Self {
        let audit = AuditLog::new();
        tracing::info!(session = %audit.session_id(), "session started");
        Self {
            audit,
            loader: Loader::new(settings, client),
        }
    }

    pub fn id(&self) -> Uuid {
        self.audit.session_id()
    }

    pub fn settings(&self) -> &Settings {
        self.loader.settings()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    async fn dataset(&mut self, dataset: Dataset, domain: Domain) -> Outcome<Homologated> {
        let loaded = self.loader.load(dataset, &mut self.audit).await;
        if !loaded.is_ok() {
            self.audit.failure(format!(
                "{} is empty or unavailable; dependent views degrade",
                dataset.file_name()
            ));
        }
        loaded.and_then(|table| homologate(table, domain, &mut self.audit))
    }

    pub async fn policies(&mut self) -> Outcome<Homologated> {
        self.dataset(Dataset::Policies, Domain::PolicyBase).await
    }

    pub async fn registry(&mut self) -> Outcome<Homologated> {
        self.dataset(Dataset::Registry, Domain::BusinessRegistry).await
    }

    pub async fn sales(&mut self) -> Outcome<Homologated> {
        self.dataset(Dataset::Sales, Domain::Sales).await
    }

    pub async fn census(&mut self) -> Outcome<Homologated> {
        self.dataset(Dataset::Census, Domain::Census).await
    }

    pub async fn load_all(&mut self) -> Datasets {
        Datasets {
            policies: self.policies().await.unwrap_or_default(),
            registry: self.registry().await.unwrap_or_default(),
            sales: self.sales().await.unwrap_or_default(),
            census: self.census().await.unwrap_or_default(),
        }
    }

    pub fn validate(&mut self, policies: &Homologated) -> Vec<&'static str> {
        validate_required_columns(policies, &mut self.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLevel;
    use crate::homologate::Field;

    fn settings_for(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            mirror_url: "http://127.0.0.1:9/".to_string(),
            census_url: "http://127.0.0.1:9/censo_inegi.csv".to_string(),
            timeout_secs: 5,
            ..Settings::default()
        }
    }

    fn session_for(dir: &std::path::Path) -> Session {
        let settings = settings_for(dir);
        let client = settings.http_client().unwrap();
        Session::new(settings, client)
    }

    #[tokio::test]
    async fn policies_are_loaded_and_homologated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("madoli_base.csv"),
            "id_cliente,aseguradora,producto,ramo\nC1,GNP,gmm,Auto\n",
        )
        .unwrap();
        let mut session = session_for(dir.path());

        let policies = session.policies().await.ok().unwrap();
        assert_eq!(policies.column(Field::Insurer), Some("source"));
        assert_eq!(policies.table.values("Ramo").next(), Some("AUTOS"));

        let missing = session.validate(&policies);
        assert_eq!(missing, vec!["policy_number", "Subramo", "premium_mxn"]);
        assert_eq!(session.audit().count(AuditLevel::Failure), 3);
    }

    #[tokio::test]
    async fn empty_dataset_gets_a_failure_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("denue.csv"), "nombre,municipio\n").unwrap();
        let mut session = session_for(dir.path());

        let outcome = session.registry().await;
        assert!(matches!(outcome, Outcome::Empty(_)));
        let last = session.audit().entries().last().unwrap();
        assert_eq!(last.level, AuditLevel::Failure);
        assert!(last.message.starts_with("denue.csv is empty or unavailable"));
    }

    #[tokio::test]
    async fn unavailable_base_keeps_load_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_for(dir.path());

        let reason = session.policies().await.reason().unwrap();
        assert!(reason.starts_with("source unavailable: madoli_base.csv"));
    }

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = session_for(dir.path());
        let second = session_for(dir.path());

        let datasets = first.load_all().await;
        assert!(datasets.policies.is_empty());
        assert!(datasets.census.is_empty());
        assert_ne!(first.id(), second.id());
        assert!(!first.audit().is_empty());
        assert!(second.audit().is_empty());
    }
}
