use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::Settings;
use crate::error::{ErrorKind, Outcome};
use crate::retention::{profile, CustomerProfile};
use crate::session::Session;

pub const STATUS_OK: &str = "OK";
pub const STATUS_ERROR: &str = "ERROR";
pub const STATUS_UNAVAILABLE: &str = "NO_DISPONIBLE";

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub client: reqwest::Client,
}

#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    pub estado: &'static str,
    pub id_cliente: String,
    pub marca_de_tiempo: String,
    pub mensaje: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perfil: Option<CustomerProfile>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/clientes/:id_cliente", get(customer_status))
        .route("/v1/clientes/:id_cliente/perfil", get(customer_profile))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("madoli360 api listening on {bind}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("api server failed")
}

async fn healthz() -> Json<Value> {
    Json(json!({ "estado": STATUS_OK }))
}

async fn customer_status(
    State(state): State<AppState>,
    Path(id_cliente): Path<String>,
) -> (StatusCode, Json<CustomerResponse>) {
    lookup(&state, &id_cliente, false).await
}

async fn customer_profile(
    State(state): State<AppState>,
    Path(id_cliente): Path<String>,
) -> (StatusCode, Json<CustomerResponse>) {
    lookup(&state, &id_cliente, true).await
}

async fn lookup(
    state: &AppState,
    id_cliente: &str,
    with_profile: bool,
) -> (StatusCode, Json<CustomerResponse>) {
    let mut session = Session::new(state.settings.clone(), state.client.clone());
    let policies = session.policies().await;
    let outcome = policies
        .and_then(|p| profile(&p, id_cliente, session.audit_mut()))
        .map(|found| with_profile.then_some(found));

    let (status, estado, mensaje, perfil) = match outcome {
        Outcome::Ok(perfil) => (
            StatusCode::OK,
            STATUS_OK,
            "cliente encontrado".to_string(),
            perfil,
        ),
        Outcome::Error {
            kind: ErrorKind::InvalidInput,
            detail,
        } => (StatusCode::NOT_FOUND, STATUS_ERROR, detail, None),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            STATUS_UNAVAILABLE,
            other
                .reason()
                .unwrap_or_else(|| "policy base unavailable".to_string()),
            None,
        ),
    };
    tracing::info!(
        session = %session.id(),
        id_cliente,
        status = status.as_u16(),
        audit_entries = session.audit().len(),
        "customer lookup"
    );

    let body = CustomerResponse {
        estado,
        id_cliente: id_cliente.to_string(),
        marca_de_tiempo: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        mensaje,
        perfil,
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_app(dir: &std::path::Path) -> String {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            mirror_url: "http://127.0.0.1:9/".to_string(),
            census_url: "http://127.0.0.1:9/censo_inegi.csv".to_string(),
            timeout_secs: 5,
            ..Settings::default()
        };
        let client = settings.http_client().unwrap();
        let app = router(AppState { settings, client });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
        format!("http://{addr}")
    }

    async fn get_json(url: &str) -> (u16, Value) {
        let response = reqwest::get(url).await.expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }

    fn seed_policies(dir: &std::path::Path) {
        std::fs::write(
            dir.join("madoli_base.csv"),
            "id_cliente,contratante,producto,premium_mxn,end_date\n\
             C1,Ana Torres,GMM,1200,2025-01-01\n\
             C1,Ana Torres,AUTOS,800,\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(dir.path()).await;
        let (status, body) = get_json(&format!("{base}/healthz")).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "estado": "OK" }));
    }

    #[tokio::test]
    async fn known_customer_uses_canonical_fields() {
        let dir = tempfile::tempdir().unwrap();
        seed_policies(dir.path());
        let base = spawn_app(dir.path()).await;

        let (status, body) = get_json(&format!("{base}/v1/clientes/C1")).await;
        assert_eq!(status, 200);
        assert_eq!(body["estado"], "OK");
        assert_eq!(body["id_cliente"], "C1");
        assert!(body["marca_de_tiempo"].as_str().unwrap().ends_with('Z'));
        assert!(body.get("mensaje").is_some());
        assert!(body.get("perfil").is_none());
    }

    #[tokio::test]
    async fn profile_endpoint_embeds_profile() {
        let dir = tempfile::tempdir().unwrap();
        seed_policies(dir.path());
        let base = spawn_app(dir.path()).await;

        let (status, body) = get_json(&format!("{base}/v1/clientes/C1/perfil")).await;
        assert_eq!(status, 200);
        let perfil = &body["perfil"];
        assert_eq!(perfil["contractor_name"], "Ana Torres");
        assert_eq!(perfil["policy_count"], 2);
        assert_eq!(perfil["premium_total"], 2000.0);
        assert_eq!(perfil["classification"], "En riesgo");
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        seed_policies(dir.path());
        let base = spawn_app(dir.path()).await;

        let (status, body) = get_json(&format!("{base}/v1/clientes/C404")).await;
        assert_eq!(status, 404);
        assert_eq!(body["estado"], "ERROR");
        assert_eq!(body["id_cliente"], "C404");
    }

    #[tokio::test]
    async fn missing_base_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(dir.path()).await;

        let (status, body) = get_json(&format!("{base}/v1/clientes/C1/perfil")).await;
        assert_eq!(status, 503);
        assert_eq!(body["estado"], "NO_DISPONIBLE");
        assert!(body.get("perfil").is_none());
    }
}
