use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

pub const DEFAULT_MIRROR_URL: &str =
    "https://raw.githubusercontent.com/ibarrasuarez22-ux/madoli360_streamlit/main/";
pub const DEFAULT_CENSUS_URL: &str =
    "https://storage.googleapis.com/madoli360-archivos/censo_inegi.csv";
pub const DEFAULT_NOTIFY_URL: &str =
    "https://madoli360.bubbleapps.io/api/1.1/wf/actualizar_cliente";

/// Where datasets come from and where promotions go. Shared by every
/// subcommand and by the HTTP service.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding the local copies of the CSV datasets
    #[arg(long, env = "MADOLI_DATA_DIR", default_value = "./data", global = true)]
    pub data_dir: PathBuf,

    /// Base URL of the raw-file mirror; the dataset file name is appended
    #[arg(long, env = "MADOLI_MIRROR_URL", default_value = DEFAULT_MIRROR_URL, global = true)]
    pub mirror_url: String,

    /// Public object-storage URL of the census dataset
    #[arg(long, env = "MADOLI_CENSUS_URL", default_value = DEFAULT_CENSUS_URL, global = true)]
    pub census_url: String,

    /// Endpoint receiving suggested promotions
    #[arg(long, env = "MADOLI_NOTIFY_URL", default_value = DEFAULT_NOTIFY_URL, global = true)]
    pub notify_url: String,

    /// Per-request timeout for remote fetches and deliveries
    #[arg(long, env = "MADOLI_HTTP_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            mirror_url: DEFAULT_MIRROR_URL.to_string(),
            census_url: DEFAULT_CENSUS_URL.to_string(),
            notify_url: DEFAULT_NOTIFY_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn mirror_url_for(&self, file_name: &str) -> String {
        if self.mirror_url.ends_with('/') {
            format!("{}{}", self.mirror_url, file_name)
        } else {
            format!("{}/{}", self.mirror_url, file_name)
        }
    }

    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout())
            .build()?;
        Ok(client)
    }
}
