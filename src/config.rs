use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use crate::dashboard::ModuleManifest;
use crate::store::{LocalStore, ObjectStore, S3Config, S3Store, StoreError};

/// Command-line / environment configuration for the `tablero` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "tablero")]
#[command(about = "Load dashboard report files from an object store and summarize each module")]
pub struct Args {
    /// S3 / MinIO endpoint, `host:port`.
    #[arg(long, env = "TABLERO_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "TABLERO_ACCESS_KEY", default_value = "")]
    pub access_key: String,

    #[arg(long, env = "TABLERO_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub secret_key: String,

    /// Use https instead of http.
    #[arg(long, env = "TABLERO_SECURE", default_value_t = false)]
    pub secure: bool,

    #[arg(long, env = "TABLERO_REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long, env = "TABLERO_BUCKET", default_value = "repositorio-dashboard")]
    pub bucket: String,

    /// Read buckets from subdirectories of this path instead of S3.
    #[arg(long, env = "TABLERO_LOCAL_ROOT")]
    pub local_root: Option<PathBuf>,

    /// JSON module manifest replacing the built-in one.
    #[arg(long, env = "TABLERO_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Only render these modules (repeatable). Default: all, in tab order.
    #[arg(long = "module")]
    pub modules: Vec<String>,

    /// Include per-column details in summaries.
    #[arg(long, default_value_t = false)]
    pub details: bool,

    /// Print one JSON object per module instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no object store configured: pass --endpoint or --local-root")]
    NoStore,
    #[error("local root {0} is not a directory")]
    BadLocalRoot(PathBuf),
    #[error("unknown module '{0}' (not in manifest)")]
    UnknownModule(String),
    #[error("invalid manifest: {0:#}")]
    Manifest(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Args {
    /// Store selected by the flags: `--local-root` wins, otherwise S3.
    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>, ConfigError> {
        if let Some(root) = &self.local_root {
            if !root.is_dir() {
                return Err(ConfigError::BadLocalRoot(root.clone()));
            }
            log::info!("using local store at {}", root.display());
            return Ok(Arc::new(LocalStore::new(root)));
        }
        let endpoint = self.endpoint.clone().ok_or(ConfigError::NoStore)?;
        log::info!("using object store at {endpoint} (secure={})", self.secure);
        let store = S3Store::new(S3Config {
            endpoint,
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            secure: self.secure,
            region: self.region.clone(),
        })?;
        Ok(Arc::new(store))
    }

    /// The manifest file when given, the built-in modules otherwise. Every
    /// `--module` must name a manifest entry.
    pub fn load_manifest(&self) -> Result<ModuleManifest, ConfigError> {
        let manifest = match &self.manifest {
            Some(path) => ModuleManifest::from_json_file(path).map_err(ConfigError::Manifest)?,
            None => ModuleManifest::builtin(),
        };
        if let Some(unknown) = self.modules.iter().find(|m| manifest.get(m).is_none()) {
            return Err(ConfigError::UnknownModule(unknown.clone()));
        }
        Ok(manifest)
    }
}
