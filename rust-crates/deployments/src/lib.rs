use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Sepolia,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "https://ethereum-sepolia-rpc.publicnode.com",
            DeploymentEnv::Local => "http://127.0.0.1:8545",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_address: String,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub vrf_coordinator: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub deployment_block_height: Option<u64>,
}

impl DeploymentRecord {
    /// Block to start historical log scans from. Records written before the
    /// height was tracked scan from genesis.
    pub fn history_start_block(&self) -> u64 {
        self.deployment_block_height.unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    /// Store under `.deployments/` in the working directory. Nothing is
    /// created on disk until a record is saved.
    pub fn new(env: DeploymentEnv) -> Self {
        Self::at(DEPLOYMENTS_ROOT, env)
    }

    /// Store rooted somewhere other than the working directory.
    pub fn at(root: impl AsRef<Path>, env: DeploymentEnv) -> Self {
        let path = root
            .as_ref()
            .join(env.dir_name())
            .join(DEPLOYMENTS_FILE);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no record has been saved yet.
    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        read_record(&self.path)
    }

    pub fn save(&self, record: DeploymentRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create deployments directory {}", dir.display())
            })?;
        }
        write_record(&self.path, &record)
    }
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.is_empty() || data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

pub fn record_deployment(
    store: &DeploymentStore,
    contract_address: impl AsRef<str>,
    network_url: impl AsRef<str>,
    chain_id: Option<u64>,
    vrf_coordinator: Option<impl AsRef<str>>,
    subscription_id: Option<impl AsRef<str>>,
    deployment_block_height: Option<u64>,
) -> Result<DeploymentRecord> {
    let record = DeploymentRecord {
        deployed_at: Utc::now().to_rfc3339(),
        contract_address: contract_address.as_ref().to_string(),
        network_url: network_url.as_ref().to_string(),
        chain_id,
        vrf_coordinator: vrf_coordinator.map(|c| c.as_ref().to_string()),
        subscription_id: subscription_id.map(|s| s.as_ref().to_string()),
        deployment_block_height,
    };
    store.save(record.clone())?;
    Ok(record)
}
