//! Which networks get a start block, where to reach them, and which adapter speaks their API.
use std::{collections::HashMap, fmt::Display, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    env,
    ledger::{ClientOptions, EvmRpcSource, FetchError, GatewaySource, LedgerSource},
};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkFamily {
    Evm,
    LedgerGateway,
}

impl Display for NetworkFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::LedgerGateway => write!(f, "ledger-gateway"),
        }
    }
}

impl FromStr for NetworkFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evm" => Ok(Self::Evm),
            "ledger-gateway" => Ok(Self::LedgerGateway),
            unknown => Err(format!("unknown network family: {unknown}")),
        }
    }
}

/// A network as configured, endpoint not yet resolved.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct NetworkDefinition {
    pub name: String,
    /// Env var holding the endpoint URL.
    pub endpoint_env_key: String,
    pub family: NetworkFamily,
}

impl NetworkDefinition {
    fn new(name: &str, endpoint_env_key: &str, family: NetworkFamily) -> Self {
        Self {
            name: name.to_string(),
            endpoint_env_key: endpoint_env_key.to_string(),
            family,
        }
    }
}

pub fn default_network_definitions() -> Vec<NetworkDefinition> {
    use NetworkFamily::*;

    vec![
        NetworkDefinition::new("Ethereum", "ETHEREUM_RPC_URL", Evm),
        NetworkDefinition::new("Polygon", "POLYGON_RPC_URL", Evm),
        NetworkDefinition::new("Avalanche", "AVALANCHE_RPC_URL", Evm),
        NetworkDefinition::new("Optimism", "OPTIMISM_RPC_URL", Evm),
        NetworkDefinition::new("Arbitrum", "ARBITRUM_RPC_URL", Evm),
        NetworkDefinition::new("Gnosis", "GNOSIS_RPC_URL", Evm),
        NetworkDefinition::new("Linea", "LINEA_RPC_URL", Evm),
        NetworkDefinition::new("Binance Smart Chain", "BSC_RPC_URL", Evm),
        NetworkDefinition::new("Base", "BASE_RPC_URL", Evm),
        NetworkDefinition::new("Crossbell", "CROSSBELL_RPC_URL", Evm),
        NetworkDefinition::new("VSL", "VSL_RPC_URL", Evm),
        NetworkDefinition::new("X-Layer", "XLAYER_RPC_URL", Evm),
        NetworkDefinition::new("Arweave", "ARWEAVE_RPC_URL", LedgerGateway),
    ]
}

/// Reads a JSON array of network definitions, replacing the built-in table.
pub fn load_network_definitions(path: &Path) -> Result<Vec<NetworkDefinition>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read network definitions from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse network definitions in {}", path.display()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRecord {
    pub name: String,
    pub endpoint: Option<String>,
    pub family: NetworkFamily,
}

impl NetworkRecord {
    pub fn new(name: &str, endpoint: Option<&str>, family: NetworkFamily) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.map(str::to_string),
            family,
        }
    }
}

/// Looks up every endpoint in the environment. Unset or blank endpoints stay `None`, the network
/// then fails when connecting rather than here.
pub fn resolve_endpoints(definitions: &[NetworkDefinition]) -> Vec<NetworkRecord> {
    definitions
        .iter()
        .map(|definition| NetworkRecord {
            name: definition.name.clone(),
            endpoint: env::get_env_var_non_empty(&definition.endpoint_env_key),
            family: definition.family,
        })
        .collect()
}

pub type AdapterConstructor =
    fn(&str, &ClientOptions) -> Result<Box<dyn LedgerSource>, FetchError>;

fn make_evm_source(
    endpoint: &str,
    options: &ClientOptions,
) -> Result<Box<dyn LedgerSource>, FetchError> {
    Ok(Box::new(EvmRpcSource::new(endpoint, options)?))
}

fn make_gateway_source(
    endpoint: &str,
    options: &ClientOptions,
) -> Result<Box<dyn LedgerSource>, FetchError> {
    Ok(Box::new(GatewaySource::new(endpoint, options)?))
}

/// Maps a network family to the constructor of the adapter speaking its API.
pub struct AdapterRegistry {
    constructors: HashMap<NetworkFamily, AdapterConstructor>,
    options: ClientOptions,
}

impl AdapterRegistry {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            constructors: HashMap::new(),
            options,
        }
    }

    pub fn with_adapter(mut self, family: NetworkFamily, constructor: AdapterConstructor) -> Self {
        self.constructors.insert(family, constructor);
        self
    }

    pub fn with_default_adapters(options: ClientOptions) -> Self {
        Self::new(options)
            .with_adapter(NetworkFamily::Evm, make_evm_source)
            .with_adapter(NetworkFamily::LedgerGateway, make_gateway_source)
    }

    pub fn connect(&self, network: &NetworkRecord) -> Result<Box<dyn LedgerSource>, FetchError> {
        let endpoint = network
            .endpoint
            .as_deref()
            .ok_or_else(|| FetchError::Connectivity("no endpoint configured".to_string()))?;

        let constructor = self.constructors.get(&network.family).ok_or_else(|| {
            FetchError::Connectivity(format!("no adapter registered for {}", network.family))
        })?;

        constructor(endpoint, &self.options)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_default_adapters(ClientOptions::default())
    }
}
