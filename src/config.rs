use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Base URL of the x402 payment facilitator
    pub facilitator_url: String,
    /// JSON-RPC endpoint of the EVM network the asset contract lives on
    pub rpc_url: String,
    /// Network identifier recorded on payment rows ("hedera-testnet" | "hedera-mainnet")
    pub network: String,
    /// Address of the asset (token) contract payments are denominated in
    pub payment_asset: String,
    /// Decimals of the payment asset
    pub asset_decimals: u32,
    /// Scheduler sweep interval in minutes
    pub scheduler_interval_minutes: u64,
    /// Number of concurrent worker slots pulling from the job queue
    pub worker_slots: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/autopay".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            facilitator_url: std::env::var("FACILITATOR_URL")
                .unwrap_or_else(|_| "http://localhost:4021".to_string()),
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "https://testnet.hashio.io/api".to_string()),
            network: std::env::var("NETWORK")
                .unwrap_or_else(|_| "hedera-testnet".to_string()),
            payment_asset: std::env::var("PAYMENT_ASSET")
                .unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".to_string()),
            asset_decimals: std::env::var("ASSET_DECIMALS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6),
            scheduler_interval_minutes: std::env::var("SCHEDULER_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            worker_slots: std::env::var("WORKER_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        })
    }

    /// EVM chain id for the configured network
    pub fn chain_id(&self) -> u64 {
        match self.network.as_str() {
            "hedera-mainnet" => 295,
            _ => 296,
        }
    }
}
