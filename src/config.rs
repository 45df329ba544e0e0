use std::env;
use std::time::Duration;

/// Blockchain-side configuration: RPC endpoint, signing key, and the
/// deployed registry contracts the settlement client talks to.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub operator_private_key: String,
    pub investment_manager_address: String,
    pub project_registry_address: String,
    pub rpc_timeout: Duration,
}

/// Policy parameters for the state machine and reconciliation worker.
/// Everything here is tunable without code changes.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    /// Age after which a pending investment is re-checked against its rail.
    pub payment_sla: Duration,
    /// Age after which a still-unpaid investment is failed outright.
    pub payment_expiry: Duration,
    /// Age after which a confirmed-but-unsettled investment is re-checked on chain.
    pub chain_sla: Duration,
    /// How long a chain submission may stay unmined before resubmission.
    pub chain_resubmit_after: Duration,
    pub max_payment_attempts: i32,
    pub max_chain_attempts: i32,
    pub reconcile_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub paymee_base_url: String,
    pub paymee_api_token: String,
    pub paymee_webhook_secret: String,
    pub chain_webhook_secret: String,
    pub operator_api_key: String,
    pub gateway_timeout: Duration,
    pub chain: ChainConfig,
    pub policy: SettlementPolicy,
}

fn env_secs(key: &str, default_secs: u64) -> Result<Duration, Box<dyn std::error::Error>> {
    let secs = match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| format!("{} must be an integer (seconds)", key))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}

fn env_i32(key: &str, default: i32) -> Result<i32, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(v) => Ok(v.parse::<i32>().map_err(|_| format!("{} must be an integer", key))?),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?;

        let paymee_base_url = env::var("PAYMEE_BASE_URL")?;
        let paymee_api_token = env::var("PAYMEE_API_TOKEN")?;
        let paymee_webhook_secret = env::var("PAYMEE_WEBHOOK_SECRET")?;
        let chain_webhook_secret = env::var("CHAIN_WEBHOOK_SECRET")?;
        let operator_api_key = env::var("OPERATOR_API_KEY")?;

        let gateway_timeout = env_secs("GATEWAY_TIMEOUT_SECS", 10)?;

        let chain = ChainConfig {
            rpc_url: env::var("CHAIN_RPC_URL")?,
            chain_id: env::var("CHAIN_ID")?.parse()?,
            operator_private_key: env::var("CHAIN_OPERATOR_PRIVATE_KEY")?,
            investment_manager_address: env::var("INVESTMENT_MANAGER_ADDRESS")?,
            project_registry_address: env::var("PROJECT_REGISTRY_ADDRESS")?,
            rpc_timeout: env_secs("CHAIN_RPC_TIMEOUT_SECS", 15)?,
        };

        let policy = SettlementPolicy {
            payment_sla: env_secs("PAYMENT_SLA_SECS", 600)?,
            payment_expiry: env_secs("PAYMENT_EXPIRY_SECS", 86400)?,
            chain_sla: env_secs("CHAIN_SLA_SECS", 300)?,
            chain_resubmit_after: env_secs("CHAIN_RESUBMIT_SECS", 900)?,
            max_payment_attempts: env_i32("MAX_PAYMENT_ATTEMPTS", 5)?,
            max_chain_attempts: env_i32("MAX_CHAIN_ATTEMPTS", 3)?,
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", 120)?,
        };

        if policy.payment_expiry < policy.payment_sla {
            return Err("PAYMENT_EXPIRY_SECS must be >= PAYMENT_SLA_SECS".into());
        }

        Ok(Config {
            database_url,
            server_host,
            server_port,
            paymee_base_url,
            paymee_api_token,
            paymee_webhook_secret,
            chain_webhook_secret,
            operator_api_key,
            gateway_timeout,
            chain,
            policy,
        })
    }
}

#[cfg(test)]
impl SettlementPolicy {
    /// Defaults used by tests; mirrors the env-var fallbacks above.
    pub fn default_for_tests() -> Self {
        SettlementPolicy {
            payment_sla: Duration::from_secs(600),
            payment_expiry: Duration::from_secs(86400),
            chain_sla: Duration::from_secs(300),
            chain_resubmit_after: Duration::from_secs(900),
            max_payment_attempts: 5,
            max_chain_attempts: 3,
            reconcile_interval: Duration::from_secs(120),
        }
    }
}
