use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::Abi,
    middleware::SignerMiddleware,
    providers::{ Http, Middleware, Provider },
    signers::{ LocalWallet, Signer },
    types::{ Address, H256, U256 },
};
use lazy_static::lazy_static;

use crate::chain::{ from_minor_units, FundingRequest, SettlementChain, SettlementReceipt, SubmissionRef };
use crate::config::ChainConfig;
use crate::enums::Currency;
use crate::error::{ AppError, Result };
use crate::projects::{ ProjectDirectory, ProjectInfo };

lazy_static! {
    // Fragments of the deployed contract ABIs this service actually calls.
    static ref INVESTMENT_MANAGER_ABI: Abi = ethers::abi
        ::parse_abi(
            &[
                "function fundInvestment(bytes32 fundingKey, uint256 projectId, address investor, uint256 amountMinor) external",
                "function isFunded(bytes32 fundingKey) external view returns (bool)",
            ]
        )
        .expect("InvestmentManager ABI fragments parse");

    static ref PROJECT_REGISTRY_ABI: Abi = ethers::abi
        ::parse_abi(
            &[
                "function isOpen(uint256 projectId) external view returns (bool)",
                "function projectCurrency(uint256 projectId) external view returns (string)",
                "function investorCap(uint256 projectId) external view returns (uint256)",
                "function fundContract(uint256 projectId) external view returns (address)",
            ]
        )
        .expect("ProjectRegistry ABI fragments parse");
}

type EvmClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Settlement client over the per-project fund contracts (each one an
/// InvestmentManager deployment), signing with the platform operator key.
pub struct EvmSettlementClient {
    client: Arc<EvmClient>,
}

impl EvmSettlementClient {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>
            ::try_from(config.rpc_url.as_str())
            .map_err(|e| AppError::Config(format!("Invalid chain RPC URL: {}", e)))?;

        let wallet: LocalWallet = config.operator_private_key
            .parse()
            .map_err(|_| AppError::Config("Invalid operator private key".to_string()))?;

        let client = SignerMiddleware::new(provider, wallet.with_chain_id(config.chain_id));

        Ok(Self { client: Arc::new(client) })
    }

    fn contract(&self, address: &str) -> Result<ethers::contract::Contract<EvmClient>> {
        let address: Address = address
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid fund contract address: {}", address)))?;
        Ok(ethers::contract::Contract::new(address, INVESTMENT_MANAGER_ABI.clone(), self.client.clone()))
    }
}

#[async_trait]
impl SettlementChain for EvmSettlementClient {
    async fn submit_funding(&self, request: &FundingRequest) -> Result<SubmissionRef> {
        let contract = self.contract(&request.contract_address)?;

        let investor: Address = request.investor_address
            .parse()
            .map_err(|_| AppError::validation("Invalid investor address", "user_address"))?;

        let project_id = u64
            ::try_from(request.project_id)
            .map_err(|_| AppError::validation("Invalid project id", "project_id"))?;

        // Duplicate-submission guard on top of the deterministic key: if the
        // key is already funded, a second transaction would revert anyway.
        let funded: bool = contract
            .method::<_, bool>("isFunded", request.funding_key)
            .map_err(|e| AppError::Internal(format!("isFunded call build failed: {}", e)))?
            .call().await
            .map_err(|e| AppError::Transient(format!("isFunded query failed: {}", e)))?;

        if funded {
            return Err(
                AppError::Conflict(
                    "Funding key already funded on chain without a recorded settlement".to_string()
                )
            );
        }

        let call = contract
            .method::<_, ()>(
                "fundInvestment",
                (
                    request.funding_key,
                    U256::from(project_id),
                    investor,
                    U256::from(request.amount_minor),
                )
            )
            .map_err(|e| AppError::Internal(format!("fundInvestment call build failed: {}", e)))?;

        let pending = call
            .send().await
            .map_err(|e| AppError::Transient(format!("fundInvestment submission failed: {}", e)))?;

        Ok(SubmissionRef(format!("{:#x}", pending.tx_hash())))
    }

    async fn receipt(&self, submission: &SubmissionRef) -> Result<SettlementReceipt> {
        let hash: H256 = submission.0
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid submission hash: {}", submission.0)))?;

        let receipt = self.client
            .get_transaction_receipt(hash).await
            .map_err(|e| AppError::Transient(format!("Receipt query failed: {}", e)))?;

        let receipt = match receipt {
            Some(r) => r,
            None => {
                return Ok(SettlementReceipt::Pending);
            }
        };

        match receipt.status.map(|s| s.as_u64()) {
            Some(1) => {
                let block_number = receipt.block_number
                    .map(|b| b.as_u64() as i64)
                    .ok_or_else(|| {
                        AppError::Transient("Mined receipt missing block number".to_string())
                    })?;
                Ok(SettlementReceipt::Mined {
                    tx_hash: format!("{:#x}", receipt.transaction_hash),
                    block_number,
                })
            }
            Some(0) => {
                Ok(SettlementReceipt::Reverted {
                    tx_hash: format!("{:#x}", receipt.transaction_hash),
                })
            }
            _ => Ok(SettlementReceipt::Pending),
        }
    }
}

/// Project directory backed by the on-chain ProjectRegistry views.
pub struct EvmProjectDirectory {
    provider: Arc<Provider<Http>>,
    registry_address: Address,
}

impl EvmProjectDirectory {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>
            ::try_from(config.rpc_url.as_str())
            .map_err(|e| AppError::Config(format!("Invalid chain RPC URL: {}", e)))?;

        let registry_address: Address = config.project_registry_address
            .parse()
            .map_err(|_| AppError::Config("Invalid project registry address".to_string()))?;

        Ok(Self {
            provider: Arc::new(provider),
            registry_address,
        })
    }

    fn registry(&self) -> ethers::contract::Contract<Provider<Http>> {
        ethers::contract::Contract::new(
            self.registry_address,
            PROJECT_REGISTRY_ABI.clone(),
            self.provider.clone()
        )
    }
}

#[async_trait]
impl ProjectDirectory for EvmProjectDirectory {
    async fn project(&self, project_id: i64) -> Result<ProjectInfo> {
        let registry = self.registry();
        let id = u64
            ::try_from(project_id)
            .map_err(|_| AppError::validation("Invalid project id", "project_id"))?;
        let id = U256::from(id);

        let open: bool = registry
            .method::<_, bool>("isOpen", id)
            .map_err(|e| AppError::Internal(format!("isOpen call build failed: {}", e)))?
            .call().await
            .map_err(|e| AppError::Transient(format!("isOpen query failed: {}", e)))?;

        let currency: String = registry
            .method::<_, String>("projectCurrency", id)
            .map_err(|e| AppError::Internal(format!("projectCurrency call build failed: {}", e)))?
            .call().await
            .map_err(|e| AppError::Transient(format!("projectCurrency query failed: {}", e)))?;
        let currency = Currency::from_str(&currency)?;

        let cap: U256 = registry
            .method::<_, U256>("investorCap", id)
            .map_err(|e| AppError::Internal(format!("investorCap call build failed: {}", e)))?
            .call().await
            .map_err(|e| AppError::Transient(format!("investorCap query failed: {}", e)))?;

        // A zero cap on the registry means "no per-investor limit".
        let investor_cap = if cap.is_zero() {
            None
        } else {
            Some(from_minor_units(cap.as_u128(), currency)?)
        };

        let fund_contract: Address = registry
            .method::<_, Address>("fundContract", id)
            .map_err(|e| AppError::Internal(format!("fundContract call build failed: {}", e)))?
            .call().await
            .map_err(|e| AppError::Transient(format!("fundContract query failed: {}", e)))?;

        if fund_contract == Address::zero() {
            return Err(AppError::NotFound(format!("Project {} is not registered", project_id)));
        }

        Ok(ProjectInfo {
            id: project_id,
            open,
            currency,
            investor_cap,
            fund_contract: format!("{:#x}", fund_contract),
        })
    }
}
