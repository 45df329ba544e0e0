//! In-memory fakes for the external collaborators, shared across the
//! unit tests. No network, no database.

use std::collections::{ HashMap, HashSet };
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use async_trait::async_trait;
use sea_orm::prelude::Decimal;

use crate::chain::{ FundingRequest, SettlementChain, SettlementReceipt, SubmissionRef };
use crate::db::entity::investment::InvestmentMetadata;
use crate::db::{ LedgerStore, MemoryLedger };
use crate::enums::{ Currency, PaymentMethod };
use crate::error::{ AppError, Result };
use crate::projects::{ ProjectDirectory, ProjectInfo };
use crate::rails::{ PaymentRail, RailCheck, RailOutcome, RailSession, WalletRail, PaymentProof };
use crate::services::{ CreateInvestment, InvestmentService };

pub const USER: &str = "user-1";
pub const USER_ADDRESS: &str = "0x00000000000000000000000000000000000000a1";
pub const PROJECT: i64 = 7;
pub const FUND_CONTRACT: &str = "0x00000000000000000000000000000000000000f1";

// ─── Gateway rail fake ───────────────────────────────────────────────

pub struct FakeGatewayRail {
    counter: AtomicUsize,
    pub initiate_transient: AtomicBool,
    verify_results: Mutex<HashMap<String, RailCheck>>,
}

impl FakeGatewayRail {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            initiate_transient: AtomicBool::new(false),
            verify_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn script_verify(&self, reference: &str, check: RailCheck) {
        self.verify_results.lock().unwrap().insert(reference.to_string(), check);
    }

    pub fn sessions_created(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRail for FakeGatewayRail {
    async fn initiate(&self, _investment: &crate::db::entity::investment::Model) -> Result<RailSession> {
        if self.initiate_transient.load(Ordering::SeqCst) {
            return Err(AppError::Transient("gateway down".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let reference = format!("pm-{}", n);
        Ok(RailSession {
            payment_url: Some(format!("https://gateway.test/pay/{}", reference)),
            reference,
        })
    }

    async fn verify(&self, session_ref: &str) -> Result<RailCheck> {
        Ok(
            self.verify_results
                .lock()
                .unwrap()
                .get(session_ref)
                .cloned()
                .unwrap_or(RailCheck { outcome: RailOutcome::Pending, proof: None })
        )
    }
}

// ─── Chain fake ──────────────────────────────────────────────────────

pub struct FakeChain {
    counter: AtomicUsize,
    pub submit_transient: AtomicBool,
    submissions: Mutex<Vec<FundingRequest>>,
    funded_keys: Mutex<HashSet<[u8; 32]>>,
    receipts: Mutex<HashMap<String, SettlementReceipt>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            submit_transient: AtomicBool::new(false),
            submissions: Mutex::new(Vec::new()),
            funded_keys: Mutex::new(HashSet::new()),
            receipts: Mutex::new(HashMap::new()),
        }
    }

    pub fn script_receipt(&self, tx_hash: &str, receipt: SettlementReceipt) {
        self.receipts.lock().unwrap().insert(tx_hash.to_string(), receipt);
    }

    pub fn mark_funded(&self, key: [u8; 32]) {
        self.funded_keys.lock().unwrap().insert(key);
    }

    pub fn submissions(&self) -> Vec<FundingRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn last_submitted_hash(&self) -> Option<String> {
        let n = self.counter.load(Ordering::SeqCst);
        if n == 0 {
            None
        } else {
            Some(format!("0xfeed{:04x}", n - 1))
        }
    }
}

#[async_trait]
impl SettlementChain for FakeChain {
    async fn submit_funding(&self, request: &FundingRequest) -> Result<SubmissionRef> {
        if self.submit_transient.load(Ordering::SeqCst) {
            return Err(AppError::Transient("rpc down".to_string()));
        }
        if self.funded_keys.lock().unwrap().contains(&request.funding_key) {
            return Err(
                AppError::Conflict(
                    "Funding key already funded on chain without a recorded settlement".to_string()
                )
            );
        }
        self.submissions.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SubmissionRef(format!("0xfeed{:04x}", n)))
    }

    async fn receipt(&self, submission: &SubmissionRef) -> Result<SettlementReceipt> {
        Ok(
            self.receipts
                .lock()
                .unwrap()
                .get(&submission.0)
                .cloned()
                .unwrap_or(SettlementReceipt::Pending)
        )
    }
}

// ─── Project directory fake ──────────────────────────────────────────

pub struct StaticProjects {
    projects: Mutex<HashMap<i64, ProjectInfo>>,
}

impl StaticProjects {
    pub fn new() -> Self {
        let mut projects = HashMap::new();
        projects.insert(PROJECT, ProjectInfo {
            id: PROJECT,
            open: true,
            currency: Currency::Tnd,
            investor_cap: None,
            fund_contract: FUND_CONTRACT.to_string(),
        });
        Self { projects: Mutex::new(projects) }
    }

    pub fn set(&self, info: ProjectInfo) {
        self.projects.lock().unwrap().insert(info.id, info);
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjects {
    async fn project(&self, project_id: i64) -> Result<ProjectInfo> {
        self.projects
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Project {} is not registered", project_id)))
    }
}

// ─── Harness ─────────────────────────────────────────────────────────

pub struct TestHarness {
    pub ledger: Arc<MemoryLedger>,
    pub gateway: Arc<FakeGatewayRail>,
    pub chain: Arc<FakeChain>,
    pub projects: Arc<StaticProjects>,
    pub service: Arc<InvestmentService>,
}

pub fn harness() -> TestHarness {
    let ledger = Arc::new(MemoryLedger::new());
    let gateway = Arc::new(FakeGatewayRail::new());
    let chain = Arc::new(FakeChain::new());
    let projects = Arc::new(StaticProjects::new());

    let ledger_dyn: Arc<dyn LedgerStore> = ledger.clone();
    let wallet_rail = Arc::new(WalletRail::new(ledger_dyn.clone()));

    let service = Arc::new(
        InvestmentService::new(
            ledger_dyn,
            wallet_rail,
            gateway.clone(),
            gateway.clone(),
            chain.clone(),
            projects.clone()
        )
    );

    TestHarness {
        ledger,
        gateway,
        chain,
        projects,
        service,
    }
}

pub fn tnd(amount: &str) -> Decimal {
    amount.parse().unwrap()
}

pub fn create_request(method: PaymentMethod) -> CreateInvestment {
    CreateInvestment {
        project_id: PROJECT,
        amount: tnd("1000"),
        currency: Currency::Tnd,
        payment_method: method,
        user_address: USER_ADDRESS.to_string(),
        metadata: Some(InvestmentMetadata::default()),
    }
}

pub fn proof(amount: &str, gateway_ref: Option<&str>) -> PaymentProof {
    PaymentProof {
        gateway_ref: gateway_ref.map(|s| s.to_string()),
        amount: tnd(amount),
        currency: Currency::Tnd,
    }
}

/// Seed a wallet balance through the normal credit path.
pub async fn seed_wallet(ledger: &MemoryLedger, user: &str, amount: &str) {
    ledger
        .credit_wallet(
            user,
            Currency::Tnd,
            tnd(amount),
            crate::enums::WalletEntryKind::AdjustmentCredit,
            None
        ).await
        .unwrap();
}

/// Tiny deterministic generator for randomized transition sequences.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9e3779b97f4a7c15 } else { seed })
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}
