//! Simulation scenarios.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
///
/// Clients are named by their simulator label (`ALICE`, `BOB`, ...). Amounts
/// and currencies are strings so scenario files stay human-editable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { seconds: u64 },
    /// Credit external funds.
    Deposit {
        client: String,
        amount: String,
        currency: String,
    },
    /// Create an offer and redeem it once.
    Exchange {
        client: String,
        amount: String,
        from: String,
        to: String,
    },
    /// Redeem one offer from many tasks at once.
    RedemptionRace {
        client: String,
        amount: String,
        from: String,
        to: String,
        attempts: usize,
    },
    /// Redeem many offers in both directions of one pair concurrently.
    OpposingExchanges {
        client: String,
        amount: String,
        first: String,
        second: String,
        pairs: usize,
    },
    /// Create an offer, outlive it, then try to redeem.
    Expiry {
        client: String,
        amount: String,
        from: String,
        to: String,
    },
    /// Walk a client's accounts page by page.
    PaginationWalk { client: String, page_size: i64 },
    /// Inject a fault.
    InjectFault { fault: FaultType },
    /// Clear every injected fault.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultType {
    /// Quote provider rejects every request.
    QuoteOutage,
    /// Quote provider answers slowly.
    QuoteLatency { delay_ms: u64 },
    /// Offer cache rejects every request.
    CacheOutage,
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssertCondition {
    /// Client balance equals.
    BalanceEquals {
        client: String,
        currency: String,
        amount: String,
    },
    /// Every posted transaction so far passes the consistency check.
    LedgerConsistent,
}

impl Scenario {
    /// Built-in scenario names.
    pub const BUILT_IN: &'static [&'static str] = &[
        "simple-exchange",
        "redemption-race",
        "opposing-exchanges",
        "pagination",
        "expiry",
        "failure-recovery",
    ];

    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "simple-exchange" => Ok(Self::simple_exchange()),
            "redemption-race" => Ok(Self::redemption_race()),
            "opposing-exchanges" => Ok(Self::opposing_exchanges()),
            "pagination" => Ok(Self::pagination()),
            "expiry" => Ok(Self::expiry()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                Self::BUILT_IN.join(", ")
            )),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing scenario file {}", path.display()))
    }

    /// USD to CAD at the seeded rate, checked against both balances.
    fn simple_exchange() -> Self {
        Self {
            name: "simple-exchange".to_string(),
            description: "One fiat exchange with balance checks".to_string(),
            steps: vec![
                ScenarioStep::Exchange {
                    client: "ALICE".to_string(),
                    amount: "100.00".to_string(),
                    from: "USD".to_string(),
                    to: "CAD".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        client: "ALICE".to_string(),
                        currency: "USD".to_string(),
                        amount: "9900.00".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        client: "ALICE".to_string(),
                        currency: "CAD".to_string(),
                        amount: "135.00".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LedgerConsistent,
                },
            ],
        }
    }

    fn redemption_race() -> Self {
        Self {
            name: "redemption-race".to_string(),
            description: "Concurrent redemptions of one offer settle once".to_string(),
            steps: vec![
                ScenarioStep::RedemptionRace {
                    client: "ALICE".to_string(),
                    amount: "100.00".to_string(),
                    from: "USD".to_string(),
                    to: "EUR".to_string(),
                    attempts: 32,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        client: "ALICE".to_string(),
                        currency: "USD".to_string(),
                        amount: "9900.00".to_string(),
                    },
                },
            ],
        }
    }

    fn opposing_exchanges() -> Self {
        Self {
            name: "opposing-exchanges".to_string(),
            description: "USD/EUR exchanges in both directions lock in one order".to_string(),
            steps: vec![
                ScenarioStep::Exchange {
                    client: "BOB".to_string(),
                    amount: "1000.00".to_string(),
                    from: "USD".to_string(),
                    to: "EUR".to_string(),
                },
                ScenarioStep::OpposingExchanges {
                    client: "BOB".to_string(),
                    amount: "10.00".to_string(),
                    first: "USD".to_string(),
                    second: "EUR".to_string(),
                    pairs: 50,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::LedgerConsistent,
                },
            ],
        }
    }

    fn pagination() -> Self {
        Self {
            name: "pagination".to_string(),
            description: "Walk account pages through encrypted cursors".to_string(),
            steps: vec![ScenarioStep::PaginationWalk {
                client: "ALICE".to_string(),
                page_size: 2,
            }],
        }
    }

    fn expiry() -> Self {
        Self {
            name: "expiry".to_string(),
            description: "An offer outlived by its client cannot be redeemed".to_string(),
            steps: vec![
                ScenarioStep::Expiry {
                    client: "CAROL".to_string(),
                    amount: "50.00".to_string(),
                    from: "USD".to_string(),
                    to: "GBP".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        client: "CAROL".to_string(),
                        currency: "USD".to_string(),
                        amount: "10000.00".to_string(),
                    },
                },
            ],
        }
    }

    /// Failure and recovery scenario.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Collaborator outages are transient and recoverable".to_string(),
            steps: vec![
                ScenarioStep::InjectFault {
                    fault: FaultType::QuoteOutage,
                },
                // Fails with a retryable error
                ScenarioStep::Exchange {
                    client: "ALICE".to_string(),
                    amount: "100.00".to_string(),
                    from: "USD".to_string(),
                    to: "CAD".to_string(),
                },
                ScenarioStep::ClearFaults,
                ScenarioStep::InjectFault {
                    fault: FaultType::CacheOutage,
                },
                ScenarioStep::Exchange {
                    client: "ALICE".to_string(),
                    amount: "100.00".to_string(),
                    from: "USD".to_string(),
                    to: "CAD".to_string(),
                },
                ScenarioStep::ClearFaults,
                ScenarioStep::Exchange {
                    client: "ALICE".to_string(),
                    amount: "100.00".to_string(),
                    from: "USD".to_string(),
                    to: "CAD".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        client: "ALICE".to_string(),
                        currency: "USD".to_string(),
                        amount: "9900.00".to_string(),
                    },
                },
            ],
        }
    }
}
