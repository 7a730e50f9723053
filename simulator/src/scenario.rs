//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A simulation scenario.
///
/// Accounts are referred to by index into the simulated account set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Minimum number of accounts the steps need.
    pub accounts: usize,
    /// Overrides the CLI funding amount when set.
    #[serde(default)]
    pub initial_balance: Option<u64>,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Credit an account.
    TopUp { account: usize, amount: u64 },
    /// Debit an account.
    Withdraw { account: usize, amount: u64 },
    /// Move funds between two accounts.
    Transfer { from: usize, to: usize, amount: u64 },
    /// Run `repeat` copies of an operation step at once.
    Concurrent { repeat: usize, operation: Box<ScenarioStep> },
    /// Random operations spread over the workers.
    RandomLoad { operations: usize },
    /// Check a condition; a failed assertion fails the run.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum AssertCondition {
    /// Account balance equals.
    BalanceEquals { account: usize, amount: u64 },
    /// Number of records naming the account.
    RecordCount { account: usize, count: usize },
    /// Failures carrying an error code, counted since the run began.
    FailuresAtLeast { code: String, count: u64 },
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "transfer-basic" => Ok(Self::transfer_basic()),
            "double-spend" => Ok(Self::double_spend()),
            "hot-account" => Ok(Self::hot_account()),
            path if path.ends_with(".json") => Self::from_file(path),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Read a scenario from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let scenario: Scenario = serde_json::from_str(&raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check that every step refers to an existing account.
    pub fn validate(&self) -> anyhow::Result<()> {
        for step in &self.steps {
            self.validate_step(step)?;
        }
        Ok(())
    }

    fn validate_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        let check = |index: usize| {
            if index < self.accounts {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "scenario {} refers to account {} but declares {}",
                    self.name,
                    index,
                    self.accounts
                ))
            }
        };

        match step {
            ScenarioStep::TopUp { account, .. } | ScenarioStep::Withdraw { account, .. } => {
                check(*account)
            }
            ScenarioStep::Transfer { from, to, .. } => {
                check(*from)?;
                check(*to)
            }
            ScenarioStep::Concurrent { operation, .. } => match operation.as_ref() {
                ScenarioStep::TopUp { .. }
                | ScenarioStep::Withdraw { .. }
                | ScenarioStep::Transfer { .. } => self.validate_step(operation),
                other => Err(anyhow::anyhow!(
                    "concurrent step must wrap an operation, got {:?}",
                    other
                )),
            },
            ScenarioStep::RandomLoad { .. } => Ok(()),
            ScenarioStep::Assert { condition } => match condition {
                AssertCondition::BalanceEquals { account, .. }
                | AssertCondition::RecordCount { account, .. } => check(*account),
                AssertCondition::FailuresAtLeast { .. } => Ok(()),
            },
        }
    }

    /// Top-up, transfer and withdrawal between two unfunded accounts.
    fn transfer_basic() -> Self {
        Self {
            name: "transfer-basic".to_string(),
            description: "Fund one account, move part of it, withdraw from the receiver".to_string(),
            accounts: 2,
            initial_balance: Some(0),
            steps: vec![
                ScenarioStep::TopUp {
                    account: 0,
                    amount: 1_000,
                },
                ScenarioStep::Transfer {
                    from: 0,
                    to: 1,
                    amount: 300,
                },
                ScenarioStep::Withdraw {
                    account: 1,
                    amount: 100,
                },
                ScenarioStep::Transfer {
                    from: 1,
                    to: 0,
                    amount: 500,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        account: 0,
                        amount: 700,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        account: 1,
                        amount: 200,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::RecordCount {
                        account: 1,
                        count: 2,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::FailuresAtLeast {
                        code: "INSUFFICIENT_FUNDS".to_string(),
                        count: 1,
                    },
                },
            ],
        }
    }

    /// Many concurrent transfers racing to spend the same balance.
    fn double_spend() -> Self {
        Self {
            name: "double-spend".to_string(),
            description: "Ten concurrent transfers of the full balance; at most one lands"
                .to_string(),
            accounts: 2,
            initial_balance: Some(0),
            steps: vec![
                ScenarioStep::TopUp {
                    account: 0,
                    amount: 100,
                },
                ScenarioStep::Concurrent {
                    repeat: 10,
                    operation: Box::new(ScenarioStep::Transfer {
                        from: 0,
                        to: 1,
                        amount: 100,
                    }),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        account: 0,
                        amount: 0,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals {
                        account: 1,
                        amount: 100,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::RecordCount {
                        account: 0,
                        count: 2,
                    },
                },
            ],
        }
    }

    /// Contention on a single account mixed with background load.
    fn hot_account() -> Self {
        Self {
            name: "hot-account".to_string(),
            description: "Concurrent top-ups on one account alongside random load".to_string(),
            accounts: 4,
            initial_balance: None,
            steps: vec![
                ScenarioStep::Concurrent {
                    repeat: 200,
                    operation: Box::new(ScenarioStep::TopUp {
                        account: 0,
                        amount: 1,
                    }),
                },
                ScenarioStep::RandomLoad { operations: 500 },
                ScenarioStep::Concurrent {
                    repeat: 50,
                    operation: Box::new(ScenarioStep::Transfer {
                        from: 0,
                        to: 1,
                        amount: 1,
                    }),
                },
            ],
        }
    }
}
