//! Simulation workloads.

use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use cafeledger_common::AccountId;
use cafeledger_ledger::Operation;

/// Shape of the generated traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// Mixed operations spread over every account.
    Uniform,
    /// Every operation touches one hot account.
    Contention,
    /// Withdrawals and transfers sized to exceed balances.
    Overdraw,
}

impl FromStr for Workload {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Workload::Uniform),
            "contention" => Ok(Workload::Contention),
            "overdraw" => Ok(Workload::Overdraw),
            other => Err(anyhow::anyhow!("Unknown workload: {other}")),
        }
    }
}

/// Parameters for generating a batch of operations.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    /// Traffic shape.
    pub workload: Workload,
    /// Accounts to draw from.
    pub accounts: Vec<AccountId>,
    /// Number of operations to generate.
    pub operations: usize,
    /// Largest amount per operation.
    pub max_amount: i64,
    /// Share of operations with a non-positive amount.
    pub invalid_rate: f64,
}

impl WorkloadSpec {
    /// Generate the operations.
    pub fn generate(&self, rng: &mut impl Rng) -> Vec<Operation> {
        (0..self.operations)
            .map(|_| self.next_operation(rng))
            .collect()
    }

    fn next_operation(&self, rng: &mut impl Rng) -> Operation {
        let max_amount = self.max_amount.max(1);
        let mut amount = match self.workload {
            Workload::Overdraw => rng.gen_range(max_amount..=max_amount.saturating_mul(4)),
            _ => rng.gen_range(1..=max_amount),
        };
        if rng.gen_bool(self.invalid_rate.clamp(0.0, 1.0)) {
            amount = -rng.gen_range(0..=max_amount);
        }

        let sender = self.pick(rng);
        let receiver = match self.workload {
            Workload::Contention => self.pick(rng),
            _ => self.pick_other(rng, sender),
        };

        match rng.gen_range(0..10) {
            0..=2 => Operation::Deposit {
                account_id: sender,
                amount,
            },
            3..=5 => Operation::Withdraw {
                account_id: sender,
                amount,
            },
            _ => Operation::Transfer {
                sender_id: sender,
                receiver_id: receiver,
                amount,
            },
        }
    }

    fn pick(&self, rng: &mut impl Rng) -> AccountId {
        match self.workload {
            // Half of all picks land on the first account.
            Workload::Contention if rng.gen_bool(0.5) => self.accounts[0],
            _ => self.accounts[rng.gen_range(0..self.accounts.len())],
        }
    }

    fn pick_other(&self, rng: &mut impl Rng, not: AccountId) -> AccountId {
        if self.accounts.len() < 2 {
            return not;
        }
        loop {
            let candidate = self.pick(rng);
            if candidate != not {
                return candidate;
            }
        }
    }
}
