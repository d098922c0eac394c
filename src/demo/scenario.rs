//! Named propagation scenarios.
//!
//! Each scenario runs on a fresh backend and records the checks it made, so
//! the binary can print what happened and whether it matched expectations.

use serde::Serialize;
use tracing::info;

use crate::backend::MemoryBackend;
use crate::demo::service::{MemberService, ServiceResult, TxWiring};
use crate::demo::{Chain, LOG_FAILURE_MARKER};
use crate::transaction::{
    CoordinatorConfig, CoordinatorStats, LogicalScope, Propagation, TransactionRecord, TxState,
};

type RunFn = fn(&mut Chain, &mut ScenarioReport) -> ServiceResult<()>;

/// Fewest finished transactions a run keeps, so checks can read every outcome.
const MIN_HISTORY: usize = 16;

/// A named, self-checking walk through the coordinator.
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    body: RunFn,
}

impl Scenario {
    /// Run on a fresh in-memory backend.
    ///
    /// A configured `history_limit` below `MIN_HISTORY` is raised for the run.
    pub fn run(&self, config: &CoordinatorConfig) -> ScenarioReport {
        let history_limit = config.history_limit.max(MIN_HISTORY);
        let config = config.clone().history_limit(history_limit);
        let mut chain = Chain::with_config(MemoryBackend::new(), config);
        let mut report = ScenarioReport::new(self.name);

        if let Err(err) = (self.body)(&mut chain, &mut report) {
            report.error = Some(err.to_string());
        }
        report.transactions = chain.history().cloned().collect();
        report.stats = chain.stats();
        report
    }
}

/// One expectation checked by a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub description: String,
    pub passed: bool,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub checks: Vec<Check>,
    /// Error that escaped the scenario, if any.
    pub error: Option<String>,
    pub transactions: Vec<TransactionRecord>,
    pub stats: CoordinatorStats,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checks: Vec::new(),
            error: None,
            transactions: Vec::new(),
            stats: CoordinatorStats::default(),
        }
    }

    fn check(&mut self, description: impl Into<String>, passed: bool) {
        self.checks.push(Check {
            description: description.into(),
            passed,
        });
    }

    /// Whether every check held and nothing escaped.
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.checks.iter().all(|c| c.passed)
    }
}

/// All scenarios, in presentation order.
pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "commit",
        description: "begin and commit one transaction",
        body: commit,
    },
    Scenario {
        name: "rollback",
        description: "begin and roll back one transaction",
        body: rollback,
    },
    Scenario {
        name: "double_commit",
        description: "two sequential transactions, both committed",
        body: double_commit,
    },
    Scenario {
        name: "double_commit_rollback",
        description: "two sequential transactions, the second rolled back",
        body: double_commit_rollback,
    },
    Scenario {
        name: "inner_commit",
        description: "inner REQUIRED scope joins; its commit does nothing",
        body: inner_commit,
    },
    Scenario {
        name: "outer_rollback",
        description: "inner commits, outer rolls back everything",
        body: outer_rollback,
    },
    Scenario {
        name: "inner_rollback",
        description: "inner REQUIRED rollback dooms the outer commit",
        body: inner_rollback,
    },
    Scenario {
        name: "inner_rollback_requires_new",
        description: "inner REQUIRES_NEW rollback leaves the outer transaction alone",
        body: inner_rollback_requires_new,
    },
    Scenario {
        name: "outer_tx_off_success",
        description: "repositories transactional, service not; both saved",
        body: outer_tx_off_success,
    },
    Scenario {
        name: "outer_tx_off_fail",
        description: "repositories transactional, service not; log fails, member kept",
        body: outer_tx_off_fail,
    },
    Scenario {
        name: "single_tx",
        description: "only the service is transactional; one physical transaction",
        body: single_tx,
    },
    Scenario {
        name: "outer_tx_on_success",
        description: "every layer REQUIRED; both saved in one transaction",
        body: outer_tx_on_success,
    },
    Scenario {
        name: "outer_tx_on_fail",
        description: "every layer REQUIRED; log fails, everything rolled back",
        body: outer_tx_on_fail,
    },
    Scenario {
        name: "recover_exception_fail",
        description: "service swallows the log failure, commit still rolls back",
        body: recover_exception_fail,
    },
    Scenario {
        name: "recover_exception_success",
        description: "log repository REQUIRES_NEW; member kept, log rolled back",
        body: recover_exception_success,
    },
    Scenario {
        name: "internal_call",
        description: "call transactional work directly; transaction active inside",
        body: internal_call,
    },
    Scenario {
        name: "external_call",
        description: "non-transactional caller invokes transactional work; scope still applies",
        body: external_call,
    },
];

/// Look up a scenario by name.
pub fn find_scenario(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

/// Run every scenario.
pub fn run_all(config: &CoordinatorConfig) -> Vec<ScenarioReport> {
    SCENARIOS.iter().map(|s| s.run(config)).collect()
}

fn state_of(chain: &Chain, scope: &LogicalScope) -> Option<TxState> {
    chain.completed(scope.transaction_id()).map(|r| r.state)
}

fn failing(name: &str) -> String {
    format!("{}_{}", LOG_FAILURE_MARKER, name)
}

// ==================== Basic scopes ====================

fn commit(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let tx = chain.begin(Propagation::Required)?;
    chain.commit(&tx)?;
    report.check("transaction committed", state_of(chain, &tx) == Some(TxState::Committed));
    Ok(())
}

fn rollback(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let tx = chain.begin(Propagation::Required)?;
    chain.rollback(&tx)?;
    report.check("transaction rolled back", state_of(chain, &tx) == Some(TxState::RolledBack));
    Ok(())
}

fn double_commit(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let tx1 = chain.begin(Propagation::Required)?;
    chain.commit(&tx1)?;
    let tx2 = chain.begin(Propagation::Required)?;
    chain.commit(&tx2)?;

    report.check(
        "separate physical transactions",
        tx1.transaction_id() != tx2.transaction_id(),
    );
    report.check("tx1 committed", state_of(chain, &tx1) == Some(TxState::Committed));
    report.check("tx2 committed", state_of(chain, &tx2) == Some(TxState::Committed));
    Ok(())
}

fn double_commit_rollback(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let tx1 = chain.begin(Propagation::Required)?;
    chain.commit(&tx1)?;
    let tx2 = chain.begin(Propagation::Required)?;
    chain.rollback(&tx2)?;

    report.check("tx1 committed", state_of(chain, &tx1) == Some(TxState::Committed));
    report.check("tx2 rolled back", state_of(chain, &tx2) == Some(TxState::RolledBack));
    Ok(())
}

fn inner_commit(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let outer = chain.begin(Propagation::Required)?;
    let inner = chain.begin(Propagation::Required)?;
    report.check("outer is new", outer.is_new());
    report.check("inner participates", !inner.is_new());

    chain.commit(&inner)?;
    report.check("inner commit left transaction open", chain.is_transaction_active());

    chain.commit(&outer)?;
    report.check("outer committed", state_of(chain, &outer) == Some(TxState::Committed));
    Ok(())
}

fn outer_rollback(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let outer = chain.begin(Propagation::Required)?;
    let inner = chain.begin(Propagation::Required)?;
    chain.commit(&inner)?;
    chain.rollback(&outer)?;

    report.check("outer rolled back", state_of(chain, &outer) == Some(TxState::RolledBack));
    Ok(())
}

fn inner_rollback(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let outer = chain.begin(Propagation::Required)?;
    let inner = chain.begin(Propagation::Required)?;
    chain.rollback(&inner)?;
    report.check("transaction marked rollback-only", chain.is_rollback_only(&outer));

    let result = chain.commit(&outer);
    report.check(
        "outer commit reports unexpected rollback",
        result.as_ref().is_err_and(|e| e.is_unexpected_rollback()),
    );
    report.check("outer rolled back", state_of(chain, &outer) == Some(TxState::RolledBack));
    Ok(())
}

fn inner_rollback_requires_new(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let outer = chain.begin(Propagation::Required)?;
    let inner = chain.begin(Propagation::RequiresNew)?;
    report.check("inner is new", inner.is_new());
    report.check("outer suspended", chain.suspended_count() == 1);

    chain.rollback(&inner)?;
    report.check("inner rolled back", state_of(chain, &inner) == Some(TxState::RolledBack));
    report.check("outer not rollback-only", !chain.is_rollback_only(&outer));

    chain.commit(&outer)?;
    report.check("outer committed", state_of(chain, &outer) == Some(TxState::Committed));
    Ok(())
}

// ==================== Member service ====================

fn outer_tx_off_success(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::repositories_only());
    let username = "outer_tx_off_success";

    service.join_v1(chain, username)?;
    report.check("member saved", service.members().find(chain, username).is_some());
    report.check("log saved", service.logs().find(chain, username).is_some());
    Ok(())
}

fn outer_tx_off_fail(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::repositories_only());
    let username = failing("outer_tx_off_fail");

    report.check("join fails", service.join_v1(chain, &username).is_err());
    report.check("member saved", service.members().find(chain, &username).is_some());
    report.check("log rolled back", service.logs().find(chain, &username).is_none());
    Ok(())
}

fn single_tx(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::service_only());
    let username = "single_tx";

    service.join_v1(chain, username)?;
    report.check("member saved", service.members().find(chain, username).is_some());
    report.check("log saved", service.logs().find(chain, username).is_some());
    report.check("one physical transaction", chain.stats().started == 1);
    Ok(())
}

fn outer_tx_on_success(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::all_required());
    let username = "outer_tx_on_success";

    service.join_v1(chain, username)?;
    report.check("member saved", service.members().find(chain, username).is_some());
    report.check("log saved", service.logs().find(chain, username).is_some());
    report.check("one physical transaction", chain.stats().started == 1);
    Ok(())
}

fn outer_tx_on_fail(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::all_required());
    let username = failing("outer_tx_on_fail");

    report.check("join fails", service.join_v1(chain, &username).is_err());
    report.check("member rolled back", service.members().find(chain, &username).is_none());
    report.check("log rolled back", service.logs().find(chain, &username).is_none());
    Ok(())
}

fn recover_exception_fail(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let service = MemberService::new(TxWiring::all_required());
    let username = failing("recover_exception_fail");

    let result = service.join_v2(chain, &username);
    report.check(
        "join reports unexpected rollback",
        result.as_ref().is_err_and(|e| e.is_unexpected_rollback()),
    );
    report.check("member rolled back", service.members().find(chain, &username).is_none());
    report.check("log rolled back", service.logs().find(chain, &username).is_none());
    Ok(())
}

fn recover_exception_success(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let wiring = TxWiring::all_required().log_repository(Some(Propagation::RequiresNew));
    let service = MemberService::new(wiring);
    let username = failing("recover_exception_success");

    service.join_v2(chain, &username)?;
    report.check("member saved", service.members().find(chain, &username).is_some());
    report.check("log rolled back", service.logs().find(chain, &username).is_none());
    Ok(())
}

// ==================== Internal calls ====================

/// Transactional unit of work. Reports whether it saw an actual transaction.
fn internal(chain: &mut Chain) -> ServiceResult<bool> {
    chain.with_transaction(Propagation::Required, |c| {
        let active = c.is_transaction_active();
        info!(tx_active = active, "call internal");
        Ok(active)
    })
}

fn internal_call(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    report.check("no transaction before the call", !chain.is_transaction_active());

    let active = internal(chain)?;
    report.check("transaction active inside internal", active);
    report.check("transaction ended after the call", !chain.is_transaction_active());
    report.check("one transaction committed", chain.stats().committed == 1);
    Ok(())
}

fn external_call(chain: &mut Chain, report: &mut ScenarioReport) -> ServiceResult<()> {
    let active = chain.is_transaction_active();
    info!(tx_active = active, "call external");
    report.check("external runs without a transaction", !active);

    // The scope is acquired by `internal` itself, so calling it from
    // non-transactional code in the same chain still opens a transaction.
    let inner_active = internal(chain)?;
    report.check("transaction active inside internal", inner_active);
    report.check("no transaction after internal returns", !chain.is_transaction_active());
    report.check("one physical transaction", chain.stats().started == 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scenarios_pass_with_defaults() {
        for report in run_all(&CoordinatorConfig::default()) {
            assert!(report.passed(), "scenario {} failed: {:?}", report.name, report);
        }
    }

    #[test]
    fn test_scenario_names_unique() {
        let mut names: Vec<_> = SCENARIOS.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCENARIOS.len());
    }

    #[test]
    fn test_find_scenario() {
        assert!(find_scenario("inner_rollback").is_some());
        assert!(find_scenario("nested").is_none());
    }

    #[test]
    fn test_inner_rollback_depends_on_global_rollback() {
        let config = CoordinatorConfig::new().global_rollback_on_participation_failure(false);
        let report = find_scenario("inner_rollback").unwrap().run(&config);
        assert!(!report.passed());
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].state, TxState::Committed);
    }

    #[test]
    fn test_scenarios_pass_without_history() {
        let config = CoordinatorConfig::from_json_str(r#"{"history_limit": 0}"#).unwrap();
        let report = find_scenario("commit").unwrap().run(&config);
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.transactions.len(), 1);
    }

    #[test]
    fn test_small_history_limit_raised_for_runs() {
        let config = CoordinatorConfig::new().history_limit(1);
        for report in run_all(&config) {
            assert!(report.passed(), "scenario {} failed: {:?}", report.name, report);
        }

        let report = find_scenario("double_commit").unwrap().run(&config);
        assert_eq!(report.transactions.len(), 2);
    }

    #[test]
    fn test_internal_and_external_calls() {
        let config = CoordinatorConfig::default();

        let internal = find_scenario("internal_call").unwrap().run(&config);
        assert!(internal.passed(), "{:?}", internal);
        assert_eq!(internal.transactions.len(), 1);
        assert_eq!(internal.transactions[0].state, TxState::Committed);

        let external = find_scenario("external_call").unwrap().run(&config);
        assert!(external.passed(), "{:?}", external);
        assert_eq!(external.stats.started, 1);
    }

    #[test]
    fn test_report_serializes() {
        let report = find_scenario("commit").unwrap().run(&CoordinatorConfig::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "commit");
        assert_eq!(json["transactions"][0]["state"], "COMMITTED");
    }
}
