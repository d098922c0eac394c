//! Member-join service.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::backend::BackendError;
use crate::demo::repository::{LogEntry, LogRepository, Member, MemberRepository};
use crate::demo::Chain;
use crate::transaction::{Propagation, TransactionError};

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service-level errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("failed to save log entry: {0}")]
    LogFailure(String),

    #[error("no transaction is active for this write")]
    NoTransaction,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        ServiceError::Transaction(TransactionError::Backend(err))
    }
}

impl ServiceError {
    /// Check if this is the commit-time rollback-only signal.
    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, ServiceError::Transaction(e) if e.is_unexpected_rollback())
    }
}

/// Which layers of the service run transactionally, and how.
///
/// `None` for a layer means it runs inside whatever its caller runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxWiring {
    pub service: Option<Propagation>,
    pub member_repository: Option<Propagation>,
    pub log_repository: Option<Propagation>,
}

impl TxWiring {
    /// Only the repositories are transactional.
    pub fn repositories_only() -> Self {
        Self {
            service: None,
            member_repository: Some(Propagation::Required),
            log_repository: Some(Propagation::Required),
        }
    }

    /// Only the service is transactional.
    pub fn service_only() -> Self {
        Self {
            service: Some(Propagation::Required),
            member_repository: None,
            log_repository: None,
        }
    }

    /// Every layer joins one transaction.
    pub fn all_required() -> Self {
        Self {
            service: Some(Propagation::Required),
            ..Self::repositories_only()
        }
    }

    /// Set the log repository's propagation.
    pub fn log_repository(mut self, propagation: Option<Propagation>) -> Self {
        self.log_repository = propagation;
        self
    }
}

/// Joins members, recording an audit log entry for each.
#[derive(Debug, Clone)]
pub struct MemberService {
    wiring: TxWiring,
    members: MemberRepository,
    logs: LogRepository,
}

impl MemberService {
    pub fn new(wiring: TxWiring) -> Self {
        Self {
            wiring,
            members: MemberRepository::new(wiring.member_repository),
            logs: LogRepository::new(wiring.log_repository),
        }
    }

    pub fn members(&self) -> &MemberRepository {
        &self.members
    }

    pub fn logs(&self) -> &LogRepository {
        &self.logs
    }

    /// Save member and log entry; any failure propagates to the caller.
    pub fn join_v1(&self, chain: &mut Chain, username: &str) -> ServiceResult<()> {
        self.in_service_scope(chain, |c| {
            self.members.save(c, &Member::new(username))?;
            self.logs.save(c, &LogEntry::new(username))?;
            Ok(())
        })
    }

    /// Save member and log entry; a failed log save is swallowed and the
    /// join carries on.
    pub fn join_v2(&self, chain: &mut Chain, username: &str) -> ServiceResult<()> {
        self.in_service_scope(chain, |c| {
            self.members.save(c, &Member::new(username))?;
            if let Err(err) = self.logs.save(c, &LogEntry::new(username)) {
                info!(message = %username, error = %err, "log save failed, continuing");
            }
            Ok(())
        })
    }

    fn in_service_scope<F>(&self, chain: &mut Chain, body: F) -> ServiceResult<()>
    where
        F: FnOnce(&mut Chain) -> ServiceResult<()>,
    {
        match self.wiring.service {
            Some(p) => chain.with_transaction(p, body),
            None => body(chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::demo::LOG_FAILURE_MARKER;

    fn setup() -> Chain {
        Chain::new(MemoryBackend::new())
    }

    fn failing(name: &str) -> String {
        format!("{}_{}", LOG_FAILURE_MARKER, name)
    }

    #[test]
    fn test_outer_tx_off_success() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::repositories_only());

        service.join_v1(&mut chain, "outer_tx_off_success").unwrap();

        assert!(service.members().find(&chain, "outer_tx_off_success").is_some());
        assert!(service.logs().find(&chain, "outer_tx_off_success").is_some());
        assert_eq!(chain.stats().started, 2);
    }

    #[test]
    fn test_outer_tx_off_fail() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::repositories_only());
        let username = failing("outer_tx_off_fail");

        assert!(service.join_v1(&mut chain, &username).is_err());

        assert!(service.members().find(&chain, &username).is_some());
        assert!(service.logs().find(&chain, &username).is_none());
    }

    #[test]
    fn test_single_tx() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::service_only());

        service.join_v1(&mut chain, "single_tx").unwrap();

        assert!(service.members().find(&chain, "single_tx").is_some());
        assert!(service.logs().find(&chain, "single_tx").is_some());
        assert_eq!(chain.stats().started, 1);
    }

    #[test]
    fn test_outer_tx_on_success() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::all_required());

        service.join_v1(&mut chain, "outer_tx_on_success").unwrap();

        assert!(service.members().find(&chain, "outer_tx_on_success").is_some());
        assert!(service.logs().find(&chain, "outer_tx_on_success").is_some());
        assert_eq!(chain.stats().started, 1);
        assert_eq!(chain.stats().participations, 2);
    }

    #[test]
    fn test_outer_tx_on_fail() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::all_required());
        let username = failing("outer_tx_on_fail");

        let err = service.join_v1(&mut chain, &username).unwrap_err();
        assert!(matches!(err, ServiceError::LogFailure(_)));

        assert!(service.members().find(&chain, &username).is_none());
        assert!(service.logs().find(&chain, &username).is_none());
    }

    #[test]
    fn test_recover_exception_fail() {
        let mut chain = setup();
        let service = MemberService::new(TxWiring::all_required());
        let username = failing("recover_exception_fail");

        let err = service.join_v2(&mut chain, &username).unwrap_err();
        assert!(err.is_unexpected_rollback());

        assert!(service.members().find(&chain, &username).is_none());
        assert!(service.logs().find(&chain, &username).is_none());
    }

    #[test]
    fn test_recover_exception_success() {
        let mut chain = setup();
        let wiring = TxWiring::all_required().log_repository(Some(Propagation::RequiresNew));
        let service = MemberService::new(wiring);
        let username = failing("recover_exception_success");

        service.join_v2(&mut chain, &username).unwrap();

        assert!(service.members().find(&chain, &username).is_some());
        assert!(service.logs().find(&chain, &username).is_none());
        assert_eq!(chain.stats().suspensions, 1);
    }
}
