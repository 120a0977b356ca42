use std::time::Duration;

use triage_core::errors::GatewayError;
use triage_core::tools::ToolError;
use triage_core::triage::FailureKind;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("model kept requesting tools after {0} rounds")]
    MaxToolRounds(u32),

    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Gateway(e) => FailureKind::from_gateway(e),
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            Self::MaxToolRounds(_) => FailureKind::InvalidResponse,
            Self::Tool(_) | Self::Internal(_) => FailureKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_keep_their_classification() {
        let err = EngineError::from(GatewayError::QuotaExceeded("insufficient_quota".into()));
        assert_eq!(err.failure_kind(), FailureKind::QuotaExceeded);
        assert_eq!(err.to_string(), "quota exceeded: insufficient_quota");

        let err = EngineError::from(GatewayError::AuthenticationFailed("bad key".into()));
        assert_eq!(err.failure_kind(), FailureKind::Authentication);
    }

    #[test]
    fn engine_errors_classified() {
        assert_eq!(
            EngineError::Timeout(Duration::from_secs(5)).failure_kind(),
            FailureKind::Timeout
        );
        assert_eq!(EngineError::Cancelled.failure_kind(), FailureKind::Cancelled);
        assert_eq!(EngineError::MaxToolRounds(4).failure_kind(), FailureKind::InvalidResponse);
        assert_eq!(
            EngineError::Internal("boom".into()).failure_kind(),
            FailureKind::Internal
        );
    }
}
