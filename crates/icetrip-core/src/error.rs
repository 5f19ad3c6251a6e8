use std::fmt;

/// Machine-readable error codes shared by the CLI, logs and the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    StoreReadFailed,
    StoreWriteFailed,
    StoreLockContention,
    GatewayTransport,
    GatewayStatus,
    RateLimited,
    DecodeFailure,
    InvalidRequestUrl,
    RetryBudgetExhausted,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::StoreReadFailed => "E2001",
            Self::StoreWriteFailed => "E2002",
            Self::StoreLockContention => "E2003",
            Self::GatewayTransport => "E3001",
            Self::GatewayStatus => "E3002",
            Self::RateLimited => "E3003",
            Self::DecodeFailure => "E3004",
            Self::InvalidRequestUrl => "E3005",
            Self::RetryBudgetExhausted => "E3006",
        }
    }

    /// Short human-facing summary for terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::StoreReadFailed => "Persistent store read failed",
            Self::StoreWriteFailed => "Persistent store write failed",
            Self::StoreLockContention => "Persistent store is locked",
            Self::GatewayTransport => "Network transport failure",
            Self::GatewayStatus => "Unexpected HTTP status",
            Self::RateLimited => "Rate limited by remote service",
            Self::DecodeFailure => "Malformed response body",
            Self::InvalidRequestUrl => "Invalid request URL",
            Self::RetryBudgetExhausted => "Retry budget exhausted",
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => {
                Some("Fix the file passed to --config (or icetrip/config.toml) and retry.")
            }
            Self::StoreReadFailed | Self::StoreWriteFailed => {
                Some("Check the data directory exists and is writable.")
            }
            Self::StoreLockContention => Some("Retry after the other `itp` process exits."),
            Self::GatewayTransport => Some("Check network connectivity and endpoint URLs."),
            Self::GatewayStatus | Self::DecodeFailure => Some(
                "Verify the config endpoint is deployed and returns {\"ok\": true, \"url\": ...}.",
            ),
            Self::RateLimited => Some("Wait before relaunching; the service is throttling."),
            Self::InvalidRequestUrl => Some("Fix the endpoint URLs under [endpoints]."),
            Self::RetryBudgetExhausted => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
