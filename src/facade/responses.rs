//! Client-facing response shapes

use crate::contest::RoomRecord;
use crate::error::{ContestError, Result};
use crate::store::PrizeBreakupEntry;
use crate::types::ContestDefinition;
use serde::Serialize;
use tracing::{error, warn};

/// Outcome code carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u16")]
pub enum ErrorCode {
    Ok,
    /// Rejected request; the message says why
    Default,
    ServerMaintenance,
    /// Unexpected failure inside the service
    Exception,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::Ok => 200,
            ErrorCode::Default => 400,
            ErrorCode::Exception => 500,
            ErrorCode::ServerMaintenance => 503,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Envelope returned by every client operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub message: Option<String>,
    pub code: ErrorCode,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            message: None,
            code: ErrorCode::Ok,
        }
    }

    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            data: None,
            message: Some(message.into()),
            code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }

    /// Convert an operation result. Typed rejections keep their client
    /// message; anything else becomes a generic exception.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => match e.downcast_ref::<ContestError>() {
                Some(ContestError::ServerMaintenance) => Self::failure(
                    ContestError::ServerMaintenance.client_message(),
                    ErrorCode::ServerMaintenance,
                ),
                Some(contest_error) if contest_error.is_client_error() => {
                    warn!("Request rejected: {}", contest_error);
                    Self::failure(contest_error.client_message(), ErrorCode::Default)
                }
                Some(contest_error) => {
                    error!("Request failed: {}", contest_error);
                    Self::failure(contest_error.client_message(), ErrorCode::Exception)
                }
                None => {
                    error!("Request failed: {:#}", e);
                    Self::failure("Something went wrong", ErrorCode::Exception)
                }
            },
        }
    }
}

/// Room as returned to a subscriber, with the game server to connect to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomView {
    #[serde(flatten)]
    pub room: RoomRecord,
    #[serde(rename = "serverIp")]
    pub server_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContestListResponse {
    pub match_contests: Vec<ContestDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrizeBreakupResponse {
    /// `None` when the contest is not in the catalog
    pub contest: Option<ContestDefinition>,
    pub breakup: Vec<PrizeBreakupEntry>,
}
