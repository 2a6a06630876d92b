//! HTTP error type.
//!
//! Bridges engine errors to JSON responses `{code, message, conflicting_seat_ids?}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use marquee_core::ErrorCode;
use marquee_core::types::SeatId;
use marquee_engine::orders::OrderError;
use marquee_engine::{HoldError, PricingError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application error returned by handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
    conflicting_seat_ids: Vec<SeatId>,
    source: Option<anyhow::Error>,
}

/// HTTP status for an error code
#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::SeatConflict | ErrorCode::OrderInProgress => StatusCode::CONFLICT,
        ErrorCode::SessionExpired => StatusCode::GONE,
        ErrorCode::SeatUnavailable
        | ErrorCode::UnknownSeat
        | ErrorCode::EmptySelection
        | ErrorCode::TooManySeats
        | ErrorCode::PromotionInvalid
        | ErrorCode::LoyaltyRedemptionInvalid
        | ErrorCode::UnknownCombo
        | ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::UnknownShowtime | ErrorCode::OrderNotFound => StatusCode::NOT_FOUND,
        ErrorCode::CallbackUnverified => StatusCode::UNAUTHORIZED,
        ErrorCode::GatewayRejected => StatusCode::BAD_GATEWAY,
        ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        // Absorbed by the callback handler; never surfaces as a failure
        ErrorCode::DuplicateCallback => StatusCode::OK,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    /// Create an error with the status implied by `code`.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            code,
            message: message.into(),
            conflicting_seat_ids: Vec::new(),
            source: None,
        }
    }

    /// Attach the seats that caused a conflict.
    #[must_use]
    pub fn with_seats(mut self, seat_ids: Vec<SeatId>) -> Self {
        self.conflicting_seat_ids = seat_ids;
        self
    }

    /// Attach an internal cause, logged but not exposed.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 500 error whose cause is logged but not sent to the client.
    #[must_use]
    pub fn internal<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorCode::Internal, "internal error").with_source(anyhow::Error::new(cause))
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Error code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<HoldError> for AppError {
    fn from(err: HoldError) -> Self {
        if matches!(err, HoldError::Catalog(_)) {
            return Self::internal(err);
        }
        let seats = err.seat_ids().to_vec();
        Self::new(err.code(), err.to_string()).with_seats(seats)
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Hold(hold) => hold.into(),
            OrderError::InvalidTransition { .. }
            | OrderError::Catalog(_)
            | OrderError::Repository(_) => Self::internal(err),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Taxonomy code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Seats another user holds or bought
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_seat_ids: Vec<SeatId>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            conflicting_seat_ids: self.conflicting_seat_ids,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marquee_engine::orders::RepositoryError;

    #[test]
    fn conflict_carries_the_seats() {
        let seat = SeatId::parse("A2").unwrap();
        let err: AppError = HoldError::SeatConflict {
            seat_ids: vec![seat.clone()],
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), ErrorCode::SeatConflict);
        assert_eq!(err.conflicting_seat_ids, vec![seat]);
    }

    #[test]
    fn wrapped_hold_errors_keep_their_code() {
        let err: AppError = OrderError::Hold(HoldError::SessionExpired).into();
        assert_eq!(err.status(), StatusCode::GONE);
    }

    #[test]
    fn infrastructure_failures_keep_their_cause_private() {
        let err: AppError = OrderError::Repository(RepositoryError::Backend(
            "connection refused".to_string(),
        ))
        .into();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "internal error");
        let cause = std::error::Error::source(&err).unwrap();
        assert!(cause.to_string().contains("connection refused"));
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(status_for(ErrorCode::TooManySeats), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorCode::CallbackUnverified), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorCode::GatewayTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorCode::OrderNotFound), StatusCode::NOT_FOUND);
    }
}
