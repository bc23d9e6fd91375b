use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use aggregator_engine::{
    agg_api::{AllocatorError, CatalogError, FulfillmentError, IndexerError, MatchingError, WebhookError},
    traits::StorageError,
};
use log::error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request conflicts with the current state of the order. {0}")]
    Conflict(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<StorageError> for ServerError {
    fn from(e: StorageError) -> Self {
        error!("💻️ Storage error while handling a request. {e}");
        Self::BackendError(e.to_string())
    }
}

impl From<AllocatorError> for ServerError {
    fn from(e: AllocatorError) -> Self {
        match e {
            AllocatorError::StorageError(e) => e.into(),
            AllocatorError::PaymentOrderNotFound(_) => Self::NoRecordFound(e.to_string()),
            AllocatorError::OrderNotAwaitingFunds(..) => Self::Conflict(e.to_string()),
            AllocatorError::InvalidOrder(_) => Self::InvalidRequestBody(e.to_string()),
            AllocatorError::ChainHeadUnavailable(_) | AllocatorError::IndexContention(_) => {
                Self::BackendError(e.to_string())
            },
        }
    }
}

impl From<IndexerError> for ServerError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::StorageError(e) => e.into(),
            IndexerError::InvalidDeposit(_) => Self::InvalidRequestBody(e.to_string()),
            IndexerError::PaymentOrderNotFound(_) => Self::NoRecordFound(e.to_string()),
            IndexerError::NoMarketRate(_) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<MatchingError> for ServerError {
    fn from(e: MatchingError) -> Self {
        match e {
            MatchingError::StorageError(e) => e.into(),
            MatchingError::LockOrderNotFound(_) => Self::NoRecordFound(e.to_string()),
            MatchingError::NoMarketRate(_) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<FulfillmentError> for ServerError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::StorageError(e) => e.into(),
            FulfillmentError::LockOrderNotFound(_) => Self::NoRecordFound(e.to_string()),
            FulfillmentError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            FulfillmentError::StatusConflict(_) => Self::Conflict(e.to_string()),
            FulfillmentError::NoPendingFulfillment(_) => Self::Conflict(e.to_string()),
            FulfillmentError::NotAssignee { .. } => Self::InsufficientPermissions(e.to_string()),
        }
    }
}

impl From<CatalogError> for ServerError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::StorageError(e) => e.into(),
            CatalogError::UnknownCurrency(_) | CatalogError::ProviderNotFound(_) => Self::NoRecordFound(e.to_string()),
            _ => Self::InvalidRequestBody(e.to_string()),
        }
    }
}

impl From<WebhookError> for ServerError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::StorageError(e) => e.into(),
            _ => Self::BackendError(e.to_string()),
        }
    }
}
