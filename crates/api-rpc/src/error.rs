//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use runqueue_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const ALREADY_RELEASED: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::Conflict(msg) | AppError::LeaseActive(msg) => {
            ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>)
        }
        AppError::AlreadyReleased(msg) => {
            ErrorObjectOwned::owned(code::ALREADY_RELEASED, msg, None::<()>)
        }
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Domain(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Io(e) => ErrorObjectOwned::owned(code::SYSTEM_ERROR, e.to_string(), None::<()>),
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
    }
}

/// Request rejected by the per-organization enqueue throttle
pub fn throttled(org_id: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        format!("Rate limit exceeded for organization {}. Please slow down.", org_id),
        None::<()>,
    )
}

pub fn validation(msg: impl Into<String>) -> ErrorObjectOwned {
    to_rpc_error(AppError::Validation(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use runqueue_core::domain::DomainError;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            to_rpc_error(AppError::AlreadyReleased("t".into())).code(),
            code::ALREADY_RELEASED
        );
        assert_eq!(
            to_rpc_error(AppError::NotFound("t".into())).code(),
            code::NOT_FOUND
        );
        assert_eq!(
            to_rpc_error(AppError::Domain(DomainError::InvalidPayload("bad".into()))).code(),
            code::VALIDATION_ERROR
        );
        assert_eq!(throttled("o1").code(), code::THROTTLED);
    }
}
