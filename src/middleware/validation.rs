use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::{AppError, OrderError};

/// JSON body that has passed its `validator` rules.
///
/// Malformed JSON and failed rules both surface as `400 INVALID_INPUT`.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| AppError::InvalidInput(format!("Invalid JSON: {}", e)))?;

        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

/// Luhn checksum over a string of ASCII digits
pub fn luhn_valid(number: &str) -> bool {
    let mut sum = 0u32;
    for (i, c) in number.bytes().rev().enumerate() {
        if !c.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(c - b'0');
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    !number.is_empty() && sum % 10 == 0
}

/// Normalise a submitted order number.
///
/// Anything that is not a run of digits is malformed input (400); digits that
/// fail the checksum are an unprocessable order number (422).
pub fn validate_order_number(raw: &str) -> Result<String, AppError> {
    let number = raw.trim();

    if number.is_empty() || !number.bytes().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidInput(format!(
            "Order number must be a non-empty string of digits, got {:?}",
            number
        )));
    }

    if !luhn_valid(number) {
        return Err(OrderError::InvalidNumber(number.to_string()).into());
    }

    Ok(number.to_string())
}
