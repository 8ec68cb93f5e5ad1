//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Structured shipping address. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    #[serde(rename = "zip")]
    pub zip_code: String,
}

impl ShippingAddress {
    /// Creates a new shipping address.
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip_code: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip_code: zip_code.into(),
        }
    }

    /// Checks that no field is blank.
    pub fn validate(&self) -> Result<(), OrderError> {
        let fields = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip_code),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(OrderError::AddressFieldRequired { field });
            }
        }
        Ok(())
    }
}

/// How the customer pays, e.g. "credit_card".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    /// Creates a payment method from a string.
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    /// Returns the payment method as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PaymentMethod {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
