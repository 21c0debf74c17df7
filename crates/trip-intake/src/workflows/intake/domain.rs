use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Catalog identifier of a trip.
    TripId
);
string_id!(
    /// Authenticated user submitting an application.
    ApplicantId
);
string_id!(
    /// Server-assigned identifier of a stored application record.
    ApplicationId
);

/// Gateway-issued proof of a completed or in-progress charge. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Accepts only non-blank identifiers.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value).ok_or("payment reference must not be empty")
    }
}

impl From<PaymentReference> for String {
    fn from(value: PaymentReference) -> Self {
        value.0
    }
}

/// Payment state attached to a stored application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid { reference: PaymentReference },
    Unpaid,
}

impl PaymentStatus {
    pub fn from_reference(reference: Option<PaymentReference>) -> Self {
        match reference {
            Some(reference) => PaymentStatus::Paid { reference },
            None => PaymentStatus::Unpaid,
        }
    }

    pub fn reference(&self) -> Option<&PaymentReference> {
        match self {
            PaymentStatus::Paid { reference } => Some(reference),
            PaymentStatus::Unpaid => None,
        }
    }

    pub const fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid { .. })
    }

    pub const fn label(&self) -> &'static str {
        match self {
            PaymentStatus::Paid { .. } => "paid",
            PaymentStatus::Unpaid => "unpaid",
        }
    }
}
