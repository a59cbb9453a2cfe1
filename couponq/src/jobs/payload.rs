//! Typed payload builders for the built-in job classes.
//!
//! The queue stores payloads as opaque JSON objects. These types give
//! producers and handlers a checked view of the shapes each class expects:
//!
//! | class      | payload                              |
//! |------------|--------------------------------------|
//! | `email`    | `{"type", "to", "data"}`             |
//! | `sms`      | `{"type", "mobile", "data"}`         |
//! | `cashback` | `{"network", "data"}`                |

use super::{JobClass, JobResult, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A payload that belongs to exactly one job class.
pub trait TypedPayload: Serialize + DeserializeOwned {
    /// Class the payload is enqueued under.
    const CLASS: JobClass;

    /// Encode into the opaque mapping stored on the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not serialize to a JSON object.
    fn to_payload(&self) -> JobResult<Payload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(super::JobError::Other(format!(
                "{} payload must be a JSON object, got {other}",
                Self::CLASS
            ))),
        }
    }

    /// Decode from a job's opaque mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or mistyped.
    fn from_payload(payload: &Payload) -> JobResult<Self> {
        Ok(serde_json::from_value(Value::Object(payload.clone()))?)
    }
}

/// Kind of transactional email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// Sent after sign-up.
    Welcome,
    /// Order placed.
    OrderConfirmation,
    /// Cashback moved from pending to confirmed.
    CashbackConfirmed,
    /// Wallet withdrawal paid out.
    WithdrawalProcessed,
}

impl EmailKind {
    /// Subject line used for this kind of email.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome to CouponCommerce!",
            Self::OrderConfirmation => "Order Confirmed - Your Vouchers",
            Self::CashbackConfirmed => "Cashback Credited to Your Wallet",
            Self::WithdrawalProcessed => "Withdrawal Processed Successfully",
        }
    }
}

/// Email job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    /// Template to render.
    #[serde(rename = "type")]
    pub kind: EmailKind,
    /// Recipient address.
    pub to: String,
    /// Template data.
    #[serde(default)]
    pub data: Payload,
}

impl EmailJob {
    /// Email of `kind` to `to` with empty template data.
    #[must_use]
    pub fn new(kind: EmailKind, to: impl Into<String>) -> Self {
        Self {
            kind,
            to: to.into(),
            data: Payload::new(),
        }
    }

    /// Add a template variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl TypedPayload for EmailJob {
    const CLASS: JobClass = JobClass::Email;
}

/// Kind of SMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsKind {
    /// One-time password.
    Otp,
    /// Order placed.
    OrderConfirmation,
    /// Cashback credited.
    CashbackCredited,
    /// Withdrawal paid out.
    WithdrawalProcessed,
}

/// SMS job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsJob {
    /// Template to render.
    #[serde(rename = "type")]
    pub kind: SmsKind,
    /// Recipient number including country code.
    pub mobile: String,
    /// Template data.
    #[serde(default)]
    pub data: Payload,
}

impl SmsJob {
    /// SMS of `kind` to `mobile` with empty template data.
    #[must_use]
    pub fn new(kind: SmsKind, mobile: impl Into<String>) -> Self {
        Self {
            kind,
            mobile: mobile.into(),
            data: Payload::new(),
        }
    }

    /// Add a template variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl TypedPayload for SmsJob {
    const CLASS: JobClass = JobClass::Sms;
}

/// Affiliate network a cashback sync targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateNetwork {
    /// Admitad.
    Admitad,
    /// vCommission.
    Vcommission,
    /// Cuelinks.
    Cuelinks,
}

/// Cashback sync job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashbackSyncJob {
    /// Network to pull conversions from.
    pub network: AffiliateNetwork,
    /// Sync parameters.
    #[serde(default)]
    pub data: Payload,
}

impl CashbackSyncJob {
    /// Sync for `network` with no parameters.
    #[must_use]
    pub fn new(network: AffiliateNetwork) -> Self {
        Self {
            network,
            data: Payload::new(),
        }
    }
}

impl TypedPayload for CashbackSyncJob {
    const CLASS: JobClass = JobClass::Cashback;
}
