use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medledger_core::{Entity, EntityId, Money, typed_id};

typed_id!(
    /// Payment identifier.
    PaymentId(EntityId)
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Cheque,
    Card,
    Other,
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::MobileMoney => "MOBILE_MONEY",
            PaymentMethod::Cheque => "CHEQUE",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Other => "OTHER",
        })
    }
}

/// A payment against an invoice. Immutable once recorded.
///
/// A reversal is another payment with a negative amount and `reverses` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_on: NaiveDate,
    pub reference: Option<String>,
    pub reverses: Option<PaymentId>,
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
