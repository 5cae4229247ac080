//! Client directory.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use medledger_core::{Aggregate, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope};
use medledger_infra::command_dispatcher::{DispatchError, UnitOfWork};
use medledger_infra::event_store::EventStore;
use medledger_parties::{
    Client, ClientCommand, ClientId, ClientTerms, ClientType, ContactInfo, MarkReferenced,
    RegisterClient, ReviseTerms, UpdateContact,
};

use crate::error::LedgerResult;
use crate::ledger::{Ledger, observe};
use crate::query::ClientFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    pub name: String,
    pub client_type: ClientType,
    /// Days; the configured default when `None`.
    pub payment_terms: Option<u32>,
    pub credit_limit: Option<Money>,
    pub contact: ContactInfo,
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn register_client(&self, new: NewClient) -> LedgerResult<Client> {
        let client_id = ClientId::generate();
        let terms = ClientTerms {
            client_type: new.client_type,
            payment_terms: new
                .payment_terms
                .unwrap_or(self.config().documents.payment_terms_days),
            credit_limit: new.credit_limit,
        };
        let result = self
            .dispatcher()
            .dispatch::<Client>(
                client_id,
                &ClientCommand::RegisterClient(RegisterClient {
                    client_id,
                    name: new.name,
                    terms,
                    contact: new.contact,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);

        if let Ok(client) = &result {
            tracing::info!(client_id = %client_id, name = client.name(), "client registered");
        }
        observe("register_client", result)
    }

    /// Contact details stay editable for the client's whole life.
    pub fn update_client_contact(
        &self,
        client_id: ClientId,
        contact: ContactInfo,
    ) -> LedgerResult<Client> {
        let result = self
            .dispatcher()
            .dispatch::<Client>(
                client_id,
                &ClientCommand::UpdateContact(UpdateContact {
                    client_id,
                    contact,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);
        observe("update_client_contact", result)
    }

    /// Rejected with `InvalidTransition` once a quote or invoice references
    /// the client.
    pub fn revise_client_terms(
        &self,
        client_id: ClientId,
        terms: ClientTerms,
    ) -> LedgerResult<Client> {
        let result = self
            .dispatcher()
            .dispatch::<Client>(
                client_id,
                &ClientCommand::ReviseTerms(ReviseTerms {
                    client_id,
                    terms,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);
        observe("revise_client_terms", result)
    }

    pub fn client(&self, client_id: ClientId) -> LedgerResult<Client> {
        self.existing(client_id, "client")
    }

    /// Clients in registration order.
    pub fn clients(&self, filter: &ClientFilter) -> LedgerResult<Vec<Client>> {
        let needle = filter.name_contains.as_ref().map(|n| n.to_lowercase());
        Ok(self
            .dispatcher()
            .load_all::<Client>()?
            .into_iter()
            .filter(|c| filter.client_type.is_none_or(|t| t == c.client_type()))
            .filter(|c| {
                needle
                    .as_ref()
                    .is_none_or(|n| c.name().to_lowercase().contains(n.as_str()))
            })
            .collect())
    }
}

/// Record that `document_number` references the client, freezing its terms.
///
/// The client must be claimed by the surrounding transaction.
pub(crate) fn reference_client<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    client_id: ClientId,
    document_number: &str,
    occurred_at: DateTime<Utc>,
) -> Result<Client, DispatchError> {
    let mut client: Client = uow.load(client_id)?;
    if !client.exists() {
        return Err(DomainError::not_found("client", client_id).into());
    }
    uow.execute(
        &mut client,
        &ClientCommand::MarkReferenced(MarkReferenced {
            client_id,
            document_number: document_number.to_string(),
            occurred_at,
        }),
    )?;
    Ok(client)
}
