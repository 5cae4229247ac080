use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money, typed_id,
};
use medledger_events::Event;

typed_id!(
    /// Client identifier.
    ClientId(AggregateId)
);

/// Client classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    Hospital,
    Government,
    Pharmacy,
    Distributor,
    Other,
}

impl core::fmt::Display for ClientType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ClientType::Hospital => "HOSPITAL",
            ClientType::Government => "GOVERNMENT",
            ClientType::Pharmacy => "PHARMACY",
            ClientType::Distributor => "DISTRIBUTOR",
            ClientType::Other => "OTHER",
        })
    }
}

/// Contact details. The only part of a referenced client that may change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    /// Person to address documents to.
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

/// Commercial terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTerms {
    pub client_type: ClientType,
    /// Days between invoice issue and due date.
    pub payment_terms: u32,
    pub credit_limit: Option<Money>,
}

impl ClientTerms {
    fn validate(&self) -> DomainResult<()> {
        if let Some(limit) = self.credit_limit {
            if limit.is_negative() {
                return Err(DomainError::validation("credit limit cannot be negative"));
            }
        }
        Ok(())
    }
}

/// Aggregate root: Client.
///
/// Once a quote or invoice references the client, only contact details can be
/// edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    id: ClientId,
    name: String,
    terms: ClientTerms,
    contact: ContactInfo,
    referenced: bool,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Client {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_type(&self) -> ClientType {
        self.terms.client_type
    }

    pub fn payment_terms(&self) -> u32 {
        self.terms.payment_terms
    }

    pub fn credit_limit(&self) -> Option<Money> {
        self.terms.credit_limit
    }

    pub fn terms(&self) -> &ClientTerms {
        &self.terms
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    /// Whether any quote or invoice has been issued to this client.
    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl AggregateRoot for Client {
    type Id = ClientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterClient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClient {
    pub client_id: ClientId,
    pub name: String,
    pub terms: ClientTerms,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateContact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContact {
    pub client_id: ClientId,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseTerms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseTerms {
    pub client_id: ClientId,
    pub terms: ClientTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReferenced.
///
/// Issued alongside the first document created for the client. Idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReferenced {
    pub client_id: ClientId,
    /// Number of the referencing document (e.g. `QT-2025-0001`).
    pub document_number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientCommand {
    RegisterClient(RegisterClient),
    UpdateContact(UpdateContact),
    ReviseTerms(ReviseTerms),
    MarkReferenced(MarkReferenced),
}

/// Event: ClientRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistered {
    pub client_id: ClientId,
    pub name: String,
    pub terms: ClientTerms,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContactUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdated {
    pub client_id: ClientId,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TermsRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsRevised {
    pub client_id: ClientId,
    pub terms: ClientTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClientReferenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReferenced {
    pub client_id: ClientId,
    pub document_number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    ClientRegistered(ClientRegistered),
    ContactUpdated(ContactUpdated),
    TermsRevised(TermsRevised),
    ClientReferenced(ClientReferenced),
}

impl Event for ClientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ClientRegistered(_) => "parties.client.registered",
            ClientEvent::ContactUpdated(_) => "parties.client.contact_updated",
            ClientEvent::TermsRevised(_) => "parties.client.terms_revised",
            ClientEvent::ClientReferenced(_) => "parties.client.referenced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClientEvent::ClientRegistered(e) => e.occurred_at,
            ClientEvent::ContactUpdated(e) => e.occurred_at,
            ClientEvent::TermsRevised(e) => e.occurred_at,
            ClientEvent::ClientReferenced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Client {
    const AGGREGATE_TYPE: &'static str = "parties.client";

    type Command = ClientCommand;
    type Event = ClientEvent;
    type Error = DomainError;

    fn empty(id: ClientId) -> Self {
        Self {
            id,
            name: String::new(),
            terms: ClientTerms {
                client_type: ClientType::Other,
                payment_terms: 0,
                credit_limit: None,
            },
            contact: ContactInfo::default(),
            referenced: false,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ClientEvent::ClientRegistered(e) => {
                self.id = e.client_id;
                self.name = e.name.clone();
                self.terms = e.terms.clone();
                self.contact = e.contact.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ClientEvent::ContactUpdated(e) => {
                self.contact = e.contact.clone();
            }
            ClientEvent::TermsRevised(e) => {
                self.terms = e.terms.clone();
            }
            ClientEvent::ClientReferenced(_) => {
                self.referenced = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ClientCommand::RegisterClient(cmd) => self.handle_register(cmd),
            ClientCommand::UpdateContact(cmd) => self.handle_update_contact(cmd),
            ClientCommand::ReviseTerms(cmd) => self.handle_revise_terms(cmd),
            ClientCommand::MarkReferenced(cmd) => self.handle_mark_referenced(cmd),
        }
    }
}

impl Client {
    fn ensure_exists(&self, client_id: ClientId) -> DomainResult<()> {
        if !self.created || self.id != client_id {
            return Err(DomainError::not_found("client", client_id));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterClient) -> DomainResult<Vec<ClientEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "client {} already exists",
                cmd.client_id
            )));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("client name cannot be empty"));
        }
        cmd.terms.validate()?;

        Ok(vec![ClientEvent::ClientRegistered(ClientRegistered {
            client_id: cmd.client_id,
            name: cmd.name.trim().to_string(),
            terms: cmd.terms.clone(),
            contact: cmd.contact.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_contact(&self, cmd: &UpdateContact) -> DomainResult<Vec<ClientEvent>> {
        self.ensure_exists(cmd.client_id)?;
        Ok(vec![ClientEvent::ContactUpdated(ContactUpdated {
            client_id: cmd.client_id,
            contact: cmd.contact.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise_terms(&self, cmd: &ReviseTerms) -> DomainResult<Vec<ClientEvent>> {
        self.ensure_exists(cmd.client_id)?;
        if self.referenced {
            return Err(DomainError::invalid_transition(
                "REFERENCED",
                "TERMS_REVISED",
            ));
        }
        cmd.terms.validate()?;

        Ok(vec![ClientEvent::TermsRevised(TermsRevised {
            client_id: cmd.client_id,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_referenced(&self, cmd: &MarkReferenced) -> DomainResult<Vec<ClientEvent>> {
        self.ensure_exists(cmd.client_id)?;
        if self.referenced {
            return Ok(vec![]);
        }
        Ok(vec![ClientEvent::ClientReferenced(ClientReferenced {
            client_id: cmd.client_id,
            document_number: cmd.document_number.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_terms() -> ClientTerms {
        ClientTerms {
            client_type: ClientType::Hospital,
            payment_terms: 45,
            credit_limit: Some(Money::new(dec!(50000))),
        }
    }

    fn test_client() -> Client {
        let id = ClientId::generate();
        let mut client = Client::empty(id);
        client
            .execute(&ClientCommand::RegisterClient(RegisterClient {
                client_id: id,
                name: "Korle-Bu Teaching Hospital".into(),
                terms: test_terms(),
                contact: ContactInfo {
                    email: Some("procurement@kbth.gov.gh".into()),
                    city: Some("Accra".into()),
                    ..ContactInfo::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();
        client
    }

    fn test_reference(client: &mut Client) {
        client
            .execute(&ClientCommand::MarkReferenced(MarkReferenced {
                client_id: *client.id(),
                document_number: "QT-2025-0001".into(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
    }

    fn test_revise(client: &Client) -> ClientCommand {
        ClientCommand::ReviseTerms(ReviseTerms {
            client_id: *client.id(),
            terms: ClientTerms {
                payment_terms: 60,
                ..test_terms()
            },
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn register_client_sets_terms() {
        let client = test_client();
        assert_eq!(client.client_type(), ClientType::Hospital);
        assert_eq!(client.payment_terms(), 45);
        assert!(!client.is_referenced());
        assert_eq!(client.version(), 1);
    }

    #[test]
    fn terms_can_change_until_referenced() {
        let mut client = test_client();
        client.execute(&test_revise(&client)).unwrap();
        assert_eq!(client.payment_terms(), 60);

        test_reference(&mut client);
        let err = client.handle(&test_revise(&client)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn contact_edits_always_allowed() {
        let mut client = test_client();
        test_reference(&mut client);

        client
            .execute(&ClientCommand::UpdateContact(UpdateContact {
                client_id: *client.id(),
                contact: ContactInfo {
                    contact_name: Some("Dr. Kofi Mensah".into()),
                    ..ContactInfo::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(client.contact().contact_name.as_deref(), Some("Dr. Kofi Mensah"));
    }

    #[test]
    fn marking_referenced_twice_emits_nothing() {
        let mut client = test_client();
        test_reference(&mut client);
        let version = client.version();
        test_reference(&mut client);
        assert_eq!(client.version(), version);
    }

    #[test]
    fn negative_credit_limit_rejected() {
        let id = ClientId::generate();
        let err = Client::empty(id)
            .handle(&ClientCommand::RegisterClient(RegisterClient {
                client_id: id,
                name: "Ridge Hospital".into(),
                terms: ClientTerms {
                    credit_limit: Some(Money::new(dec!(-1))),
                    ..test_terms()
                },
                contact: ContactInfo::default(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
