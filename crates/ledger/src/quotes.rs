//! Quote lifecycle: drafting, pricing and the client's decision.

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use medledger_core::{AggregateId, AggregateRoot, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope};
use medledger_infra::event_store::EventStore;
use medledger_parties::ClientId;
use medledger_quotes::{
    AddItem, ApproveQuote, ChangeItemQuantity, CreateQuote, NewQuoteItem, Quote, QuoteCommand,
    QuoteId, QuoteItemId, RejectQuote, RemoveItem, SendQuote, SetPricing,
};

use crate::clients::reference_client;
use crate::error::LedgerResult;
use crate::ledger::{DocumentKind, Ledger, LineRequest, observe};
use crate::query::QuoteFilter;

/// Quote to draft. Unset fields take configured defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuote {
    pub client_id: ClientId,
    pub lines: Vec<LineRequest>,
    /// Today when `None`.
    pub issue_date: Option<NaiveDate>,
    /// Issue date plus the configured validity when `None`.
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub discount: Money,
    pub notes: Option<String>,
    pub terms: Option<String>,
}

impl NewQuote {
    pub fn new(client_id: ClientId, lines: Vec<LineRequest>) -> Self {
        Self {
            client_id,
            lines,
            issue_date: None,
            valid_until: None,
            tax_rate: None,
            discount: Money::ZERO,
            notes: None,
            terms: None,
        }
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Draft a quote. Lines are priced from the catalogue at this moment.
    pub fn create_quote(&self, new: NewQuote) -> LedgerResult<Quote> {
        observe("create_quote", self.create_quote_inner(new))
    }

    fn create_quote_inner(&self, new: NewQuote) -> LedgerResult<Quote> {
        let documents = &self.config().documents;
        let items = new
            .lines
            .iter()
            .map(|line| {
                Ok(NewQuoteItem {
                    item_id: QuoteItemId::generate(),
                    snapshot: self.price_line(line)?,
                    quantity: line.quantity,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        let issue_date = new.issue_date.unwrap_or_else(|| self.today());
        let valid_until = match new.valid_until {
            Some(date) => date,
            None => issue_date
                .checked_add_days(Days::new(u64::from(documents.quote_validity_days)))
                .ok_or_else(|| DomainError::validation("validity date out of range"))?,
        };
        let terms = new.terms.or_else(|| documents.default_quote_terms.clone());

        let quote_number = self.next_number(DocumentKind::Quote)?;
        let quote_id = QuoteId::generate();
        let now = self.now();

        let quote = self.dispatcher().transaction(
            [AggregateId::from(quote_id), AggregateId::from(new.client_id)],
            |uow| {
                reference_client(uow, new.client_id, &quote_number, now)?;
                let mut quote: Quote = uow.load(quote_id)?;
                uow.execute(
                    &mut quote,
                    &QuoteCommand::CreateQuote(CreateQuote {
                        quote_id,
                        quote_number: quote_number.clone(),
                        client_id: new.client_id,
                        issue_date,
                        valid_until,
                        items,
                        tax_rate: new.tax_rate.unwrap_or(documents.default_tax_rate),
                        discount: new.discount,
                        notes: new.notes,
                        terms,
                        occurred_at: now,
                    }),
                )?;
                Ok(quote)
            },
        )?;

        tracing::info!(
            quote_id = %quote_id,
            quote_number = quote.quote_number(),
            client_id = %new.client_id,
            total = %quote.total(),
            "quote created"
        );
        Ok(quote)
    }

    pub fn add_quote_item(&self, quote_id: QuoteId, line: LineRequest) -> LedgerResult<Quote> {
        let result = self.price_line(&line).and_then(|snapshot| {
            self.quote_command(
                quote_id,
                QuoteCommand::AddItem(AddItem {
                    quote_id,
                    item: NewQuoteItem {
                        item_id: QuoteItemId::generate(),
                        snapshot,
                        quantity: line.quantity,
                    },
                    occurred_at: self.now(),
                }),
            )
        });
        observe("add_quote_item", result)
    }

    pub fn change_quote_item_quantity(
        &self,
        quote_id: QuoteId,
        item_id: QuoteItemId,
        quantity: i64,
    ) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::ChangeItemQuantity(ChangeItemQuantity {
                quote_id,
                item_id,
                quantity,
                occurred_at: self.now(),
            }),
        );
        observe("change_quote_item_quantity", result)
    }

    pub fn remove_quote_item(&self, quote_id: QuoteId, item_id: QuoteItemId) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::RemoveItem(RemoveItem {
                quote_id,
                item_id,
                occurred_at: self.now(),
            }),
        );
        observe("remove_quote_item", result)
    }

    /// Replace tax rate and discount; totals are recomputed.
    pub fn set_quote_pricing(
        &self,
        quote_id: QuoteId,
        tax_rate: Decimal,
        discount: Money,
    ) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::SetPricing(SetPricing {
                quote_id,
                tax_rate,
                discount,
                occurred_at: self.now(),
            }),
        );
        observe("set_quote_pricing", result)
    }

    pub fn send_quote(&self, quote_id: QuoteId) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::SendQuote(SendQuote {
                quote_id,
                occurred_at: self.now(),
            }),
        );
        observe("send_quote", result)
    }

    pub fn approve_quote(&self, quote_id: QuoteId) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::ApproveQuote(ApproveQuote {
                quote_id,
                occurred_at: self.now(),
            }),
        );
        observe("approve_quote", result)
    }

    pub fn reject_quote(&self, quote_id: QuoteId, reason: Option<String>) -> LedgerResult<Quote> {
        let result = self.quote_command(
            quote_id,
            QuoteCommand::RejectQuote(RejectQuote {
                quote_id,
                reason,
                occurred_at: self.now(),
            }),
        );
        observe("reject_quote", result)
    }

    pub fn quote(&self, quote_id: QuoteId) -> LedgerResult<Quote> {
        self.existing(quote_id, "quote")
    }

    /// Quotes in creation order. Status matches the effective status today.
    pub fn quotes(&self, filter: &QuoteFilter) -> LedgerResult<Vec<Quote>> {
        let today = self.today();
        Ok(self
            .dispatcher()
            .load_all::<Quote>()?
            .into_iter()
            .filter(|q| filter.status.is_none_or(|s| s == q.effective_status(today)))
            .filter(|q| filter.client_id.is_none_or(|c| q.client_id() == Some(c)))
            .filter(|q| filter.issued.contains(q.issue_date()))
            .collect())
    }

    fn quote_command(&self, quote_id: QuoteId, command: QuoteCommand) -> LedgerResult<Quote> {
        let quote: Quote = self.dispatcher().dispatch(quote_id, &command)?;
        tracing::debug!(
            quote_id = %quote.id(),
            version = quote.version(),
            status = %quote.stored_status(),
            "quote updated"
        );
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::NewProduct;
    use crate::clients::NewClient;
    use crate::clock::ManualClock;
    use crate::ledger::InMemoryLedger;
    use medledger_infra::config::LedgerConfig;
    use medledger_inventory::{ProductDetails, ProductId};
    use medledger_parties::{ClientType, ContactInfo};
    use medledger_quotes::QuoteStatus;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        ledger: InMemoryLedger,
        clock: Arc<ManualClock>,
        client: ClientId,
        product: ProductId,
    }

    fn test_fixture() -> Fixture {
        let mut config = LedgerConfig::default();
        config.documents.default_tax_rate = dec!(0.18);
        config.documents.default_quote_terms = Some("Delivery within 7 days".into());
        let clock = Arc::new(ManualClock::on(date(2025, 3, 3)));
        let ledger = InMemoryLedger::in_memory(config).with_clock(clock.clone());

        let client = *ledger
            .register_client(NewClient {
                name: "Mulago Hospital".into(),
                client_type: ClientType::Hospital,
                payment_terms: Some(30),
                credit_limit: None,
                contact: ContactInfo::default(),
            })
            .unwrap()
            .id();
        let product = *ledger
            .register_product(NewProduct {
                sku: "MED-SYR-005".into(),
                details: ProductDetails {
                    name: "Syringe 5ml".into(),
                    unit: "box".into(),
                    ..ProductDetails::default()
                },
                unit_price: Money::new(dec!(45)),
                opening_stock: 100,
            })
            .unwrap()
            .id();

        Fixture {
            ledger,
            clock,
            client,
            product,
        }
    }

    #[test]
    fn create_applies_configured_defaults_and_freezes_client() {
        let fx = test_fixture();
        let quote = fx
            .ledger
            .create_quote(NewQuote::new(fx.client, vec![LineRequest::new(fx.product, 20)]))
            .unwrap();

        assert_eq!(quote.quote_number(), "QT-2025-0001");
        assert_eq!(quote.valid_until(), date(2025, 3, 17));
        assert_eq!(quote.totals().tax_rate, dec!(0.18));
        assert_eq!(quote.total(), Money::new(dec!(1062.00)));
        assert_eq!(quote.terms(), Some("Delivery within 7 days"));
        assert!(fx.ledger.client(fx.client).unwrap().is_referenced());
    }

    #[test]
    fn unknown_client_burns_the_number_and_writes_nothing() {
        let fx = test_fixture();
        let err = fx
            .ledger
            .create_quote(NewQuote::new(
                ClientId::generate(),
                vec![LineRequest::new(fx.product, 1)],
            ))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { entity: "client", .. })));
        assert!(fx.ledger.quotes(&QuoteFilter::default()).unwrap().is_empty());

        let next = fx
            .ledger
            .create_quote(NewQuote::new(fx.client, vec![LineRequest::new(fx.product, 1)]))
            .unwrap();
        assert_eq!(next.quote_number(), "QT-2025-0002");
    }

    #[test]
    fn catalogue_price_change_does_not_touch_existing_quotes() {
        let fx = test_fixture();
        let quote = fx
            .ledger
            .create_quote(NewQuote::new(fx.client, vec![LineRequest::new(fx.product, 2)]))
            .unwrap();
        fx.ledger.change_price(fx.product, Money::new(dec!(60))).unwrap();

        let reloaded = fx.ledger.quote(*quote.id()).unwrap();
        assert_eq!(reloaded.items()[0].snapshot.unit_price, Money::new(dec!(45)));

        let extended = fx
            .ledger
            .add_quote_item(*quote.id(), LineRequest::new(fx.product, 1))
            .unwrap();
        assert_eq!(extended.items()[1].snapshot.unit_price, Money::new(dec!(60)));
    }

    #[test]
    fn expiry_is_evaluated_against_the_clock() {
        let fx = test_fixture();
        let quote = fx
            .ledger
            .create_quote(NewQuote::new(fx.client, vec![LineRequest::new(fx.product, 2)]))
            .unwrap();
        let id = *quote.id();
        fx.ledger.send_quote(id).unwrap();

        fx.clock.set(date(2025, 3, 18).and_hms_opt(9, 0, 0).unwrap().and_utc());
        let expired = fx
            .ledger
            .quotes(&QuoteFilter {
                status: Some(QuoteStatus::Expired),
                ..QuoteFilter::default()
            })
            .unwrap();
        assert_eq!(expired.len(), 1);

        let err = fx.ledger.approve_quote(id).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition { .. })));
        assert_eq!(fx.ledger.quote(id).unwrap().stored_status(), QuoteStatus::Sent);
    }

    #[test]
    fn editing_stops_once_sent() {
        let fx = test_fixture();
        let quote = fx
            .ledger
            .create_quote(NewQuote::new(fx.client, vec![LineRequest::new(fx.product, 2)]))
            .unwrap();
        let id = *quote.id();
        let item = quote.items()[0].id;

        fx.ledger.change_quote_item_quantity(id, item, 5).unwrap();
        fx.ledger.set_quote_pricing(id, dec!(0), Money::new(dec!(25))).unwrap();
        let sent = fx.ledger.send_quote(id).unwrap();
        assert_eq!(sent.total(), Money::new(dec!(200)));

        let err = fx.ledger.remove_quote_item(id, item).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition { .. })));
        let rejected = fx.ledger.reject_quote(id, Some("budget".into())).unwrap();
        assert_eq!(rejected.stored_status(), QuoteStatus::Rejected);
    }
}
