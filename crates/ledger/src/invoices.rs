//! Invoices, the stock they move, and the payments applied to them.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use medledger_core::{AggregateId, AggregateRoot, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope};
use medledger_infra::command_dispatcher::{DispatchError, UnitOfWork};
use medledger_infra::event_store::EventStore;
use medledger_inventory::{InventoryCommand, MovementId, MovementType, Product, RecordMovement};
use medledger_invoicing::{
    AddItems, CancelInvoice, CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceItemId,
    InvoiceStatus, NewInvoiceItem, PaymentId, PaymentMethod, RecordPayment, RemoveItem,
    ReversePayment, SendInvoice,
};
use medledger_parties::ClientId;

use crate::clients::reference_client;
use crate::error::LedgerResult;
use crate::ledger::{DocumentKind, Ledger, LineRequest, observe};
use crate::query::{InvoiceFilter, PaymentFilter, PaymentRecord};

/// Attempts at claiming an invoice together with its products before giving up.
const STOCK_CLAIM_ATTEMPTS: usize = 3;

/// Invoice to draft without a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub client_id: ClientId,
    pub lines: Vec<LineRequest>,
    /// Today when `None`.
    pub issue_date: Option<NaiveDate>,
    /// Issue date plus the client's payment terms when `None`.
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub discount: Money,
    pub notes: Option<String>,
}

impl NewInvoice {
    pub fn new(client_id: ClientId, lines: Vec<LineRequest>) -> Self {
        Self {
            client_id,
            lines,
            issue_date: None,
            due_date: None,
            tax_rate: None,
            discount: Money::ZERO,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub amount: Money,
    pub method: PaymentMethod,
    /// Today when `None`.
    pub paid_on: Option<NaiveDate>,
    pub reference: Option<String>,
}

impl NewPayment {
    pub fn new(amount: Money, method: PaymentMethod) -> Self {
        Self {
            amount,
            method,
            paid_on: None,
            reference: None,
        }
    }
}

/// `issue_date + days`, failing on calendar overflow.
pub(crate) fn due_after(issue_date: NaiveDate, days: u32) -> Result<NaiveDate, DomainError> {
    issue_date
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| DomainError::validation("due date out of range"))
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Draft an invoice directly, priced from the catalogue or at negotiated
    /// prices.
    pub fn create_invoice(&self, new: NewInvoice) -> LedgerResult<Invoice> {
        observe("create_invoice", self.create_invoice_inner(new))
    }

    fn create_invoice_inner(&self, new: NewInvoice) -> LedgerResult<Invoice> {
        let items = self.invoice_items(&new.lines)?;
        let issue_date = new.issue_date.unwrap_or_else(|| self.today());
        let tax_rate = new
            .tax_rate
            .unwrap_or(self.config().documents.default_tax_rate);

        let invoice_number = self.next_number(DocumentKind::Invoice)?;
        let invoice_id = InvoiceId::generate();
        let now = self.now();

        let invoice = self.dispatcher().transaction(
            [AggregateId::from(invoice_id), AggregateId::from(new.client_id)],
            |uow| {
                let client = reference_client(uow, new.client_id, &invoice_number, now)?;
                let due_date = match new.due_date {
                    Some(date) => date,
                    None => due_after(issue_date, client.payment_terms())?,
                };
                let mut invoice: Invoice = uow.load(invoice_id)?;
                uow.execute(
                    &mut invoice,
                    &InvoiceCommand::CreateInvoice(CreateInvoice {
                        invoice_id,
                        invoice_number: invoice_number.clone(),
                        client_id: new.client_id,
                        quote_id: None,
                        issue_date,
                        due_date,
                        items,
                        tax_rate,
                        discount: new.discount,
                        notes: new.notes,
                        occurred_at: now,
                    }),
                )?;
                Ok(invoice)
            },
        )?;

        tracing::info!(
            invoice_id = %invoice_id,
            invoice_number = invoice.invoice_number(),
            client_id = %new.client_id,
            total = %invoice.total(),
            "invoice created"
        );
        Ok(invoice)
    }

    /// Append catalogue-priced lines to a DRAFT invoice.
    pub fn add_invoice_items(
        &self,
        invoice_id: InvoiceId,
        lines: Vec<LineRequest>,
    ) -> LedgerResult<Invoice> {
        let result = self.invoice_items(&lines).and_then(|items| {
            self.dispatcher()
                .dispatch::<Invoice>(
                    invoice_id,
                    &InvoiceCommand::AddItems(AddItems {
                        invoice_id,
                        quote_id: None,
                        items,
                        occurred_at: self.now(),
                    }),
                )
                .map_err(Into::into)
        });
        observe("add_invoice_items", result)
    }

    /// Lines converted from a quote cannot be removed.
    pub fn remove_invoice_item(
        &self,
        invoice_id: InvoiceId,
        item_id: InvoiceItemId,
    ) -> LedgerResult<Invoice> {
        let result = self
            .dispatcher()
            .dispatch::<Invoice>(
                invoice_id,
                &InvoiceCommand::RemoveItem(RemoveItem {
                    invoice_id,
                    item_id,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);
        observe("remove_invoice_item", result)
    }

    /// DRAFT → SENT, recording one INVOICE movement per line in the same
    /// commit. Any line short of stock aborts the whole send.
    pub fn send_invoice(&self, invoice_id: InvoiceId) -> LedgerResult<Invoice> {
        let allow_negative = self.config().inventory.allow_negative_stock;
        let result = self.with_invoice_stock(invoice_id, |uow, mut invoice, now| {
            uow.execute(
                &mut invoice,
                &InvoiceCommand::SendInvoice(SendInvoice {
                    invoice_id,
                    occurred_at: now,
                }),
            )?;
            let note = format!("Invoice {}", invoice.invoice_number());
            for item in invoice.items() {
                move_stock(
                    uow,
                    &invoice,
                    MovementType::Invoice,
                    item.snapshot.product_id,
                    -item.quantity,
                    &note,
                    allow_negative,
                    now,
                )?;
            }
            Ok(invoice)
        });

        if let Ok(invoice) = &result {
            tracing::info!(
                invoice_id = %invoice_id,
                invoice_number = invoice.invoice_number(),
                lines = invoice.items().len(),
                "invoice sent"
            );
        }
        observe("send_invoice", result)
    }

    /// Cancel a DRAFT or unpaid SENT invoice. A SENT invoice's stock comes back
    /// as one RETURN movement per line.
    pub fn cancel_invoice(
        &self,
        invoice_id: InvoiceId,
        reason: Option<String>,
    ) -> LedgerResult<Invoice> {
        let result = self.with_invoice_stock(invoice_id, |uow, mut invoice, now| {
            let was_sent = invoice.stored_status() == InvoiceStatus::Sent;
            uow.execute(
                &mut invoice,
                &InvoiceCommand::CancelInvoice(CancelInvoice {
                    invoice_id,
                    reason: reason.clone(),
                    occurred_at: now,
                }),
            )?;
            if was_sent {
                let note = format!("Cancelled invoice {}", invoice.invoice_number());
                for item in invoice.items() {
                    move_stock(
                        uow,
                        &invoice,
                        MovementType::Return,
                        item.snapshot.product_id,
                        item.quantity,
                        &note,
                        false,
                        now,
                    )?;
                }
            }
            Ok(invoice)
        });

        if let Ok(invoice) = &result {
            tracing::info!(
                invoice_id = %invoice_id,
                invoice_number = invoice.invoice_number(),
                "invoice cancelled"
            );
        }
        observe("cancel_invoice", result)
    }

    /// Record a payment and recompute balance and status.
    pub fn apply_payment(&self, invoice_id: InvoiceId, payment: NewPayment) -> LedgerResult<Invoice> {
        let result = self
            .dispatcher()
            .dispatch::<Invoice>(
                invoice_id,
                &InvoiceCommand::RecordPayment(RecordPayment {
                    invoice_id,
                    payment_id: PaymentId::generate(),
                    amount: payment.amount,
                    method: payment.method,
                    paid_on: payment.paid_on.unwrap_or_else(|| self.today()),
                    reference: payment.reference,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);

        if let Ok(invoice) = &result {
            tracing::info!(
                invoice_id = %invoice_id,
                amount = %payment.amount,
                method = %payment.method,
                balance_due = %invoice.balance_due(),
                status = %invoice.stored_status(),
                "payment applied"
            );
        }
        observe("apply_payment", result)
    }

    /// Append a negative payment cancelling `payment_id`.
    pub fn reverse_payment(
        &self,
        invoice_id: InvoiceId,
        payment_id: PaymentId,
        reference: Option<String>,
    ) -> LedgerResult<Invoice> {
        let result = self
            .dispatcher()
            .dispatch::<Invoice>(
                invoice_id,
                &InvoiceCommand::ReversePayment(ReversePayment {
                    invoice_id,
                    payment_id: PaymentId::generate(),
                    reverses: payment_id,
                    reference,
                    occurred_at: self.now(),
                }),
            )
            .map_err(Into::into);

        if let Ok(invoice) = &result {
            tracing::info!(
                invoice_id = %invoice_id,
                reversed = %payment_id,
                balance_due = %invoice.balance_due(),
                status = %invoice.stored_status(),
                "payment reversed"
            );
        }
        observe("reverse_payment", result)
    }

    pub fn invoice(&self, invoice_id: InvoiceId) -> LedgerResult<Invoice> {
        self.existing(invoice_id, "invoice")
    }

    /// Invoices in creation order. Status matches the effective status today.
    pub fn invoices(&self, filter: &InvoiceFilter) -> LedgerResult<Vec<Invoice>> {
        let today = self.today();
        Ok(self
            .dispatcher()
            .load_all::<Invoice>()?
            .into_iter()
            .filter(|i| filter.status.is_none_or(|s| s == i.effective_status(today)))
            .filter(|i| filter.client_id.is_none_or(|c| i.client_id() == Some(c)))
            .filter(|i| filter.quote_id.is_none_or(|q| i.quote_id() == Some(q)))
            .filter(|i| filter.issued.contains(i.issue_date()))
            .collect())
    }

    /// Payments and reversals across invoices, in invoice then recording order.
    pub fn payments(&self, filter: &PaymentFilter) -> LedgerResult<Vec<PaymentRecord>> {
        let mut records = Vec::new();
        for invoice in self.dispatcher().load_all::<Invoice>()? {
            let Some(client_id) = invoice.client_id() else {
                continue;
            };
            if filter.invoice_id.is_some_and(|id| id != *invoice.id())
                || filter.client_id.is_some_and(|c| c != client_id)
            {
                continue;
            }
            records.extend(
                invoice
                    .payments()
                    .iter()
                    .filter(|p| filter.method.is_none_or(|m| m == p.method))
                    .filter(|p| filter.paid.contains(p.paid_on))
                    .map(|p| PaymentRecord {
                        invoice_id: *invoice.id(),
                        invoice_number: invoice.invoice_number().to_string(),
                        client_id,
                        payment: p.clone(),
                    }),
            );
        }
        Ok(records)
    }

    pub(crate) fn invoice_items(&self, lines: &[LineRequest]) -> LedgerResult<Vec<NewInvoiceItem>> {
        lines
            .iter()
            .map(|line| {
                Ok(NewInvoiceItem {
                    item_id: InvoiceItemId::generate(),
                    snapshot: self.price_line(line)?,
                    quantity: line.quantity,
                    quote_item_id: None,
                })
            })
            .collect()
    }

    /// Run `work` with the invoice and every product it references claimed.
    ///
    /// The product set is read before claiming; if the invoice's lines changed
    /// in between, the claim is retried.
    fn with_invoice_stock<F>(&self, invoice_id: InvoiceId, mut work: F) -> LedgerResult<Invoice>
    where
        F: FnMut(
            &mut UnitOfWork<'_, S>,
            Invoice,
            DateTime<Utc>,
        ) -> Result<Invoice, DispatchError>,
    {
        let mut attempt = 1;
        loop {
            let snapshot: Invoice = self.existing(invoice_id, "invoice")?;
            let products = stock_claims(&snapshot);
            let claims = std::iter::once(AggregateId::from(invoice_id))
                .chain(products.iter().copied());
            let now = self.now();

            let result = self.dispatcher().transaction(claims, |uow| {
                let invoice: Invoice = uow.load(invoice_id)?;
                if stock_claims(&invoice) != products {
                    return Err(DispatchError::Concurrency(format!(
                        "lines of invoice {invoice_id} changed while claiming stock"
                    )));
                }
                work(uow, invoice, now)
            });

            match result {
                Err(DispatchError::Concurrency(detail)) if attempt < STOCK_CLAIM_ATTEMPTS => {
                    tracing::debug!(invoice_id = %invoice_id, attempt, %detail, "retrying stock claim");
                    attempt += 1;
                }
                other => return Ok(other?),
            }
        }
    }
}

/// Product streams an invoice's lines touch, sorted and deduplicated.
fn stock_claims(invoice: &Invoice) -> Vec<AggregateId> {
    let mut ids: Vec<AggregateId> = invoice
        .items()
        .iter()
        .map(|i| AggregateId::from(i.snapshot.product_id))
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[allow(clippy::too_many_arguments)]
fn move_stock<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    invoice: &Invoice,
    movement_type: MovementType,
    product_id: medledger_inventory::ProductId,
    quantity: i64,
    note: &str,
    allow_negative: bool,
    occurred_at: DateTime<Utc>,
) -> Result<(), DispatchError> {
    let mut product: Product = uow.load(product_id)?;
    let previous = product.stock_quantity();
    uow.execute(
        &mut product,
        &InventoryCommand::RecordMovement(RecordMovement {
            product_id,
            movement_id: MovementId::generate(),
            movement_type,
            quantity,
            expected_previous: Some(previous),
            invoice_id: Some((*invoice.id()).into()),
            note: note.to_string(),
            allow_negative,
            occurred_at,
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::NewProduct;
    use crate::clients::NewClient;
    use crate::clock::ManualClock;
    use crate::ledger::InMemoryLedger;
    use crate::query::MovementFilter;
    use medledger_infra::config::LedgerConfig;
    use medledger_inventory::{ProductDetails, ProductId};
    use medledger_parties::{ClientType, ContactInfo};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        ledger: InMemoryLedger,
        clock: Arc<ManualClock>,
        client: ClientId,
        gloves: ProductId,
        masks: ProductId,
    }

    fn test_product(ledger: &InMemoryLedger, sku: &str, price: Decimal, stock: i64) -> ProductId {
        *ledger
            .register_product(NewProduct {
                sku: sku.into(),
                details: ProductDetails {
                    name: sku.into(),
                    unit: "box".into(),
                    ..ProductDetails::default()
                },
                unit_price: Money::new(price),
                opening_stock: stock,
            })
            .unwrap()
            .id()
    }

    fn test_fixture() -> Fixture {
        let clock = Arc::new(ManualClock::on(date(2025, 1, 6)));
        let ledger = InMemoryLedger::in_memory(LedgerConfig::default()).with_clock(clock.clone());
        let client = *ledger
            .register_client(NewClient {
                name: "Kampala Medical Distributors".into(),
                client_type: ClientType::Distributor,
                payment_terms: Some(14),
                credit_limit: None,
                contact: ContactInfo::default(),
            })
            .unwrap()
            .id();
        let gloves = test_product(&ledger, "MED-GLV-002", dec!(95), 10);
        let masks = test_product(&ledger, "MED-MSK-004", dec!(40), 50);
        Fixture {
            ledger,
            clock,
            client,
            gloves,
            masks,
        }
    }

    #[test]
    fn due_date_follows_client_terms_and_negotiated_price_is_kept() {
        let fx = test_fixture();
        let invoice = fx
            .ledger
            .create_invoice(NewInvoice::new(
                fx.client,
                vec![LineRequest::new(fx.gloves, 2).at_price(Money::new(dec!(80)))],
            ))
            .unwrap();

        assert_eq!(invoice.invoice_number(), "INV-2025-0001");
        assert_eq!(invoice.due_date(), date(2025, 1, 20));
        assert_eq!(invoice.total(), Money::new(dec!(160)));
        assert!(fx.ledger.client(fx.client).unwrap().is_referenced());
    }

    #[test]
    fn sending_moves_stock_for_every_line_in_one_commit() {
        let fx = test_fixture();
        let invoice = fx
            .ledger
            .create_invoice(NewInvoice::new(
                fx.client,
                vec![
                    LineRequest::new(fx.gloves, 4),
                    LineRequest::new(fx.masks, 5),
                    LineRequest::new(fx.gloves, 1),
                ],
            ))
            .unwrap();
        let id = *invoice.id();

        let sent = fx.ledger.send_invoice(id).unwrap();
        assert_eq!(sent.stored_status(), InvoiceStatus::Sent);
        assert_eq!(fx.ledger.current_stock(fx.gloves).unwrap(), 5);
        assert_eq!(fx.ledger.current_stock(fx.masks).unwrap(), 45);

        let movements = fx.ledger.stock_movements(&MovementFilter::for_invoice(id)).unwrap();
        assert_eq!(movements.len(), 3);
        assert!(movements.iter().all(|m| m.movement.movement_type == MovementType::Invoice));
        let gloves: Vec<_> = movements
            .iter()
            .filter(|m| m.product_id == fx.gloves)
            .map(|m| (m.movement.previous_stock, m.movement.new_stock))
            .collect();
        assert_eq!(gloves, vec![(10, 6), (6, 5)]);
    }

    #[test]
    fn short_line_aborts_the_whole_send() {
        let fx = test_fixture();
        let invoice = fx
            .ledger
            .create_invoice(NewInvoice::new(
                fx.client,
                vec![LineRequest::new(fx.masks, 5), LineRequest::new(fx.gloves, 12)],
            ))
            .unwrap();
        let id = *invoice.id();

        let err = fx.ledger.send_invoice(id).unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientStock { available: 10, requested: -12 })
        ));
        assert_eq!(fx.ledger.invoice(id).unwrap().stored_status(), InvoiceStatus::Draft);
        assert_eq!(fx.ledger.current_stock(fx.masks).unwrap(), 50);
        assert!(
            fx.ledger
                .stock_movements(&MovementFilter::for_invoice(id))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn cancelling_a_sent_invoice_restocks() {
        let fx = test_fixture();
        let id = *fx
            .ledger
            .create_invoice(NewInvoice::new(fx.client, vec![LineRequest::new(fx.gloves, 3)]))
            .unwrap()
            .id();
        fx.ledger.send_invoice(id).unwrap();
        assert_eq!(fx.ledger.current_stock(fx.gloves).unwrap(), 7);

        let cancelled = fx.ledger.cancel_invoice(id, Some("duplicate".into())).unwrap();
        assert_eq!(cancelled.stored_status(), InvoiceStatus::Cancelled);
        assert_eq!(fx.ledger.current_stock(fx.gloves).unwrap(), 10);

        let returns = fx
            .ledger
            .stock_movements(&MovementFilter {
                movement_type: Some(MovementType::Return),
                ..MovementFilter::for_invoice(id)
            })
            .unwrap();
        assert_eq!(returns.len(), 1);
        assert_eq!(fx.ledger.reconcile_product(fx.gloves).unwrap().replayed_stock, 10);
    }

    #[test]
    fn cancelling_an_oversold_invoice_restocks_from_negative() {
        let mut config = LedgerConfig::default();
        config.inventory.allow_negative_stock = true;
        let ledger = InMemoryLedger::in_memory(config);
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
        let gauze = test_product(&ledger, "MED-GZE-003", dec!(12), 2);
        let id = *ledger
            .create_invoice(NewInvoice::new(client, vec![LineRequest::new(gauze, 5)]))
            .unwrap()
            .id();
        ledger.send_invoice(id).unwrap();
        assert_eq!(ledger.current_stock(gauze).unwrap(), -3);

        ledger.cancel_invoice(id, None).unwrap();
        assert_eq!(ledger.current_stock(gauze).unwrap(), 2);
        assert_eq!(ledger.reconcile_product(gauze).unwrap().replayed_stock, 2);
    }

    #[test]
    fn cancelling_a_draft_leaves_stock_alone() {
        let fx = test_fixture();
        let id = *fx
            .ledger
            .create_invoice(NewInvoice::new(fx.client, vec![LineRequest::new(fx.gloves, 3)]))
            .unwrap()
            .id();
        fx.ledger.cancel_invoice(id, None).unwrap();
        assert_eq!(fx.ledger.current_stock(fx.gloves).unwrap(), 10);
        assert_eq!(fx.ledger.product(fx.gloves).unwrap().movements().len(), 1);
    }

    #[test]
    fn payments_drive_status_and_reversal_reopens() {
        let fx = test_fixture();
        let id = *fx
            .ledger
            .create_invoice(NewInvoice::new(fx.client, vec![LineRequest::new(fx.gloves, 2)]))
            .unwrap()
            .id();

        let err = fx
            .ledger
            .apply_payment(id, NewPayment::new(Money::new(dec!(50)), PaymentMethod::Cash))
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition { .. })));

        fx.ledger.send_invoice(id).unwrap();
        let paid = fx
            .ledger
            .apply_payment(
                id,
                NewPayment::new(Money::new(dec!(190)), PaymentMethod::MobileMoney),
            )
            .unwrap();
        assert_eq!(paid.stored_status(), InvoiceStatus::Paid);
        assert!(paid.balance_due().is_zero());

        let payment_id = paid.payments()[0].id;
        let reopened = fx.ledger.reverse_payment(id, payment_id, None).unwrap();
        assert_eq!(reopened.stored_status(), InvoiceStatus::Sent);
        assert_eq!(reopened.balance_due(), Money::new(dec!(190)));

        let err = fx.ledger.reverse_payment(id, payment_id, None).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
        assert_eq!(
            fx.ledger
                .payments(&PaymentFilter {
                    client_id: Some(fx.client),
                    ..PaymentFilter::default()
                })
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn overdue_is_read_lazily() {
        let fx = test_fixture();
        let id = *fx
            .ledger
            .create_invoice(NewInvoice::new(fx.client, vec![LineRequest::new(fx.masks, 1)]))
            .unwrap()
            .id();
        fx.ledger.send_invoice(id).unwrap();

        let overdue = InvoiceFilter {
            status: Some(InvoiceStatus::Overdue),
            ..InvoiceFilter::default()
        };
        assert!(fx.ledger.invoices(&overdue).unwrap().is_empty());

        fx.clock.advance(chrono::Duration::days(15));
        assert_eq!(fx.ledger.invoices(&overdue).unwrap().len(), 1);
        assert_eq!(fx.ledger.invoice(id).unwrap().stored_status(), InvoiceStatus::Sent);
    }
}
