//! Quote-to-invoice conversion.
//!
//! The quote's conversion bookkeeping and the invoice lines it produces are
//! written in one commit. A failure on the invoice side rolls back the quote
//! side as well and surfaces as `ConversionAborted`.

use serde_json::Value as JsonValue;

use medledger_core::{AggregateId, AggregateRoot, DomainError, Money};
use medledger_events::{EventBus, EventEnvelope};
use medledger_infra::command_dispatcher::{DispatchError, UnitOfWork};
use medledger_infra::event_store::EventStore;
use medledger_invoicing::{
    AddItems, CreateInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceItemId, NewInvoiceItem,
};
use medledger_parties::Client;
use medledger_quotes::{ConversionLine, Quote, QuoteCommand, QuoteEvent, QuoteId, RecordConversion};

use crate::error::LedgerResult;
use crate::invoices::due_after;
use crate::ledger::{DocumentKind, Ledger, abort_conversion, observe};

/// Both sides of a committed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub quote: Quote,
    pub invoice: Invoice,
    pub quote_id: QuoteId,
    pub invoice_id: InvoiceId,
    /// Selections as merged per quote item.
    pub lines: Vec<ConversionLine>,
}

/// Where converted lines go.
enum Target {
    New { invoice_id: InvoiceId, number: String },
    Existing(InvoiceId),
}

impl Target {
    fn invoice_id(&self) -> InvoiceId {
        match self {
            Target::New { invoice_id, .. } => *invoice_id,
            Target::Existing(invoice_id) => *invoice_id,
        }
    }
}

impl<S, B> Ledger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Convert quoted quantities into invoice lines.
    ///
    /// Without a `target`, a new DRAFT invoice is created for the quote's
    /// client at the quote's tax rate. With one, lines are appended to that
    /// DRAFT invoice, which must belong to the same client and quote.
    /// Duplicate selections of the same item are merged.
    pub fn convert_to_invoice(
        &self,
        quote_id: QuoteId,
        selections: Vec<ConversionLine>,
        target: Option<InvoiceId>,
    ) -> LedgerResult<Conversion> {
        observe(
            "convert_to_invoice",
            self.convert_to_invoice_inner(quote_id, selections, target),
        )
    }

    fn convert_to_invoice_inner(
        &self,
        quote_id: QuoteId,
        selections: Vec<ConversionLine>,
        target: Option<InvoiceId>,
    ) -> LedgerResult<Conversion> {
        let target = match target {
            Some(invoice_id) => Target::Existing(invoice_id),
            None => {
                // Fail fast on an unknown quote before burning a number.
                self.quote(quote_id)?;
                Target::New {
                    invoice_id: InvoiceId::generate(),
                    number: self.next_number(DocumentKind::Invoice)?,
                }
            }
        };
        let invoice_id = target.invoice_id();
        let today = self.today();
        let now = self.now();

        let result = self.dispatcher().transaction(
            [AggregateId::from(quote_id), AggregateId::from(invoice_id)],
            |uow| {
                let mut quote: Quote = uow.load(quote_id)?;
                let decided = uow.execute(
                    &mut quote,
                    &QuoteCommand::RecordConversion(RecordConversion {
                        quote_id,
                        invoice_id: invoice_id.into(),
                        lines: selections,
                        occurred_at: now,
                    }),
                )?;
                let lines = converted_lines(&decided)?;
                let items = invoice_items(&quote, &lines)?;

                let context = format!("quote {}", quote.quote_number());
                let invoice = match &target {
                    Target::New { number, .. } => {
                        let client_id = quote.client_id().ok_or_else(|| {
                            DomainError::conversion_aborted(format!("{context} has no client"))
                        })?;
                        let client: Client = uow.load(client_id)?;
                        let due_date = due_after(today, client.payment_terms())?;
                        create_from_quote(
                            uow,
                            CreateInvoice {
                                invoice_id,
                                invoice_number: number.clone(),
                                client_id,
                                quote_id: Some(quote_id),
                                issue_date: today,
                                due_date,
                                items,
                                tax_rate: quote.totals().tax_rate,
                                discount: Money::ZERO,
                                notes: None,
                                occurred_at: now,
                            },
                        )
                        .map_err(abort_conversion(&context))?
                    }
                    Target::Existing(_) => append_to_invoice(uow, &quote, invoice_id, items, now)
                        .map_err(abort_conversion(&context))?,
                };

                Ok(Conversion {
                    quote,
                    invoice,
                    quote_id,
                    invoice_id,
                    lines,
                })
            },
        );

        // A conflicting commit means the whole conversion was discarded.
        let conversion = result.map_err(|err| match err {
            DispatchError::Concurrency(detail) => DispatchError::Domain(
                DomainError::conversion_aborted(format!("quote {quote_id}: {detail}")),
            ),
            other => other,
        })?;

        tracing::info!(
            quote_id = %quote_id,
            quote_number = conversion.quote.quote_number(),
            invoice_id = %invoice_id,
            invoice_number = conversion.invoice.invoice_number(),
            lines = conversion.lines.len(),
            quote_status = %conversion.quote.stored_status(),
            "quote converted"
        );
        Ok(conversion)
    }
}

/// Merged per-item lines the quote accepted.
fn converted_lines(decided: &[QuoteEvent]) -> Result<Vec<ConversionLine>, DispatchError> {
    decided
        .iter()
        .find_map(|event| match event {
            QuoteEvent::QuoteConverted(converted) => Some(converted.lines.clone()),
            _ => None,
        })
        .ok_or_else(|| DomainError::conversion_aborted("quote recorded no conversion").into())
}

/// Invoice lines priced at the quote's frozen snapshots.
fn invoice_items(
    quote: &Quote,
    lines: &[ConversionLine],
) -> Result<Vec<NewInvoiceItem>, DispatchError> {
    lines
        .iter()
        .map(|line| {
            let item = quote
                .item(line.item_id)
                .ok_or_else(|| DomainError::not_found("quote item", line.item_id))?;
            Ok(NewInvoiceItem {
                item_id: InvoiceItemId::generate(),
                snapshot: item.snapshot.clone(),
                quantity: line.quantity,
                quote_item_id: Some(item.id),
            })
        })
        .collect()
}

fn create_from_quote<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    command: CreateInvoice,
) -> Result<Invoice, DispatchError> {
    let mut invoice: Invoice = uow.load(command.invoice_id)?;
    uow.execute(&mut invoice, &InvoiceCommand::CreateInvoice(command))?;
    Ok(invoice)
}

fn append_to_invoice<S: EventStore>(
    uow: &mut UnitOfWork<'_, S>,
    quote: &Quote,
    invoice_id: InvoiceId,
    items: Vec<NewInvoiceItem>,
    occurred_at: chrono::DateTime<chrono::Utc>,
) -> Result<Invoice, DispatchError> {
    let mut invoice: Invoice = uow.load(invoice_id)?;
    if invoice.client_id().is_none() {
        return Err(DomainError::not_found("invoice", invoice_id).into());
    }
    if invoice.client_id() != quote.client_id() {
        return Err(DomainError::validation(format!(
            "invoice {} belongs to another client",
            invoice.invoice_number()
        ))
        .into());
    }
    uow.execute(
        &mut invoice,
        &InvoiceCommand::AddItems(AddItems {
            invoice_id,
            quote_id: Some(*quote.id()),
            items,
            occurred_at,
        }),
    )?;
    Ok(invoice)
}
