use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medledger_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentTotals, DomainError, DomainResult, Money,
    entity::find_by_id, typed_id,
};
use medledger_events::Event;
use medledger_parties::ClientId;
use medledger_quotes::QuoteId;

use crate::item::{InvoiceItem, InvoiceItemId, NewInvoiceItem};
use crate::payment::{Payment, PaymentId, PaymentMethod};

typed_id!(
    /// Invoice identifier.
    InvoiceId(AggregateId)
);

/// Invoice status lifecycle.
///
/// `Overdue` is never stored; it is derived on read from `due_date` and the
/// balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Status implied by the amount paid against a sent invoice.
    fn from_balance(amount_paid: Money, total: Money) -> Self {
        if amount_paid >= total {
            InvoiceStatus::Paid
        } else if amount_paid.is_positive() {
            InvoiceStatus::Partial
        } else {
            InvoiceStatus::Sent
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        })
    }
}

/// Aggregate root: Invoice.
///
/// Owns its items and payments. `amount_paid` is the sum of all payments,
/// reversals included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    invoice_number: String,
    client_id: Option<ClientId>,
    quote_id: Option<QuoteId>,
    status: InvoiceStatus,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    items: Vec<InvoiceItem>,
    totals: DocumentTotals,
    amount_paid: Money,
    payments: Vec<Payment>,
    notes: Option<String>,
    version: u64,
    created: bool,
}

impl Invoice {
    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn quote_id(&self) -> Option<QuoteId> {
        self.quote_id
    }

    /// Stored status, without lazy overdue.
    pub fn stored_status(&self) -> InvoiceStatus {
        self.status
    }

    /// Status as of `today`: sent or partially paid invoices past `due_date`
    /// with an outstanding balance read as `Overdue`.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        let open = matches!(self.status, InvoiceStatus::Sent | InvoiceStatus::Partial);
        if open && today > self.due_date && self.balance_due().is_positive() {
            InvoiceStatus::Overdue
        } else {
            self.status
        }
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn amount_paid(&self) -> Money {
        self.amount_paid
    }

    /// `total − amount_paid`; negative after an overpayment.
    pub fn balance_due(&self) -> Money {
        self.totals.total - self.amount_paid
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn payment(&self, payment_id: PaymentId) -> Option<&Payment> {
        find_by_id(&self.payments, &payment_id)
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    fn is_reversed(&self, payment_id: PaymentId) -> bool {
        self.payments.iter().any(|p| p.reverses == Some(payment_id))
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub client_id: ClientId,
    pub quote_id: Option<QuoteId>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<NewInvoiceItem>,
    pub tax_rate: Decimal,
    pub discount: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItems (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItems {
    pub invoice_id: InvoiceId,
    /// Quote the items were converted from, if any.
    pub quote_id: Option<QuoteId>,
    pub items: Vec<NewInvoiceItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub invoice_id: InvoiceId,
    pub item_id: InvoiceItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvoice {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_on: NaiveDate,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReversePayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversePayment {
    pub invoice_id: InvoiceId,
    /// Identifier of the new, negative payment.
    pub payment_id: PaymentId,
    pub reverses: PaymentId,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    AddItems(AddItems),
    RemoveItem(RemoveItem),
    SendInvoice(SendInvoice),
    RecordPayment(RecordPayment),
    ReversePayment(ReversePayment),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub client_id: ClientId,
    pub quote_id: Option<QuoteId>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceItem>,
    pub totals: DocumentTotals,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsAdded {
    pub invoice_id: InvoiceId,
    pub quote_id: Option<QuoteId>,
    pub items: Vec<InvoiceItem>,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub invoice_id: InvoiceId,
    pub item_id: InvoiceItemId,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSent {
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub amount_paid: Money,
    pub status: InvoiceStatus,
}

/// Event: PaymentReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReversed {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub amount_paid: Money,
    pub status: InvoiceStatus,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub invoice_id: InvoiceId,
    pub previous_status: InvoiceStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    ItemsAdded(ItemsAdded),
    ItemRemoved(ItemRemoved),
    InvoiceSent(InvoiceSent),
    PaymentRecorded(PaymentRecorded),
    PaymentReversed(PaymentReversed),
    InvoiceCancelled(InvoiceCancelled),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::ItemsAdded(_) => "invoicing.invoice.items_added",
            InvoiceEvent::ItemRemoved(_) => "invoicing.invoice.item_removed",
            InvoiceEvent::InvoiceSent(_) => "invoicing.invoice.sent",
            InvoiceEvent::PaymentRecorded(_) => "invoicing.invoice.payment_recorded",
            InvoiceEvent::PaymentReversed(_) => "invoicing.invoice.payment_reversed",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::ItemsAdded(e) => e.occurred_at,
            InvoiceEvent::ItemRemoved(e) => e.occurred_at,
            InvoiceEvent::InvoiceSent(e) => e.occurred_at,
            InvoiceEvent::PaymentRecorded(e) => e.payment.recorded_at,
            InvoiceEvent::PaymentReversed(e) => e.payment.recorded_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    const AGGREGATE_TYPE: &'static str = "invoicing.invoice";

    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            invoice_number: String::new(),
            client_id: None,
            quote_id: None,
            status: InvoiceStatus::Draft,
            issue_date: NaiveDate::MIN,
            due_date: NaiveDate::MIN,
            items: Vec::new(),
            totals: DocumentTotals::default(),
            amount_paid: Money::ZERO,
            payments: Vec::new(),
            notes: None,
            version: 0,
            created: false,
        }
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.invoice_number = e.invoice_number.clone();
                self.client_id = Some(e.client_id);
                self.quote_id = e.quote_id;
                self.status = InvoiceStatus::Draft;
                self.issue_date = e.issue_date;
                self.due_date = e.due_date;
                self.items = e.items.clone();
                self.totals = e.totals;
                self.notes = e.notes.clone();
                self.created = true;
            }
            InvoiceEvent::ItemsAdded(e) => {
                self.items.extend(e.items.iter().cloned());
                if self.quote_id.is_none() {
                    self.quote_id = e.quote_id;
                }
                self.totals = e.totals;
            }
            InvoiceEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
                self.totals = e.totals;
            }
            InvoiceEvent::InvoiceSent(_) => {
                self.status = InvoiceStatus::Sent;
            }
            InvoiceEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.amount_paid = e.amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::PaymentReversed(e) => {
                self.payments.push(e.payment.clone());
                self.amount_paid = e.amount_paid;
                self.status = e.status;
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::AddItems(cmd) => self.handle_add_items(cmd),
            InvoiceCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            InvoiceCommand::SendInvoice(cmd) => self.handle_send(cmd),
            InvoiceCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            InvoiceCommand::ReversePayment(cmd) => self.handle_reverse_payment(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn build_items(
    existing: &[InvoiceItem],
    new_items: &[NewInvoiceItem],
) -> DomainResult<Vec<InvoiceItem>> {
    let mut next_sort = existing.iter().map(|i| i.sort_order).max().unwrap_or(0);
    let mut built: Vec<InvoiceItem> = Vec::with_capacity(new_items.len());
    for new in new_items {
        let duplicate = existing.iter().chain(built.iter()).any(|i| i.id == new.item_id);
        if duplicate {
            return Err(DomainError::conflict(format!(
                "invoice item {} already exists",
                new.item_id
            )));
        }
        next_sort += 1;
        built.push(InvoiceItem::from_new(new, next_sort)?);
    }
    Ok(built)
}

fn recompute(
    items: &[InvoiceItem],
    tax_rate: Decimal,
    discount: Money,
) -> DomainResult<DocumentTotals> {
    DocumentTotals::recompute(items.iter().map(|i| i.line_total), tax_rate, discount)
}

impl Invoice {
    fn ensure_exists(&self, invoice_id: InvoiceId) -> DomainResult<()> {
        if !self.created || self.id != invoice_id {
            return Err(DomainError::not_found("invoice", invoice_id));
        }
        Ok(())
    }

    /// Items are frozen once the invoice leaves DRAFT.
    fn ensure_draft(&self) -> DomainResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_transition(self.status, "EDIT"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "invoice {} already exists",
                cmd.invoice_id
            )));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }
        if cmd.due_date < cmd.issue_date {
            return Err(DomainError::validation("due date cannot precede the issue date"));
        }

        let items = build_items(&[], &cmd.items)?;
        let totals = recompute(&items, cmd.tax_rate, cmd.discount)?;

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.clone(),
            client_id: cmd.client_id,
            quote_id: cmd.quote_id,
            issue_date: cmd.issue_date,
            due_date: cmd.due_date,
            items,
            totals,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_items(&self, cmd: &AddItems) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        self.ensure_draft()?;
        if cmd.items.is_empty() {
            return Err(DomainError::validation("no items to add"));
        }
        if let (Some(own), Some(incoming)) = (self.quote_id, cmd.quote_id) {
            if own != incoming {
                return Err(DomainError::validation(format!(
                    "invoice {} already originates from quote {own}",
                    self.id
                )));
            }
        }

        let added = build_items(&self.items, &cmd.items)?;
        let mut all = self.items.clone();
        all.extend(added.iter().cloned());
        let totals = recompute(&all, self.totals.tax_rate, self.totals.discount)?;

        Ok(vec![InvoiceEvent::ItemsAdded(ItemsAdded {
            invoice_id: cmd.invoice_id,
            quote_id: cmd.quote_id,
            items: added,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        self.ensure_draft()?;
        let item = find_by_id(&self.items, &cmd.item_id)
            .ok_or_else(|| DomainError::not_found("invoice item", cmd.item_id))?;
        // Converted quantities are tracked on the quote; dropping the line
        // here would desynchronize them.
        if item.quote_item_id.is_some() {
            return Err(DomainError::validation(
                "items converted from a quote cannot be removed",
            ));
        }

        let remaining: Vec<InvoiceItem> = self
            .items
            .iter()
            .filter(|i| i.id != cmd.item_id)
            .cloned()
            .collect();
        let totals = recompute(&remaining, self.totals.tax_rate, self.totals.discount)?;

        Ok(vec![InvoiceEvent::ItemRemoved(ItemRemoved {
            invoice_id: cmd.invoice_id,
            item_id: cmd.item_id,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_transition(self.status, InvoiceStatus::Sent));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot send an invoice without items"));
        }

        Ok(vec![InvoiceEvent::InvoiceSent(InvoiceSent {
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        if !cmd.amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "payment amount must be positive, got {}",
                cmd.amount
            )));
        }
        match self.status {
            InvoiceStatus::Cancelled => {
                return Err(DomainError::invalid_amount(format!(
                    "invoice {} is cancelled",
                    self.invoice_number
                )));
            }
            InvoiceStatus::Draft | InvoiceStatus::Paid => {
                return Err(DomainError::invalid_transition(self.status, "PAYMENT"));
            }
            _ => {}
        }
        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict(format!(
                "payment {} already recorded",
                cmd.payment_id
            )));
        }

        let amount_paid = self
            .amount_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::invalid_amount("amount paid overflow"))?;
        let status = InvoiceStatus::from_balance(amount_paid, self.totals.total);

        Ok(vec![InvoiceEvent::PaymentRecorded(PaymentRecorded {
            invoice_id: cmd.invoice_id,
            payment: Payment {
                id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                paid_on: cmd.paid_on,
                reference: cmd.reference.clone(),
                reverses: None,
                recorded_at: cmd.occurred_at,
            },
            amount_paid,
            status,
        })])
    }

    fn handle_reverse_payment(&self, cmd: &ReversePayment) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        if self.status == InvoiceStatus::Cancelled {
            return Err(DomainError::invalid_amount(format!(
                "invoice {} is cancelled",
                self.invoice_number
            )));
        }
        let original = self
            .payment(cmd.reverses)
            .ok_or_else(|| DomainError::not_found("payment", cmd.reverses))?;
        if original.is_reversal() {
            return Err(DomainError::validation(format!(
                "payment {} is itself a reversal",
                original.id
            )));
        }
        if self.is_reversed(original.id) {
            return Err(DomainError::conflict(format!(
                "payment {} was already reversed",
                original.id
            )));
        }
        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict(format!(
                "payment {} already recorded",
                cmd.payment_id
            )));
        }

        let amount = -original.amount;
        let amount_paid = self
            .amount_paid
            .checked_add(amount)
            .ok_or_else(|| DomainError::invalid_amount("amount paid overflow"))?;
        let status = InvoiceStatus::from_balance(amount_paid, self.totals.total);

        Ok(vec![InvoiceEvent::PaymentReversed(PaymentReversed {
            invoice_id: cmd.invoice_id,
            payment: Payment {
                id: cmd.payment_id,
                amount,
                method: original.method,
                paid_on: cmd.occurred_at.date_naive(),
                reference: cmd.reference.clone(),
                reverses: Some(original.id),
                recorded_at: cmd.occurred_at,
            },
            amount_paid,
            status,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> DomainResult<Vec<InvoiceEvent>> {
        self.ensure_exists(cmd.invoice_id)?;
        let cancellable = matches!(self.status, InvoiceStatus::Draft | InvoiceStatus::Sent)
            && self.amount_paid.is_zero();
        if !cancellable {
            return Err(DomainError::invalid_transition(
                self.status,
                InvoiceStatus::Cancelled,
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            invoice_id: cmd.invoice_id,
            previous_status: self.status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use medledger_inventory::ProductId;
    use medledger_quotes::{ItemSnapshot, QuoteItemId};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()
    }

    fn test_item(quantity: i64, price: Decimal) -> NewInvoiceItem {
        NewInvoiceItem {
            item_id: InvoiceItemId::generate(),
            snapshot: ItemSnapshot {
                product_id: ProductId::generate(),
                product_name: "Pulse Oximeter".into(),
                unit: "unit".into(),
                unit_price: Money::new(price),
            },
            quantity,
            quote_item_id: None,
        }
    }

    fn test_invoice(items: Vec<NewInvoiceItem>) -> Invoice {
        let id = InvoiceId::generate();
        let mut invoice = Invoice::empty(id);
        let issue = test_time().date_naive();
        invoice
            .execute(&InvoiceCommand::CreateInvoice(CreateInvoice {
                invoice_id: id,
                invoice_number: "INV-2025-0001".into(),
                client_id: ClientId::generate(),
                quote_id: None,
                issue_date: issue,
                due_date: issue + Duration::days(30),
                items,
                tax_rate: Decimal::ZERO,
                discount: Money::ZERO,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice
    }

    fn test_sent(items: Vec<NewInvoiceItem>) -> Invoice {
        let mut invoice = test_invoice(items);
        let invoice_id = *invoice.id();
        invoice
            .execute(&InvoiceCommand::SendInvoice(SendInvoice {
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        invoice
    }

    fn test_pay(invoice: &Invoice, amount: Decimal) -> InvoiceCommand {
        InvoiceCommand::RecordPayment(RecordPayment {
            invoice_id: *invoice.id(),
            payment_id: PaymentId::generate(),
            amount: Money::new(amount),
            method: PaymentMethod::BankTransfer,
            paid_on: test_time().date_naive(),
            reference: Some("TRF-001".into()),
            occurred_at: test_time(),
        })
    }

    fn test_reverse(invoice: &Invoice, reverses: PaymentId) -> InvoiceCommand {
        InvoiceCommand::ReversePayment(ReversePayment {
            invoice_id: *invoice.id(),
            payment_id: PaymentId::generate(),
            reverses,
            reference: Some("bounced".into()),
            occurred_at: test_time(),
        })
    }

    fn test_cancel(invoice: &Invoice) -> InvoiceCommand {
        InvoiceCommand::CancelInvoice(CancelInvoice {
            invoice_id: *invoice.id(),
            reason: None,
            occurred_at: test_time(),
        })
    }

    /// 5 × 95.00 + 10 × 41.00 = 885.00
    fn test_885() -> Vec<NewInvoiceItem> {
        vec![test_item(5, dec!(95.00)), test_item(10, dec!(41.00))]
    }

    #[test]
    fn payments_drive_partial_then_paid() {
        let mut invoice = test_sent(test_885());
        assert_eq!(invoice.total(), Money::new(dec!(885.00)));

        invoice.execute(&test_pay(&invoice, dec!(500.00))).unwrap();
        assert_eq!(invoice.balance_due(), Money::new(dec!(385.00)));
        assert_eq!(invoice.stored_status(), InvoiceStatus::Partial);

        invoice.execute(&test_pay(&invoice, dec!(385.00))).unwrap();
        assert!(invoice.balance_due().is_zero());
        assert_eq!(invoice.stored_status(), InvoiceStatus::Paid);
    }

    #[test]
    fn non_positive_payment_is_invalid_amount() {
        let invoice = test_sent(test_885());
        for amount in [dec!(0), dec!(-10)] {
            let err = invoice.handle(&test_pay(&invoice, amount)).unwrap_err();
            assert!(matches!(err, DomainError::InvalidAmount(_)));
        }
    }

    #[test]
    fn cancelled_invoice_rejects_payment() {
        let mut invoice = test_sent(test_885());
        invoice.execute(&test_cancel(&invoice)).unwrap();
        let err = invoice.handle(&test_pay(&invoice, dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn draft_invoice_rejects_payment() {
        let invoice = test_invoice(test_885());
        let err = invoice.handle(&test_pay(&invoice, dec!(1))).unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("DRAFT", "PAYMENT"));
    }

    #[test]
    fn overpayment_leaves_negative_balance() {
        let mut invoice = test_sent(test_885());
        invoice.execute(&test_pay(&invoice, dec!(900.00))).unwrap();
        assert_eq!(invoice.balance_due(), Money::new(dec!(-15.00)));
        assert_eq!(invoice.stored_status(), InvoiceStatus::Paid);
    }

    #[test]
    fn reversal_restores_balance_once() {
        let mut invoice = test_sent(test_885());
        invoice.execute(&test_pay(&invoice, dec!(885.00))).unwrap();
        let original = invoice.payments()[0].id;

        invoice.execute(&test_reverse(&invoice, original)).unwrap();
        assert_eq!(invoice.amount_paid(), Money::ZERO);
        assert_eq!(invoice.stored_status(), InvoiceStatus::Sent);
        assert_eq!(invoice.payments().len(), 2);
        assert_eq!(invoice.payments()[1].amount, Money::new(dec!(-885.00)));

        let again = invoice.handle(&test_reverse(&invoice, original)).unwrap_err();
        assert!(matches!(again, DomainError::Conflict(_)));

        let reversal = invoice.payments()[1].id;
        let of_reversal = invoice.handle(&test_reverse(&invoice, reversal)).unwrap_err();
        assert!(matches!(of_reversal, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_only_without_payments() {
        let mut invoice = test_sent(test_885());
        invoice.execute(&test_pay(&invoice, dec!(10))).unwrap();
        assert!(matches!(
            invoice.handle(&test_cancel(&invoice)),
            Err(DomainError::InvalidTransition { .. })
        ));

        let draft = test_invoice(test_885());
        let events = draft.handle(&test_cancel(&draft)).unwrap();
        assert!(matches!(
            &events[0],
            InvoiceEvent::InvoiceCancelled(e) if e.previous_status == InvoiceStatus::Draft
        ));
    }

    #[test]
    fn overdue_is_derived_on_read() {
        let mut invoice = test_sent(test_885());
        let late = invoice.due_date() + Duration::days(1);
        assert_eq!(invoice.effective_status(invoice.due_date()), InvoiceStatus::Sent);
        assert_eq!(invoice.effective_status(late), InvoiceStatus::Overdue);

        invoice.execute(&test_pay(&invoice, dec!(885.00))).unwrap();
        assert_eq!(invoice.effective_status(late), InvoiceStatus::Paid);
    }

    #[test]
    fn items_frozen_after_send() {
        let invoice = test_sent(test_885());
        let err = invoice
            .handle(&InvoiceCommand::AddItems(AddItems {
                invoice_id: *invoice.id(),
                quote_id: None,
                items: vec![test_item(1, dec!(1.00))],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn converted_items_cannot_be_removed() {
        let mut converted = test_item(10, dec!(45.00));
        converted.quote_item_id = Some(QuoteItemId::generate());
        let invoice = test_invoice(vec![converted.clone(), test_item(1, dec!(5.00))]);

        let err = invoice
            .handle(&InvoiceCommand::RemoveItem(RemoveItem {
                invoice_id: *invoice.id(),
                item_id: converted.item_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn draft_items_recompute_totals() {
        let mut invoice = test_invoice(vec![test_item(10, dec!(45.00))]);
        let invoice_id = *invoice.id();
        let extra = test_item(2, dec!(12.50));
        let extra_id = extra.item_id;

        invoice
            .execute(&InvoiceCommand::AddItems(AddItems {
                invoice_id,
                quote_id: None,
                items: vec![extra],
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(invoice.total(), Money::new(dec!(475.00)));
        assert_eq!(invoice.items()[1].sort_order, 2);

        invoice
            .execute(&InvoiceCommand::RemoveItem(RemoveItem {
                invoice_id,
                item_id: extra_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(invoice.total(), Money::new(dec!(450.00)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: balance_due == total − amount_paid after every payment, and
        /// amount_paid equals the sum of recorded payments.
        #[test]
        fn balance_due_tracks_payments(
            payments in prop::collection::vec(1i64..50_000, 1..15),
        ) {
            let mut invoice = test_sent(test_885());

            for minor in payments {
                if invoice.stored_status() == InvoiceStatus::Paid {
                    break;
                }
                let cmd = test_pay(&invoice, Money::from_minor(minor).amount());
                invoice.execute(&cmd).unwrap();

                let sum: Money = invoice.payments().iter().map(|p| p.amount).sum();
                prop_assert_eq!(invoice.amount_paid(), sum);
                prop_assert_eq!(invoice.balance_due(), invoice.total() - invoice.amount_paid());
                let expected = if invoice.amount_paid() >= invoice.total() {
                    InvoiceStatus::Paid
                } else {
                    InvoiceStatus::Partial
                };
                prop_assert_eq!(invoice.stored_status(), expected);
            }
        }
    }
}
