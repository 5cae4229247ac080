use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medledger_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentTotals, DomainError, DomainResult, Money,
    typed_id,
};
use medledger_events::Event;
use medledger_parties::ClientId;

use crate::item::{ItemSnapshot, QuoteItem, QuoteItemId};

typed_id!(
    /// Quote identifier.
    QuoteId(AggregateId)
);

/// Quote status lifecycle.
///
/// `Expired` is never stored; it is derived on read from `valid_until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Approved,
    Partial,
    Converted,
    Expired,
    Rejected,
}

impl QuoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Converted | QuoteStatus::Rejected)
    }

    /// States that lapse into `Expired` once `valid_until` has passed.
    fn can_expire(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Draft | QuoteStatus::Sent | QuoteStatus::Approved | QuoteStatus::Partial
        )
    }
}

impl core::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            QuoteStatus::Draft => "DRAFT",
            QuoteStatus::Sent => "SENT",
            QuoteStatus::Approved => "APPROVED",
            QuoteStatus::Partial => "PARTIAL",
            QuoteStatus::Converted => "CONVERTED",
            QuoteStatus::Expired => "EXPIRED",
            QuoteStatus::Rejected => "REJECTED",
        })
    }
}

/// Requested conversion of one quote item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionLine {
    pub item_id: QuoteItemId,
    pub quantity: i64,
}

/// Line to price onto a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuoteItem {
    pub item_id: QuoteItemId,
    pub snapshot: ItemSnapshot,
    pub quantity: i64,
}

/// Aggregate root: Quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    id: QuoteId,
    quote_number: String,
    client_id: Option<ClientId>,
    status: QuoteStatus,
    issue_date: NaiveDate,
    valid_until: NaiveDate,
    items: Vec<QuoteItem>,
    totals: DocumentTotals,
    notes: Option<String>,
    terms: Option<String>,
    /// Invoices that received converted quantities, in conversion order.
    invoice_ids: Vec<AggregateId>,
    version: u64,
    created: bool,
}

impl Quote {
    pub fn quote_number(&self) -> &str {
        &self.quote_number
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Stored status, without lazy expiry.
    pub fn stored_status(&self) -> QuoteStatus {
        self.status
    }

    /// Status as of `today`: pre-conversion quotes past `valid_until` read as
    /// `Expired`.
    pub fn effective_status(&self, today: NaiveDate) -> QuoteStatus {
        if self.status.can_expire() && today > self.valid_until {
            QuoteStatus::Expired
        } else {
            self.status
        }
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn valid_until(&self) -> NaiveDate {
        self.valid_until
    }

    pub fn items(&self) -> &[QuoteItem] {
        &self.items
    }

    pub fn item(&self, item_id: QuoteItemId) -> Option<&QuoteItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn terms(&self) -> Option<&str> {
        self.terms.as_deref()
    }

    pub fn invoice_ids(&self) -> &[AggregateId] {
        &self.invoice_ids
    }
}

impl AggregateRoot for Quote {
    type Id = QuoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQuote {
    pub quote_id: QuoteId,
    pub quote_number: String,
    pub client_id: ClientId,
    pub issue_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub items: Vec<NewQuoteItem>,
    pub tax_rate: Decimal,
    pub discount: Money,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub quote_id: QuoteId,
    pub item: NewQuoteItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeItemQuantity (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItemQuantity {
    pub quote_id: QuoteId,
    pub item_id: QuoteItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub quote_id: QuoteId,
    pub item_id: QuoteItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPricing (DRAFT only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPricing {
    pub quote_id: QuoteId,
    pub tax_rate: Decimal,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveQuote {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectQuote {
    pub quote_id: QuoteId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordConversion.
///
/// Selections naming the same item accumulate. All-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConversion {
    pub quote_id: QuoteId,
    /// Invoice receiving the converted quantities.
    pub invoice_id: AggregateId,
    pub lines: Vec<ConversionLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteCommand {
    CreateQuote(CreateQuote),
    AddItem(AddItem),
    ChangeItemQuantity(ChangeItemQuantity),
    RemoveItem(RemoveItem),
    SetPricing(SetPricing),
    SendQuote(SendQuote),
    ApproveQuote(ApproveQuote),
    RejectQuote(RejectQuote),
    RecordConversion(RecordConversion),
}

/// Event: QuoteCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCreated {
    pub quote_id: QuoteId,
    pub quote_number: String,
    pub client_id: ClientId,
    pub issue_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub items: Vec<QuoteItem>,
    pub totals: DocumentTotals,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub quote_id: QuoteId,
    pub item: QuoteItem,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantityChanged {
    pub quote_id: QuoteId,
    pub item_id: QuoteItemId,
    pub quantity: i64,
    pub line_total: Money,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub quote_id: QuoteId,
    pub item_id: QuoteItemId,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PricingChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingChanged {
    pub quote_id: QuoteId,
    pub totals: DocumentTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSent {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteApproved {
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRejected {
    pub quote_id: QuoteId,
    /// Effective status at the time of rejection.
    pub previous_status: QuoteStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteConverted.
///
/// `lines` holds one entry per item (duplicates already merged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteConverted {
    pub quote_id: QuoteId,
    pub invoice_id: AggregateId,
    pub lines: Vec<ConversionLine>,
    pub status: QuoteStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteEvent {
    QuoteCreated(QuoteCreated),
    ItemAdded(ItemAdded),
    ItemQuantityChanged(ItemQuantityChanged),
    ItemRemoved(ItemRemoved),
    PricingChanged(PricingChanged),
    QuoteSent(QuoteSent),
    QuoteApproved(QuoteApproved),
    QuoteRejected(QuoteRejected),
    QuoteConverted(QuoteConverted),
}

impl Event for QuoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QuoteEvent::QuoteCreated(_) => "quotes.quote.created",
            QuoteEvent::ItemAdded(_) => "quotes.quote.item_added",
            QuoteEvent::ItemQuantityChanged(_) => "quotes.quote.item_quantity_changed",
            QuoteEvent::ItemRemoved(_) => "quotes.quote.item_removed",
            QuoteEvent::PricingChanged(_) => "quotes.quote.pricing_changed",
            QuoteEvent::QuoteSent(_) => "quotes.quote.sent",
            QuoteEvent::QuoteApproved(_) => "quotes.quote.approved",
            QuoteEvent::QuoteRejected(_) => "quotes.quote.rejected",
            QuoteEvent::QuoteConverted(_) => "quotes.quote.converted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QuoteEvent::QuoteCreated(e) => e.occurred_at,
            QuoteEvent::ItemAdded(e) => e.occurred_at,
            QuoteEvent::ItemQuantityChanged(e) => e.occurred_at,
            QuoteEvent::ItemRemoved(e) => e.occurred_at,
            QuoteEvent::PricingChanged(e) => e.occurred_at,
            QuoteEvent::QuoteSent(e) => e.occurred_at,
            QuoteEvent::QuoteApproved(e) => e.occurred_at,
            QuoteEvent::QuoteRejected(e) => e.occurred_at,
            QuoteEvent::QuoteConverted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Quote {
    const AGGREGATE_TYPE: &'static str = "quotes.quote";

    type Command = QuoteCommand;
    type Event = QuoteEvent;
    type Error = DomainError;

    fn empty(id: QuoteId) -> Self {
        Self {
            id,
            quote_number: String::new(),
            client_id: None,
            status: QuoteStatus::Draft,
            issue_date: NaiveDate::MIN,
            valid_until: NaiveDate::MIN,
            items: Vec::new(),
            totals: DocumentTotals::default(),
            notes: None,
            terms: None,
            invoice_ids: Vec::new(),
            version: 0,
            created: false,
        }
    }

    fn exists(&self) -> bool {
        self.created
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            QuoteEvent::QuoteCreated(e) => {
                self.id = e.quote_id;
                self.quote_number = e.quote_number.clone();
                self.client_id = Some(e.client_id);
                self.status = QuoteStatus::Draft;
                self.issue_date = e.issue_date;
                self.valid_until = e.valid_until;
                self.items = e.items.clone();
                self.totals = e.totals;
                self.notes = e.notes.clone();
                self.terms = e.terms.clone();
                self.created = true;
            }
            QuoteEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.totals = e.totals;
            }
            QuoteEvent::ItemQuantityChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.quantity = e.quantity;
                    item.line_total = e.line_total;
                }
                self.totals = e.totals;
            }
            QuoteEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
                self.totals = e.totals;
            }
            QuoteEvent::PricingChanged(e) => {
                self.totals = e.totals;
            }
            QuoteEvent::QuoteSent(_) => {
                self.status = QuoteStatus::Sent;
            }
            QuoteEvent::QuoteApproved(_) => {
                self.status = QuoteStatus::Approved;
            }
            QuoteEvent::QuoteRejected(_) => {
                self.status = QuoteStatus::Rejected;
            }
            QuoteEvent::QuoteConverted(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == line.item_id) {
                        item.quantity_converted += line.quantity;
                    }
                }
                if !self.invoice_ids.contains(&e.invoice_id) {
                    self.invoice_ids.push(e.invoice_id);
                }
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            QuoteCommand::CreateQuote(cmd) => self.handle_create(cmd),
            QuoteCommand::AddItem(cmd) => self.handle_add_item(cmd),
            QuoteCommand::ChangeItemQuantity(cmd) => self.handle_change_quantity(cmd),
            QuoteCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            QuoteCommand::SetPricing(cmd) => self.handle_set_pricing(cmd),
            QuoteCommand::SendQuote(cmd) => self.handle_send(cmd),
            QuoteCommand::ApproveQuote(cmd) => self.handle_approve(cmd),
            QuoteCommand::RejectQuote(cmd) => self.handle_reject(cmd),
            QuoteCommand::RecordConversion(cmd) => self.handle_conversion(cmd),
        }
    }
}

fn recompute(
    items: &[QuoteItem],
    tax_rate: Decimal,
    discount: Money,
) -> DomainResult<DocumentTotals> {
    DocumentTotals::recompute(items.iter().map(|i| i.line_total), tax_rate, discount)
}

impl Quote {
    fn ensure_exists(&self, quote_id: QuoteId) -> DomainResult<()> {
        if !self.created || self.id != quote_id {
            return Err(DomainError::not_found("quote", quote_id));
        }
        Ok(())
    }

    /// Items and pricing can only change while the quote is an unexpired draft.
    fn ensure_editable(&self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        let status = self.effective_status(occurred_at.date_naive());
        if status != QuoteStatus::Draft {
            return Err(DomainError::invalid_transition(status, "EDIT"));
        }
        Ok(())
    }

    fn build_item(&self, new: &NewQuoteItem, sort_order: u32) -> DomainResult<QuoteItem> {
        if self.items.iter().any(|i| i.id == new.item_id) {
            return Err(DomainError::conflict(format!(
                "quote item {} already exists",
                new.item_id
            )));
        }
        QuoteItem::new(new.item_id, new.snapshot.clone(), new.quantity, sort_order)
    }

    fn next_sort_order(&self) -> u32 {
        self.items.iter().map(|i| i.sort_order).max().unwrap_or(0) + 1
    }

    fn existing_item(&self, item_id: QuoteItemId) -> DomainResult<&QuoteItem> {
        self.item(item_id)
            .ok_or_else(|| DomainError::not_found("quote item", item_id))
    }

    fn handle_create(&self, cmd: &CreateQuote) -> DomainResult<Vec<QuoteEvent>> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "quote {} already exists",
                cmd.quote_id
            )));
        }
        if cmd.quote_number.trim().is_empty() {
            return Err(DomainError::validation("quote number cannot be empty"));
        }
        if cmd.valid_until < cmd.issue_date {
            return Err(DomainError::validation(
                "valid-until date cannot precede the issue date",
            ));
        }

        let mut items: Vec<QuoteItem> = Vec::with_capacity(cmd.items.len());
        for (position, new) in cmd.items.iter().enumerate() {
            if items.iter().any(|i| i.id == new.item_id) {
                return Err(DomainError::conflict(format!(
                    "duplicate quote item {}",
                    new.item_id
                )));
            }
            items.push(QuoteItem::new(
                new.item_id,
                new.snapshot.clone(),
                new.quantity,
                position as u32 + 1,
            )?);
        }
        let totals = recompute(&items, cmd.tax_rate, cmd.discount)?;

        Ok(vec![QuoteEvent::QuoteCreated(QuoteCreated {
            quote_id: cmd.quote_id,
            quote_number: cmd.quote_number.clone(),
            client_id: cmd.client_id,
            issue_date: cmd.issue_date,
            valid_until: cmd.valid_until,
            items,
            totals,
            notes: cmd.notes.clone(),
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        self.ensure_editable(cmd.occurred_at)?;

        let item = self.build_item(&cmd.item, self.next_sort_order())?;
        let mut items = self.items.clone();
        items.push(item.clone());
        let totals = recompute(&items, self.totals.tax_rate, self.totals.discount)?;

        Ok(vec![QuoteEvent::ItemAdded(ItemAdded {
            quote_id: cmd.quote_id,
            item,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_quantity(&self, cmd: &ChangeItemQuantity) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        self.ensure_editable(cmd.occurred_at)?;
        let existing = self.existing_item(cmd.item_id)?;

        let updated = QuoteItem::new(
            existing.id,
            existing.snapshot.clone(),
            cmd.quantity,
            existing.sort_order,
        )?;
        let items: Vec<QuoteItem> = self
            .items
            .iter()
            .map(|i| if i.id == cmd.item_id { updated.clone() } else { i.clone() })
            .collect();
        let totals = recompute(&items, self.totals.tax_rate, self.totals.discount)?;

        Ok(vec![QuoteEvent::ItemQuantityChanged(ItemQuantityChanged {
            quote_id: cmd.quote_id,
            item_id: cmd.item_id,
            quantity: updated.quantity,
            line_total: updated.line_total,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        self.ensure_editable(cmd.occurred_at)?;
        self.existing_item(cmd.item_id)?;

        let items: Vec<QuoteItem> = self
            .items
            .iter()
            .filter(|i| i.id != cmd.item_id)
            .cloned()
            .collect();
        let totals = recompute(&items, self.totals.tax_rate, self.totals.discount)?;

        Ok(vec![QuoteEvent::ItemRemoved(ItemRemoved {
            quote_id: cmd.quote_id,
            item_id: cmd.item_id,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_pricing(&self, cmd: &SetPricing) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        self.ensure_editable(cmd.occurred_at)?;
        let totals = recompute(&self.items, cmd.tax_rate, cmd.discount)?;

        Ok(vec![QuoteEvent::PricingChanged(PricingChanged {
            quote_id: cmd.quote_id,
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendQuote) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        let status = self.effective_status(cmd.occurred_at.date_naive());
        if status != QuoteStatus::Draft {
            return Err(DomainError::invalid_transition(status, QuoteStatus::Sent));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot send a quote without items"));
        }

        Ok(vec![QuoteEvent::QuoteSent(QuoteSent {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveQuote) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        let status = self.effective_status(cmd.occurred_at.date_naive());
        if status != QuoteStatus::Sent {
            return Err(DomainError::invalid_transition(status, QuoteStatus::Approved));
        }

        Ok(vec![QuoteEvent::QuoteApproved(QuoteApproved {
            quote_id: cmd.quote_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectQuote) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        let status = self.effective_status(cmd.occurred_at.date_naive());
        if status.is_terminal() {
            return Err(DomainError::invalid_transition(status, QuoteStatus::Rejected));
        }

        Ok(vec![QuoteEvent::QuoteRejected(QuoteRejected {
            quote_id: cmd.quote_id,
            previous_status: status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_conversion(&self, cmd: &RecordConversion) -> DomainResult<Vec<QuoteEvent>> {
        self.ensure_exists(cmd.quote_id)?;
        let status = self.effective_status(cmd.occurred_at.date_naive());
        if !matches!(status, QuoteStatus::Approved | QuoteStatus::Partial) {
            return Err(DomainError::invalid_transition(status, QuoteStatus::Converted));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("conversion needs at least one line"));
        }

        // Merge selections per item, keeping first-seen order.
        let mut merged: Vec<ConversionLine> = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "conversion quantity for item {} must be positive",
                    line.item_id
                )));
            }
            match merged.iter_mut().find(|m| m.item_id == line.item_id) {
                Some(m) => {
                    m.quantity = m.quantity.checked_add(line.quantity).ok_or_else(|| {
                        DomainError::validation("conversion quantity overflow")
                    })?
                }
                None => merged.push(*line),
            }
        }

        for line in &merged {
            let item = self.existing_item(line.item_id)?;
            if line.quantity > item.remaining() {
                return Err(DomainError::OverConversion {
                    item: item.id.to_string(),
                    remaining: item.remaining(),
                    requested: line.quantity,
                });
            }
        }

        let fully_converted = self.items.iter().all(|item| {
            let converting = merged
                .iter()
                .find(|m| m.item_id == item.id)
                .map_or(0, |m| m.quantity);
            item.remaining() == converting
        });
        let next_status = if fully_converted {
            QuoteStatus::Converted
        } else {
            QuoteStatus::Partial
        };

        Ok(vec![QuoteEvent::QuoteConverted(QuoteConverted {
            quote_id: cmd.quote_id,
            invoice_id: cmd.invoice_id,
            lines: merged,
            status: next_status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
