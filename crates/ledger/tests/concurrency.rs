use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use medledger_core::{AggregateRoot, DomainError, Money};
use medledger_infra::config::LedgerConfig;
use medledger_inventory::{MovementType, ProductDetails, ProductId};
use medledger_invoicing::{InvoiceStatus, PaymentMethod};
use medledger_ledger::{
    InMemoryLedger, InvoiceFilter, LineRequest, MovementRequest, NewClient, NewInvoice,
    NewPayment, NewProduct, NewQuote,
};
use medledger_parties::{ClientId, ClientType, ContactInfo};
use medledger_quotes::ConversionLine;

fn test_ledger() -> Arc<InMemoryLedger> {
    Arc::new(InMemoryLedger::in_memory(LedgerConfig::default()))
}

fn register_client(ledger: &InMemoryLedger) -> ClientId {
    *ledger
        .register_client(NewClient {
            name: "Mulago Hospital".into(),
            client_type: ClientType::Hospital,
            payment_terms: Some(30),
            credit_limit: None,
            contact: ContactInfo::default(),
        })
        .unwrap()
        .id()
}

fn register_product(ledger: &InMemoryLedger, sku: &str, price: Decimal, stock: i64) -> ProductId {
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

/// Run `work(i)` on `n` threads released together.
fn race<T, F>(n: usize, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let work = Arc::new(work);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let barrier = barrier.clone();
            let work = work.clone();
            thread::spawn(move || {
                barrier.wait();
                work(i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn concurrent_payments_are_all_counted() {
    const PAYMENTS: usize = 16;
    let ledger = test_ledger();
    let client = register_client(&ledger);
    let monitors = register_product(&ledger, "MED-MON-001", dec!(1000), 10);
    let invoice = ledger
        .create_invoice(NewInvoice::new(client, vec![LineRequest::new(monitors, 1)]))
        .unwrap();
    let id = *invoice.id();
    ledger.send_invoice(id).unwrap();

    let shared = ledger.clone();
    let results = race(PAYMENTS, move |_| {
        shared.apply_payment(
            id,
            NewPayment::new(Money::new(dec!(12.50)), PaymentMethod::MobileMoney),
        )
    });
    assert!(results.iter().all(Result::is_ok));

    let invoice = ledger.invoice(id).unwrap();
    assert_eq!(invoice.payments().len(), PAYMENTS);
    assert_eq!(invoice.amount_paid(), Money::new(dec!(200.00)));
    assert_eq!(invoice.balance_due(), Money::new(dec!(800.00)));
    assert_eq!(invoice.stored_status(), InvoiceStatus::Partial);
}

#[test]
fn competing_sends_never_oversell() {
    let ledger = test_ledger();
    let client = register_client(&ledger);
    let gloves = register_product(&ledger, "MED-GLV-002", dec!(95), 10);
    let invoices: Vec<_> = (0..4)
        .map(|_| {
            *ledger
                .create_invoice(NewInvoice::new(client, vec![LineRequest::new(gloves, 6)]))
                .unwrap()
                .id()
        })
        .collect();

    let shared = ledger.clone();
    let targets = invoices.clone();
    let results = race(targets.len(), move |i| shared.send_invoice(targets[i]));

    let sent = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(sent, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err.domain(), Some(DomainError::InsufficientStock { .. })));
    }
    assert_eq!(ledger.current_stock(gloves).unwrap(), 4);
    assert_eq!(
        ledger
            .invoices(&InvoiceFilter {
                status: Some(InvoiceStatus::Draft),
                ..InvoiceFilter::default()
            })
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn competing_conversions_respect_the_remainder() {
    let ledger = test_ledger();
    let client = register_client(&ledger);
    let syringes = register_product(&ledger, "MED-SYR-005", dec!(45), 500);
    let quote = ledger
        .create_quote(NewQuote::new(client, vec![LineRequest::new(syringes, 20)]))
        .unwrap();
    let quote_id = *quote.id();
    let item_id = quote.items()[0].id;
    ledger.send_quote(quote_id).unwrap();
    ledger.approve_quote(quote_id).unwrap();

    let shared = ledger.clone();
    let results = race(5, move |_| {
        shared.convert_to_invoice(
            quote_id,
            vec![ConversionLine {
                item_id,
                quantity: 6,
            }],
            None,
        )
    });

    let converted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(converted, 3);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err.domain(), Some(DomainError::OverConversion { .. })));
    }

    let quote = ledger.quote(quote_id).unwrap();
    assert_eq!(quote.item(item_id).map(|i| i.quantity_converted), Some(18));
    let invoices = ledger
        .invoices(&InvoiceFilter {
            quote_id: Some(quote_id),
            ..InvoiceFilter::default()
        })
        .unwrap();
    assert_eq!(invoices.len(), 3);
    let invoiced: i64 = invoices.iter().flat_map(|i| i.items()).map(|i| i.quantity).sum();
    assert_eq!(invoiced, 18);
}

#[test]
fn document_numbers_are_never_reused() {
    let ledger = test_ledger();
    let client = register_client(&ledger);
    let masks = register_product(&ledger, "MED-MSK-004", dec!(40), 0);

    let shared = ledger.clone();
    let numbers = race(12, move |_| {
        shared
            .create_quote(NewQuote::new(client, vec![LineRequest::new(masks, 1)]))
            .map(|q| q.quote_number().to_string())
    });

    let unique: HashSet<_> = numbers.into_iter().map(Result::unwrap).collect();
    assert_eq!(unique.len(), 12);
}

#[test]
fn movements_on_one_product_serialize() {
    let ledger = test_ledger();
    let gloves = register_product(&ledger, "MED-GLV-002", dec!(95), 100);

    let shared = ledger.clone();
    let results = race(20, move |i| {
        let (movement_type, quantity) = if i % 2 == 0 {
            (MovementType::Invoice, -3)
        } else {
            (MovementType::Return, 1)
        };
        shared.record_movement(MovementRequest::new(gloves, movement_type, quantity, "race"))
    });
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(ledger.current_stock(gloves).unwrap(), 100 - 30 + 10);
    let product = ledger.product(gloves).unwrap();
    assert_eq!(product.movements().len(), 21);
    assert!(
        product
            .movements()
            .windows(2)
            .all(|w| w[0].new_stock == w[1].previous_stock)
    );
}
