use std::collections::BTreeMap;

use crate::model::Event;

use super::{Engine, EngineError};

/// Per-financial-year invoice counters.
#[derive(Debug, Default, Clone)]
pub struct InvoiceLedger {
    years: BTreeMap<i32, u64>,
    /// Year and sequence of the most recent mint.
    current: Option<(i32, u64)>,
}

impl InvoiceLedger {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::FinancialYearOpened { year, sequence } => {
                self.years.insert(*year, *sequence);
            }
            Event::InvoiceSequenceAdvanced { year, sequence } => {
                self.years.insert(*year, *sequence);
                self.current = Some((*year, *sequence));
            }
            _ => {}
        }
    }

    pub fn sequence(&self, year: i32) -> Option<u64> {
        self.years.get(&year).copied()
    }

    /// Last sequence handed out, in whichever year it was minted.
    pub fn current_sequence(&self) -> u64 {
        self.current.map_or(0, |(_, seq)| seq)
    }

    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .years
            .iter()
            .map(|(&year, &sequence)| Event::FinancialYearOpened { year, sequence })
            .collect();
        if let Some((year, sequence)) = self.current {
            events.push(Event::InvoiceSequenceAdvanced { year, sequence });
        }
        events
    }
}

impl Engine {
    /// Start a financial year's counter. The first number minted in it is
    /// `starting_sequence + 1`.
    pub async fn open_financial_year(&self, year: i32, starting_sequence: u64) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let mut ledger = self.ledger.lock().await;
        if ledger.sequence(year).is_some() {
            return Err(EngineError::AlreadyExists(format!("financial year {year}")));
        }
        let event = Event::FinancialYearOpened {
            year,
            sequence: starting_sequence,
        };
        self.wal_append(&event).await?;
        ledger.apply(&event);
        tracing::info!("financial year {year} opened at sequence {starting_sequence}");
        Ok(())
    }

    /// Mint the next invoice number for the active financial year.
    pub async fn next_invoice_number(&self) -> Result<String, EngineError> {
        let _gate = self.gate.read().await;
        self.mint_invoice_number().await
    }

    /// Numbers are strictly increasing and gap-free per year: the read, the
    /// WAL append and the counter bump all happen under the ledger lock.
    pub(super) async fn mint_invoice_number(&self) -> Result<String, EngineError> {
        let format = self.settings.read().await.invoice_format.clone();
        if format.prefix.trim().is_empty() {
            return Err(EngineError::SequenceAllocation("invoice prefix is not configured".into()));
        }
        let year = format
            .active_year
            .ok_or_else(|| EngineError::SequenceAllocation("no active financial year".into()))?;

        let mut ledger = self.ledger.lock().await;
        let current = ledger.sequence(year).ok_or_else(|| {
            EngineError::SequenceAllocation(format!("financial year {year} has no sequence record"))
        })?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| EngineError::SequenceAllocation(format!("sequence for {year} exhausted")))?;

        let event = Event::InvoiceSequenceAdvanced { year, sequence: next };
        self.wal_append(&event).await?;
        ledger.apply(&event);
        drop(ledger);

        metrics::counter!(crate::observability::INVOICES_MINTED_TOTAL).increment(1);
        Ok(format.render(year, next))
    }

    pub async fn invoice_sequence(&self, year: i32) -> Option<u64> {
        self.ledger.lock().await.sequence(year)
    }

    pub async fn current_invoice_sequence(&self) -> u64 {
        self.ledger.lock().await.current_sequence()
    }
}
