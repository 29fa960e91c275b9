use crate::domain::codec;
use crate::domain::event::PaymentEvent;
use crate::error::{LedgerError, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct EventLine<'a> {
    seq: usize,
    #[serde(flatten)]
    event: &'a PaymentEvent,
    /// Hex of the packed binary encoding.
    packed: String,
}

/// Writes events as JSON lines, one object per event.
pub struct EventLogWriter<W: Write> {
    sink: W,
}

impl<W: Write> EventLogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn write_events(&mut self, events: &[PaymentEvent]) -> Result<()> {
        for (seq, event) in events.iter().enumerate() {
            let line = EventLine {
                seq,
                event,
                packed: hex::encode(codec::encode(event)?),
            };
            serde_json::to_writer(&mut self.sink, &line)
                .map_err(|e| LedgerError::Internal(Box::new(e)))?;
            self.sink.write_all(b"\n")?;
        }
        self.sink.flush()?;
        Ok(())
    }
}
