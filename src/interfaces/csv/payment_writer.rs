use crate::domain::payment::{AccountId, Payment, PaymentId, PaymentStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: String,
    status: PaymentStatus,
    payer: &'a AccountId,
    sponsor: Option<&'a AccountId>,
    payer_amount: u64,
    sponsor_amount: u64,
    confirmed_amount: u64,
    unconfirmed_amount: u64,
    refunded_amount: u64,
    cashback_rate: u16,
    revocation_count: u8,
    merged_into: Option<String>,
}

impl<'a> PaymentRow<'a> {
    fn new(id: &PaymentId, payment: &'a Payment) -> Self {
        Self {
            id: id.to_string(),
            status: payment.status,
            payer: &payment.payer,
            sponsor: payment.sponsor.as_ref(),
            payer_amount: payment.payer_amount,
            sponsor_amount: payment.sponsor_amount,
            confirmed_amount: payment.confirmed_amount,
            unconfirmed_amount: payment.unconfirmed_amount(),
            refunded_amount: payment.refunded_amount,
            cashback_rate: payment.cashback_rate,
            revocation_count: payment.revocation_count,
            merged_into: payment.merged_into.map(|target| target.to_string()),
        }
    }
}

#[derive(Serialize)]
struct BalanceRow<'a> {
    account: &'a AccountId,
    balance: u64,
}

/// Writes the final payment table and token balances as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, payments: &[(PaymentId, Payment)]) -> Result<()> {
        for (id, payment) in payments {
            self.writer.serialize(PaymentRow::new(id, payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_balances(&mut self, balances: &[(AccountId, u64)]) -> Result<()> {
        for (account, balance) in balances {
            self.writer.serialize(BalanceRow {
                account,
                balance: *balance,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_payments() {
        let mut merged = Payment::active("alice".into(), None, 20, 0, 0);
        merged.status = PaymentStatus::Merged;
        merged.merged_into = Some("P1".parse().unwrap());
        let mut active = Payment::active("alice".into(), Some("bank".into()), 30, 70, 15);
        active.confirmed_amount = 40;

        let mut out = Vec::new();
        PaymentWriter::new(&mut out)
            .write_payments(&[
                ("P1".parse().unwrap(), active),
                ("P2".parse().unwrap(), merged),
            ])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,status,payer,sponsor,payer_amount,sponsor_amount,confirmed_amount,\
             unconfirmed_amount,refunded_amount,cashback_rate,revocation_count,merged_into"
        );
        assert_eq!(lines[1], "P1,active,alice,bank,30,70,40,60,0,15,0,");
        assert_eq!(lines[2], "P2,merged,alice,,20,0,0,20,0,0,0,P1");
    }

    #[test]
    fn test_write_balances() {
        let mut out = Vec::new();
        PaymentWriter::new(&mut out)
            .write_balances(&[("alice".into(), 960), ("escrow".into(), 0)])
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "account,balance\nalice,960\nescrow,0\n"
        );
    }
}
