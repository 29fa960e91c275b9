use crate::application::gateway::Operation;
use crate::application::state_machine::MakeRequest;
use crate::domain::payment::{AccountId, PaymentId};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Fund,
    Make,
    Update,
    Confirm,
    ConfirmBatch,
    Refund,
    Revoke,
    Reverse,
    UpdateLazyAndConfirm,
    Merge,
    Reset,
}

/// One row of the operations file.
///
/// Only the columns an operation needs have to be filled in. `list` carries
/// `id:amount` pairs for `confirm_batch` and source ids for `merge`, both
/// separated by `;`.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRecord {
    pub op: OpType,
    pub caller: Option<AccountId>,
    pub id: Option<String>,
    pub payer: Option<AccountId>,
    pub sponsor: Option<AccountId>,
    pub payer_amount: Option<u64>,
    pub sponsor_amount: Option<u64>,
    pub amount: Option<u64>,
    pub cashback_rate: Option<u16>,
    pub list: Option<String>,
}

/// What a single row asks the ledger to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mint tokens to an account before payments draw on it.
    Fund { account: AccountId, amount: u64 },
    Execute {
        caller: AccountId,
        operation: Operation,
    },
}

fn missing(op: OpType, column: &str) -> LedgerError {
    LedgerError::InvalidRecord(format!("{op:?} requires the {column} column"))
}

impl OperationRecord {
    fn id(&self) -> Result<PaymentId> {
        self.id
            .as_deref()
            .ok_or_else(|| missing(self.op, "id"))?
            .parse()
    }

    fn amount(&self) -> Result<u64> {
        self.amount.ok_or_else(|| missing(self.op, "amount"))
    }

    fn payer_amount(&self) -> Result<u64> {
        self.payer_amount
            .ok_or_else(|| missing(self.op, "payer_amount"))
    }

    fn list(&self) -> Result<Vec<&str>> {
        let list = self.list.as_deref().ok_or_else(|| missing(self.op, "list"))?;
        Ok(list
            .split(';')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect())
    }

    pub fn into_command(self) -> Result<Command> {
        let operation = match self.op {
            OpType::Fund => {
                let account = self.payer.clone().ok_or_else(|| missing(self.op, "payer"))?;
                return Ok(Command::Fund {
                    account,
                    amount: self.amount()?,
                });
            }
            OpType::Make => Operation::Make {
                id: self.id()?,
                request: MakeRequest {
                    payer: self.payer.clone().ok_or_else(|| missing(self.op, "payer"))?,
                    sponsor: self.sponsor.clone(),
                    payer_amount: self.payer_amount()?,
                    sponsor_amount: self.sponsor_amount.unwrap_or(0),
                    cashback_rate: self.cashback_rate.unwrap_or(0),
                },
            },
            OpType::Update => Operation::Update {
                id: self.id()?,
                payer_amount: self.payer_amount()?,
                sponsor_amount: self.sponsor_amount.unwrap_or(0),
            },
            OpType::Confirm => Operation::Confirm {
                id: self.id()?,
                amount: self.amount()?,
            },
            OpType::ConfirmBatch => {
                let items = self
                    .list()?
                    .into_iter()
                    .map(parse_batch_item)
                    .collect::<Result<Vec<_>>>()?;
                Operation::ConfirmBatch { items }
            }
            OpType::Refund => Operation::Refund {
                id: self.id()?,
                amount: self.amount()?,
            },
            OpType::Revoke => Operation::Revoke { id: self.id()? },
            OpType::Reverse => Operation::Reverse { id: self.id()? },
            OpType::UpdateLazyAndConfirm => Operation::UpdateLazyAndConfirm {
                id: self.id()?,
                payer_amount: self.payer_amount()?,
                sponsor_amount: self.sponsor_amount.unwrap_or(0),
                confirmation_amount: self.amount()?,
            },
            OpType::Merge => Operation::Merge {
                target: self.id()?,
                sources: self
                    .list()?
                    .into_iter()
                    .map(str::parse)
                    .collect::<Result<Vec<_>>>()?,
            },
            OpType::Reset => Operation::Reset { id: self.id()? },
        };

        let caller = self.caller.ok_or_else(|| missing(self.op, "caller"))?;
        Ok(Command::Execute { caller, operation })
    }
}

fn parse_batch_item(item: &str) -> Result<(PaymentId, u64)> {
    let (id, amount) = item
        .split_once(':')
        .ok_or_else(|| LedgerError::InvalidRecord(format!("batch item {item:?} is not id:amount")))?;
    let amount = amount
        .trim()
        .parse()
        .map_err(|e| LedgerError::InvalidRecord(format!("batch item {item:?}: {e}")))?;
    Ok((id.parse()?, amount))
}

/// Reads ledger operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing empty columns may be omitted.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts rows, one result per row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader.into_deserialize().map(|result| {
            result
                .map_err(LedgerError::from)
                .and_then(OperationRecord::into_command)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "op,caller,id,payer,sponsor,payer_amount,sponsor_amount,amount,cashback_rate,list\n";

    fn read(rows: &str) -> Vec<Result<Command>> {
        let data = format!("{HEADER}{rows}");
        OperationReader::new(data.as_bytes()).commands().collect()
    }

    fn id(label: &str) -> PaymentId {
        label.parse().unwrap()
    }

    #[test]
    fn test_reader_valid_stream() {
        let results = read(
            "fund,,,alice,,,,500,,\n\
             make, processor, P1, alice, bank, 30, 70, , 10,\n\
             confirm,processor,P1,,,,,40\n",
        );
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Command::Fund {
                account: "alice".into(),
                amount: 500
            }
        );
        match results[1].as_ref().unwrap() {
            Command::Execute {
                caller,
                operation: Operation::Make { id: made, request },
            } => {
                assert_eq!(caller, &AccountId::from("processor"));
                assert_eq!(*made, id("P1"));
                assert_eq!(request.sponsor, Some("bank".into()));
                assert_eq!(request.sponsor_amount, 70);
                assert_eq!(request.cashback_rate, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            results[2].as_ref().unwrap(),
            Command::Execute {
                operation: Operation::Confirm { amount: 40, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_reader_lists() {
        let results = read(
            "confirm_batch,processor,,,,,,,,P1:40; P2:10\n\
             merge,processor,P1,,,,,,,P2;P3\n",
        );
        match results[0].as_ref().unwrap() {
            Command::Execute {
                operation: Operation::ConfirmBatch { items },
                ..
            } => assert_eq!(items, &vec![(id("P1"), 40), (id("P2"), 10)]),
            other => panic!("unexpected command {other:?}"),
        }
        match results[1].as_ref().unwrap() {
            Command::Execute {
                operation: Operation::Merge { target, sources },
                ..
            } => {
                assert_eq!(*target, id("P1"));
                assert_eq!(sources, &vec![id("P2"), id("P3")]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_reader_malformed_rows() {
        let results = read(
            "invalid,processor,P1\n\
             confirm,,P1,,,,,40\n\
             refund,processor,P1\n\
             confirm_batch,processor,,,,,,,,P1-40\n",
        );
        assert_eq!(results.len(), 4);
        assert!(matches!(results[0], Err(LedgerError::Csv(_))));
        for result in &results[1..] {
            assert!(matches!(result, Err(LedgerError::InvalidRecord(_))));
        }
    }
}
