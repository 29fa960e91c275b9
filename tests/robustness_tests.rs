use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const HEADER: [&str; 10] = [
    "op",
    "caller",
    "id",
    "payer",
    "sponsor",
    "payer_amount",
    "sponsor_amount",
    "amount",
    "cashback_rate",
    "list",
];

fn write_csv(rows: &[[&str; 10]]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(file.path()).unwrap();
    wtr.write_record(HEADER).unwrap();
    for row in rows {
        wtr.write_record(row).unwrap();
    }
    wtr.flush().unwrap();
    file
}

#[test]
fn test_malformed_csv_handling() {
    let file = write_csv(&[
        ["fund", "", "", "alice", "", "", "", "100", "", ""],
        // Unknown operation
        ["explode", "processor", "P1", "alice", "", "10", "", "", "", ""],
        // Make without a payer amount
        ["make", "processor", "P1", "alice", "", "", "", "", "", ""],
        // Valid make
        ["make", "processor", "P1", "alice", "", "60", "", "", "", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stdout(predicate::str::contains("P1,active,alice,,60,0,0,60,0,0,0,"));
}

#[test]
fn test_invalid_data_types() {
    let file = write_csv(&[
        ["fund", "", "", "alice", "", "", "", "100", "", ""],
        // Text in amount field
        ["make", "processor", "P1", "alice", "", "lots", "", "", "", ""],
        // Negative amount
        ["make", "processor", "P2", "alice", "", "-5", "", "", "", ""],
        // Identifier longer than 32 bytes
        ["make", "processor", "ThisIdentifierIsWayTooLongToFitIn32Bytes", "alice", "", "5", "", "", "", ""],
        // Valid make
        ["make", "processor", "P3", "alice", "", "5", "", "", "", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stdout(predicate::str::contains("P3,active,alice,,5,0,0,5,0,0,0,"))
        .stdout(predicate::str::contains("P1,").not())
        .stdout(predicate::str::contains("P2,").not());
}

#[test]
fn test_rejected_operations_do_not_stop_processing() {
    let file = write_csv(&[
        ["fund", "", "", "alice", "", "", "", "100", "", ""],
        ["make", "processor", "P1", "alice", "", "100", "", "", "", ""],
        // Over-confirmation
        ["confirm", "processor", "P1", "", "", "", "", "101", "", ""],
        // Insufficient funds for a second payment
        ["make", "processor", "P2", "alice", "", "1", "", "", "", ""],
        // Refund of a payment that was never made
        ["refund", "processor", "P9", "", "", "", "", "1", "", ""],
        ["confirm", "processor", "P1", "", "", "", "", "100", "", ""],
    ]);

    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("exceeds the unconfirmed balance"))
        .stderr(predicate::str::contains("insufficient balance on alice"))
        .stderr(predicate::str::contains("payment P9 is nonexistent"))
        .stdout(predicate::str::contains("P1,active,alice,,100,0,100,0,0,0,0,"))
        .stdout(predicate::str::contains("P2,").not());
}
