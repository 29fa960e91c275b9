use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg("tests/fixtures/operations.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "id,status,payer,sponsor,payer_amount,sponsor_amount,confirmed_amount,unconfirmed_amount,refunded_amount,cashback_rate,revocation_count,merged_into",
        ))
        // Confirm 40 then refund the remaining 60
        .stdout(predicate::str::contains("P1,active,alice,,40,0,40,0,60,0,0,"))
        // Subsidized refund of 50 splits 35 to the sponsor, 15 to the payer
        .stdout(predicate::str::contains("P2,active,bob,bank,15,35,0,50,50,5,0,"))
        // P4 and P5 folded into P3
        .stdout(predicate::str::contains("P3,active,alice,,100,0,0,100,0,0,0,"))
        .stdout(predicate::str::contains("P4,merged,alice,,20,0,0,20,0,0,0,P3"))
        .stdout(predicate::str::contains("P5,merged,alice,,30,0,0,30,0,0,0,P3"))
        // Unknown caller never reaches the ledger
        .stdout(predicate::str::contains("P6").not())
        .stderr(predicate::str::contains("mallory is not allowed to make"));

    Ok(())
}

#[test]
fn test_cli_writes_balances_and_events() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let balances = dir.path().join("balances.csv");
    let events = dir.path().join("events.jsonl");

    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg("tests/fixtures/operations.csv")
        .arg("--balances")
        .arg(&balances)
        .arg("--events")
        .arg(&events);
    cmd.assert().success();

    let balances = std::fs::read_to_string(balances)?;
    assert_eq!(
        balances,
        "account,balance\nalice,860\nbank,965\nbob,985\ncash_out,40\nescrow,150\n"
    );

    let events = std::fs::read_to_string(events)?;
    let lines: Vec<serde_json::Value> = events
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0]["kind"], "payment_made");
    assert_eq!(lines[4]["kind"], "payment_refunded");
    assert_eq!(lines[4]["sponsor"], "bank");
    assert_eq!(lines[9]["kind"], "payment_merged");
    assert_eq!(lines[9]["merge_target"], "P3");
    assert!(lines.iter().all(|line| line["version"] == 2));

    Ok(())
}

#[test]
fn test_cli_custom_processor_via_env() {
    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg("tests/fixtures/operations.csv")
        .env("LEDGER_PROCESSORS", "mallory");

    // Only the funding rows and mallory's payment go through
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("P6,active,alice,,10,0,0,10,0,0,0,"))
        .stdout(predicate::str::contains("P1,").not());
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("cardpay-ledger"));
    cmd.arg("tests/fixtures/does_not_exist.csv");
    cmd.assert().failure();
}
