use rand::Rng;
use std::fs::File;
use std::io::Error;
use std::path::Path;

pub const HEADER: [&str; 10] = [
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

/// Writes a funding row for `payers` accounts followed by one `make` and one
/// `confirm` row per payment, spread across the payers.
pub fn generate_csv(path: &Path, payments: usize, payers: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    let mut rng = rand::thread_rng();

    wtr.write_record(HEADER)?;
    for payer in 1..=payers {
        let account = format!("payer{payer}");
        wtr.write_record(["fund", "", "", &account, "", "", "", "1000000", "", ""])?;
    }

    for i in 1..=payments {
        let id = format!("P{i}");
        let payer = format!("payer{}", rng.gen_range(1..=payers));
        let amount: u64 = rng.gen_range(1..=1_000);
        let confirmed = rng.gen_range(0..=amount);
        wtr.write_record([
            "make",
            "processor",
            &id,
            &payer,
            "",
            &amount.to_string(),
            "",
            "",
            "",
            "",
        ])?;
        wtr.write_record([
            "confirm",
            "processor",
            &id,
            "",
            "",
            "",
            "",
            &confirmed.to_string(),
            "",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
