//! CSV emission for a frozen table.
//!
//! The schema is the union of every column seen during collection, so cells
//! a guest never populated are written as empty strings and every row has
//! the same width. Quoting follows RFC 4180 via the `csv` crate.

use crate::error::Result;
use crate::normalize::Table;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing::info;

/// Write the table as CSV: header first, then one row per guest in
/// enumeration order.
pub fn write_csv<W: Write>(writer: W, table: &Table) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(table.columns())?;
    for row in table.rows() {
        let record = table
            .columns()
            .iter()
            .map(|column| row.get(column).map(String::as_str).unwrap_or(""));
        csv_writer.write_record(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write the table to a file path, or to stdout for `-`.
pub fn write_output(path: &str, table: &Table) -> Result<()> {
    let sink = if path == "-" { "stdout" } else { path };
    if path == "-" {
        write_csv(io::stdout().lock(), table)?;
    } else {
        let file = File::create(path)?;
        write_csv(BufWriter::new(file), table)?;
    }
    info!(
        "Wrote {} rows x {} columns to {}",
        table.rows().len(),
        table.columns().len(),
        sink
    );
    Ok(())
}
