//! Verify command implementation.

use shelfdb_core::{Collection, VerifyReport};
use std::path::Path;
use tracing::info;

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying collection at {:?}", path);
    println!();

    let collection = Collection::open_existing(path)?;
    let report = collection.verify()?;
    collection.close();
    info!(collection = %collection.name(), issues = report.issues.len(), "verification finished");

    print_result(&report);

    println!();
    if report.is_ok() {
        println!("✓ Collection verification passed");
        Ok(())
    } else {
        println!("✗ Collection verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(report: &VerifyReport) {
    println!("  Live ids:       {}", report.live);
    println!("  Stored records: {}", report.stored);
    println!("  Index entries:  {}", report.index_entries);
    if !report.issues.is_empty() {
        println!("  Issues:");
        for issue in &report.issues {
            println!("    - {}", issue);
        }
    }
}
