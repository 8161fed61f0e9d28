// datasnap/src/restore/verification.rs
use anyhow::{Context, Result};

use crate::schema::Table;
use crate::store::DataStore;

/// Row count of one table in the snapshot against the live store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountCheck {
    pub table: Table,
    pub expected: usize,
    pub actual: usize,
}

impl CountCheck {
    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }
}

/// Compares the snapshot's per-table row counts with the store's.
///
/// Rows the target already held before a restore count too, so `actual` may
/// legitimately exceed `expected`. Nothing is written to the store.
pub async fn verify_counts<S: DataStore>(
    store: &S,
    expected: &[(Table, usize)],
) -> Result<Vec<CountCheck>> {
    println!("🔎 Verifying row counts against the snapshot...");
    let mut checks = Vec::with_capacity(expected.len());

    for (table, expected) in expected {
        let actual = store
            .find_many(*table, &[])
            .await
            .with_context(|| format!("Failed to count rows of table {}", table))?
            .len();
        let check = CountCheck {
            table: *table,
            expected: *expected,
            actual,
        };
        if check.matches() {
            println!("  ✓ {}: {} rows", table, actual);
        } else {
            println!(
                "  ⚠️  {}: snapshot has {} rows, store has {}",
                table, check.expected, check.actual
            );
        }
        checks.push(check);
    }

    let mismatches = checks.iter().filter(|c| !c.matches()).count();
    if mismatches == 0 {
        println!("✓ Verification completed: all {} tables match.", checks.len());
    } else {
        println!("⚠️  Verification completed: {} table(s) differ from the snapshot.", mismatches);
    }
    Ok(checks)
}
