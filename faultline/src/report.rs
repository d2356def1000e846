//! Crash bookkeeping and the human-readable campaign report.

use std::collections::HashMap;

use slog::{Logger, info};

use faultline_protocol::heap::HeapRecord;
use faultline_protocol::ops::Op;
use faultline_protocol::table::{CallSite, CallSiteTable};

use crate::symbolize::Symbolizer;

/// Unique crash signatures accumulated over the injection loop: crash
/// address → call site hypothesized as the cause, in first-seen order.
#[derive(Debug, Default)]
pub struct CrashMap {
    entries: Vec<(u64, u64)>,
    index: HashMap<u64, usize>,
}

impl CrashMap {
    pub fn new() -> CrashMap {
        CrashMap::default()
    }

    /// Records a crash signature; a repeated crash address keeps one
    /// entry, updated with the latest hypothesized cause.
    pub fn record(&mut self, crash: u64, fault: u64) {
        match self.index.get(&crash) {
            Some(&pos) => self.entries[pos].1 = fault,
            None => {
                self.index.insert(crash, self.entries.len());
                self.entries.push((crash, fault));
            }
        }
    }

    /// Number of unique crash signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(crash, fault)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &(u64, u64)> {
        self.entries.iter()
    }
}

fn op_of(table: &CallSiteTable, address: u64) -> Op {
    table.get(address).map(|site| site.op).unwrap_or(Op::Unknown)
}

/// Logs one discovered injection position, with its observed call count.
pub fn log_fault_position(
    log: &Logger,
    symbolizer: &dyn Symbolizer,
    binary: &str,
    site: &CallSite,
    with_count: bool,
) {
    let location = symbolizer.resolve(binary, site.address);
    if !location.is_known() {
        info!(log, " > N/A (maybe you forgot to compile with -g?)");
        return;
    }
    if with_count {
        info!(
            log,
            " > [{}] {} in {} line {}: {} call(s)",
            site.op, location.function, location.file, location.line, site.count
        );
    } else {
        info!(
            log,
            " > [{}] {} in {} line {}",
            site.op, location.function, location.file, location.line
        );
    }
}

/// Logs where an injection run crashed and which forced failure is
/// hypothesized as the cause.
pub fn log_crash_details(
    log: &Logger,
    symbolizer: &dyn Symbolizer,
    binary: &str,
    crash: u64,
    fault: u64,
    table: &CallSiteTable,
) {
    let op = op_of(table, fault);
    info!(log, "Crashed at {crash:#x}, caused by {fault:#x} [{op}]");

    let crash_location = symbolizer.resolve(binary, crash);
    let fault_location = symbolizer.resolve(binary, fault);
    if crash_location.is_known() && fault_location.is_known() {
        info!(log, "  > crash: {crash_location}");
        info!(log, "  > {op}: {fault_location}");
    } else {
        info!(log, "No crash details available (maybe you forgot to compile with -g?)");
    }
}

/// Logs the blocks still live when the target exited.
pub fn log_leaks(
    log: &Logger,
    symbolizer: &dyn Symbolizer,
    binary: &str,
    leaks: &[HeapRecord],
) {
    if leaks.is_empty() {
        return;
    }
    let total: u64 = leaks.iter().map(|leak| leak.size).sum();
    info!(log, "{} leaked block(s), {} byte(s) total:", leaks.len(), total);
    for leak in leaks {
        let location = symbolizer.resolve(binary, leak.site);
        info!(log, " > {} byte(s) allocated at {}", leak.size, location);
    }
}

/// Logs the end-of-campaign summary.
pub fn log_summary(
    log: &Logger,
    symbolizer: &dyn Symbolizer,
    binary: &str,
    crash_count: u32,
    injections: usize,
    crashes: &CrashMap,
    table: &CallSiteTable,
) {
    info!(log, "");
    info!(log, "======= SUMMARY =======");
    info!(log, "");
    info!(log, "Crashed at {crash_count} from {injections} injections");
    info!(log, "Unique crashes: {}", crashes.len());
    info!(log, "");

    if crash_count > 0 {
        info!(log, "Crash details:");
        for &(crash, fault) in crashes.iter() {
            info!(log, "");
            log_crash_details(log, symbolizer, binary, crash, fault, table);
        }
    } else {
        info!(log, "Everything ok, no crashes detected!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_crash_addresses_collapse_to_one_signature() {
        let mut crashes = CrashMap::new();
        crashes.record(0x1000, 0xa);
        crashes.record(0x2000, 0xb);
        crashes.record(0x1000, 0xc);

        assert_eq!(crashes.len(), 2);
        assert_eq!(
            crashes.iter().copied().collect::<Vec<_>>(),
            vec![(0x1000, 0xc), (0x2000, 0xb)],
        );
    }

    #[test]
    fn unattributed_faults_report_the_reserved_operation() {
        let table = CallSiteTable::new();
        assert_eq!(op_of(&table, 0x1234), Op::Unknown);
    }
}
