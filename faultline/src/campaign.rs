//! The campaign state machine: `Setup → ProfileRun → ParseTable →
//! InjectLoop → Summary → Cleanup`.
//!
//! Run-mode variants (profile-only, inject-only, heap tracing, external
//! wrapper) only change which states are entered, never the machine's
//! shape.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use slog::{Logger, info, warn};

use faultline_protocol::crash::CrashRecord;
use faultline_protocol::heap;
use faultline_protocol::ops::OpSet;
use faultline_protocol::settings::{Mode, Settings};
use faultline_protocol::table::CallSiteTable;
use faultline_protocol::{CRASH_FILE, HEAP_FILE, PROFILE_FILE, SETTINGS_FILE, SHIM_FILE};

use crate::report::{self, CrashMap};
use crate::runner::{RunOutcome, Runner, signal_name};
use crate::symbolize::Symbolizer;

/// Which parts of the state machine a campaign enters and which
/// operations it injects.
#[derive(Clone, Debug)]
pub struct CampaignOptions {
    pub operations: OpSet,
    pub trace_heap: bool,
    /// Stop after the table is parsed; inject nothing.
    pub profile_only: bool,
    /// Skip profiling; requires a table persisted by an earlier run.
    pub inject_only: bool,
}

impl Default for CampaignOptions {
    fn default() -> CampaignOptions {
        CampaignOptions {
            operations: OpSet::default_set(),
            trace_heap: false,
            profile_only: false,
            inject_only: false,
        }
    }
}

/// Campaign totals, returned to the caller and rendered into the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CampaignSummary {
    pub injections: usize,
    pub crash_count: u32,
    pub unique_crashes: usize,
}

/// One full profile-then-inject sequence over a target binary.
pub struct Campaign<R, S> {
    dir: PathBuf,
    target: String,
    options: CampaignOptions,
    runner: R,
    symbolizer: S,
    log: Logger,
}

impl<R: Runner, S: Symbolizer> Campaign<R, S> {
    pub fn new(
        dir: impl Into<PathBuf>,
        target: impl Into<String>,
        options: CampaignOptions,
        runner: R,
        symbolizer: S,
        log: Logger,
    ) -> Campaign<R, S> {
        Campaign {
            dir: dir.into(),
            target: target.into(),
            options,
            runner,
            symbolizer,
            log,
        }
    }

    /// Drives the whole campaign. Campaign-scoped files are left on disk
    /// for inspection; callers remove them with
    /// [`remove_campaign_files`] unconditionally afterwards.
    pub fn run(&mut self) -> Result<CampaignSummary> {
        if self.target.len() > 255 {
            bail!("target path exceeds the settings record's 255-byte limit");
        }

        if self.options.inject_only {
            info!(self.log, "Skipping the profiling run, reusing the existing table");
        } else {
            self.profile()?;
        }
        let table = self.parse_table()?;

        let mut crashes = CrashMap::new();
        let mut crash_count = 0u32;
        let mut injections = 0usize;
        if self.options.profile_only {
            info!(self.log, "Profile-only campaign, skipping the injection loop");
        } else {
            self.inject_all(&table, &mut crashes, &mut crash_count, &mut injections)?;
        }

        report::log_summary(
            &self.log,
            &self.symbolizer,
            &self.target,
            crash_count,
            injections,
            &crashes,
            &table,
        );

        Ok(CampaignSummary {
            injections,
            crash_count,
            unique_crashes: crashes.len(),
        })
    }

    fn base_settings(&self) -> Settings {
        Settings {
            mode: Mode::Profile,
            limit: -1,
            target_path: self.target.clone(),
            operations: self.options.operations,
            trace_heap: self.options.trace_heap,
        }
    }

    /// The single run that discovers the campaign's population of call
    /// sites. Anything but a normal exit here aborts the campaign — the
    /// table it leaves behind is the ground truth every later run reads.
    fn profile(&mut self) -> Result<()> {
        info!(self.log, "Profiling start");
        fs::write(self.dir.join(PROFILE_FILE), [])
            .with_context(|| format!("need write access to '{PROFILE_FILE}'"))?;

        let settings = self.base_settings();
        settings.save(&self.dir)?;

        let outcome = self.runner.run(&settings)?;
        self.log_outcome(outcome);
        match outcome {
            RunOutcome::Exited(_) => {
                info!(self.log, "Profiling done");
                if self.options.trace_heap {
                    self.report_heap();
                }
                Ok(())
            }
            _ => bail!("there was an error while profiling, aborting now"),
        }
    }

    fn report_heap(&self) {
        match heap::load(&self.dir) {
            Ok(leaks) => report::log_leaks(&self.log, &self.symbolizer, &self.target, &leaks),
            Err(err) => warn!(self.log, "unreadable heap table: {err}"),
        }
    }

    /// Reads the persisted table back in file order; that order is the
    /// campaign's fixed ordinal numbering from here on.
    fn parse_table(&self) -> Result<CallSiteTable> {
        let table = CallSiteTable::load(&self.dir)
            .context("no trace generated, aborting now")?;
        info!(
            self.log,
            "Found {} different injection position(s) with {} call(s)",
            table.len(),
            table.total_calls()
        );
        for site in table.iter() {
            report::log_fault_position(&self.log, &self.symbolizer, &self.target, site, true);
        }
        Ok(table)
    }

    fn inject_all(
        &mut self,
        table: &CallSiteTable,
        crashes: &mut CrashMap,
        crash_count: &mut u32,
        injections: &mut usize,
    ) -> Result<()> {
        info!(
            self.log,
            "Injecting {} fault(s), one for every injection position",
            table.len()
        );

        for (ordinal, site) in table.iter().enumerate() {
            info!(self.log, "");
            info!(self.log, "Inject fault #{}", ordinal + 1);
            info!(self.log, "Fault position:");
            report::log_fault_position(&self.log, &self.symbolizer, &self.target, site, false);

            CrashRecord::clear(&self.dir)
                .with_context(|| format!("could not clear '{CRASH_FILE}'"))?;
            let mut settings = self.base_settings();
            settings.mode = Mode::Inject;
            settings.limit = ordinal as i32;
            settings.save(&self.dir)?;

            let outcome = self.runner.run(&settings)?;
            self.log_outcome(outcome);

            // The crash record is authoritative when present; a signaled
            // termination without one still counts, just without
            // per-site attribution.
            match CrashRecord::load(&self.dir) {
                Ok(Some(record)) => {
                    report::log_crash_details(
                        &self.log,
                        &self.symbolizer,
                        &self.target,
                        record.crash,
                        record.fault,
                        table,
                    );
                    crashes.record(record.crash, record.fault);
                    *crash_count += 1;
                }
                Ok(None) => {
                    if outcome.killed() {
                        *crash_count += 1;
                    }
                }
                Err(err) => {
                    warn!(self.log, "unreadable crash record: {err}");
                    if outcome.killed() {
                        *crash_count += 1;
                    }
                }
            }

            if self.options.trace_heap {
                self.report_heap();
            }

            *injections += 1;
            info!(self.log, "Injection #{} done", ordinal + 1);
        }
        Ok(())
    }

    fn log_outcome(&self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Exited(code) => match outcome.derived_signal() {
                Some(signo) => {
                    info!(self.log, "Exited, status: {code} ({})", signal_name(signo))
                }
                None => info!(self.log, "Exited, status: {code}"),
            },
            RunOutcome::Signaled(signo) => {
                info!(self.log, "Killed by signal {signo} ({})", signal_name(signo))
            }
            RunOutcome::Stopped(signo) => {
                info!(self.log, "Stopped by signal {signo} ({})", signal_name(signo))
            }
        }
    }
}

/// Removes every campaign-scoped persisted file, including the staged
/// interception library. Runs whether the campaign succeeded or not;
/// files that never came to exist are not an error.
pub fn remove_campaign_files(dir: &Path) {
    for name in [SETTINGS_FILE, PROFILE_FILE, CRASH_FILE, HEAP_FILE, SHIM_FILE] {
        let _ = fs::remove_file(dir.join(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use faultline_protocol::ops::Op;
    use slog::o;

    use crate::symbolize::SourceLocation;

    struct NullSymbolizer;

    impl Symbolizer for NullSymbolizer {
        fn resolve(&self, _binary: &str, _address: u64) -> SourceLocation {
            SourceLocation::unknown()
        }
    }

    /// Stands in for the target process: materializes the table during
    /// the profiling run and replays scripted outcomes per ordinal.
    struct ScriptedRunner {
        dir: PathBuf,
        sites: Vec<(u64, Op)>,
        profile_outcome: RunOutcome,
        inject_outcomes: Vec<RunOutcome>,
        crash_records: Vec<(usize, CrashRecord)>,
        seen: Vec<Settings>,
    }

    impl ScriptedRunner {
        fn new(dir: &Path, sites: Vec<(u64, Op)>) -> ScriptedRunner {
            ScriptedRunner {
                dir: dir.to_path_buf(),
                sites,
                profile_outcome: RunOutcome::Exited(0),
                inject_outcomes: Vec::new(),
                crash_records: Vec::new(),
                seen: Vec::new(),
            }
        }
    }

    impl Runner for ScriptedRunner {
        fn run(&mut self, settings: &Settings) -> Result<RunOutcome> {
            self.seen.push(settings.clone());
            match settings.mode {
                Mode::Profile => {
                    let mut table = CallSiteTable::new();
                    for &(address, op) in &self.sites {
                        table.record(address, op);
                    }
                    table.save(&self.dir)?;
                    Ok(self.profile_outcome)
                }
                Mode::Inject => {
                    let ordinal = settings.limit as usize;
                    for &(at, record) in &self.crash_records {
                        if at == ordinal {
                            fs::write(self.dir.join(CRASH_FILE), record.to_bytes())?;
                        }
                    }
                    Ok(self
                        .inject_outcomes
                        .get(ordinal)
                        .copied()
                        .unwrap_or(RunOutcome::Exited(0)))
                }
            }
        }
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn three_sites() -> Vec<(u64, Op)> {
        vec![
            (0x4005a0, Op::Malloc),
            (0x4006b4, Op::Malloc),
            (0x400720, Op::Malloc),
        ]
    }

    #[test]
    fn one_injection_run_per_discovered_site_in_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(dir.path(), three_sites());
        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            CampaignOptions::default(),
            runner,
            NullSymbolizer,
            logger(),
        );

        let summary = campaign.run().unwrap();
        assert_eq!(summary.injections, 3);
        assert_eq!(summary.crash_count, 0);
        assert_eq!(summary.unique_crashes, 0);

        let seen = &campaign.runner.seen;
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].mode, Mode::Profile);
        for (index, settings) in seen[1..].iter().enumerate() {
            assert_eq!(settings.mode, Mode::Inject);
            assert_eq!(settings.limit, index as i32);
            assert_eq!(settings.target_path, "./victim");
        }
    }

    #[test]
    fn a_graceful_target_produces_an_empty_crash_map() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(dir.path(), three_sites());
        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            CampaignOptions::default(),
            runner,
            NullSymbolizer,
            logger(),
        );
        let summary = campaign.run().unwrap();
        assert_eq!(summary.crash_count, 0);
        assert_eq!(summary.unique_crashes, 0);
    }

    #[test]
    fn a_handled_crash_is_attributed_through_its_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new(dir.path(), three_sites());
        runner.crash_records.push((
            1,
            CrashRecord {
                fault: 0x4006b4,
                crash: 0x400900,
            },
        ));
        runner.inject_outcomes = vec![
            RunOutcome::Exited(0),
            RunOutcome::Exited(139),
            RunOutcome::Exited(0),
        ];

        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            CampaignOptions::default(),
            runner,
            NullSymbolizer,
            logger(),
        );
        let summary = campaign.run().unwrap();
        assert_eq!(summary.injections, 3);
        assert_eq!(summary.crash_count, 1);
        assert_eq!(summary.unique_crashes, 1);
    }

    #[test]
    fn an_unhandled_kill_counts_without_attribution() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new(dir.path(), three_sites());
        runner.inject_outcomes = vec![
            RunOutcome::Exited(0),
            RunOutcome::Signaled(9),
            RunOutcome::Exited(0),
        ];

        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            CampaignOptions::default(),
            runner,
            NullSymbolizer,
            logger(),
        );
        let summary = campaign.run().unwrap();
        assert_eq!(summary.crash_count, 1);
        assert_eq!(summary.unique_crashes, 0);
    }

    #[test]
    fn a_failed_profiling_run_aborts_before_any_injection() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new(dir.path(), three_sites());
        runner.profile_outcome = RunOutcome::Signaled(11);

        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            CampaignOptions::default(),
            runner,
            NullSymbolizer,
            logger(),
        );
        assert_matches!(campaign.run(), Err(_));
        assert_eq!(campaign.runner.seen.len(), 1);
    }

    #[test]
    fn profile_only_skips_the_injection_loop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(dir.path(), three_sites());
        let options = CampaignOptions {
            profile_only: true,
            ..CampaignOptions::default()
        };
        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            options,
            runner,
            NullSymbolizer,
            logger(),
        );
        let summary = campaign.run().unwrap();
        assert_eq!(summary.injections, 0);
        assert_eq!(campaign.runner.seen.len(), 1);
    }

    #[test]
    fn inject_only_requires_an_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(dir.path(), Vec::new());
        let options = CampaignOptions {
            inject_only: true,
            ..CampaignOptions::default()
        };
        let mut campaign = Campaign::new(
            dir.path(),
            "./victim",
            options,
            runner,
            NullSymbolizer,
            logger(),
        );
        assert_matches!(campaign.run(), Err(_));
        assert!(campaign.runner.seen.is_empty());
    }

    #[test]
    fn cleanup_removes_every_campaign_file_and_tolerates_absences() {
        let dir = tempfile::tempdir().unwrap();
        for name in [SETTINGS_FILE, PROFILE_FILE, SHIM_FILE] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        remove_campaign_files(dir.path());
        remove_campaign_files(dir.path());
        for name in [SETTINGS_FILE, PROFILE_FILE, CRASH_FILE, HEAP_FILE, SHIM_FILE] {
            assert!(!dir.path().join(name).exists());
        }
    }
}
