//! A fault-injection campaign orchestrator for compiled binaries.
//!
//! A campaign answers, call site by call site, "does this program handle
//! a failure of this specific operation correctly?" — without touching
//! the target's source or binary. The target is first run once with the
//! interception runtime preloaded to discover every allocation and
//! file-I/O call site (the profiling run), then once per discovered site
//! with exactly that site forced to fail (the injection runs). Each
//! run's termination status and persisted crash evidence are folded into
//! a final report.
//!
//! The orchestrator and the target communicate only through the small
//! binary records defined in [`faultline_protocol`] and through process
//! exit status; the interception runtime lives in the sibling
//! `fault_inject` cdylib.
//!
//! ```no_run
//! use faultline::campaign::{Campaign, CampaignOptions, remove_campaign_files};
//! use faultline::logging::{LogOptions, create_logger};
//! use faultline::runner::ForkRunner;
//! use faultline::symbolize::Addr2Line;
//!
//! fn main() -> anyhow::Result<()> {
//!     let log = create_logger(&LogOptions::default())?;
//!     let runner = ForkRunner::new("./victim", &[], None)?;
//!     let mut campaign = Campaign::new(
//!         ".",
//!         "./victim",
//!         CampaignOptions::default(),
//!         runner,
//!         Addr2Line,
//!         log,
//!     );
//!     let result = campaign.run();
//!     remove_campaign_files(std::path::Path::new("."));
//!     let summary = result?;
//!     println!("{} unique crashes", summary.unique_crashes);
//!     Ok(())
//! }
//! ```

pub mod campaign;
pub mod logging;
pub mod report;
pub mod runner;
pub mod shim;
pub mod symbolize;
pub mod target;
