//! Adscout core: pure scouting bookkeeping and text fragment rewriting.
mod finders;
mod fragment;
mod run;
mod schedule;
mod tally;

pub use finders::{contact_scrubber, EmailFinder, RegexFinder, UrlFinder};
pub use fragment::{identity, replace_with, Chunks, FragmentFinder, FragmentPipeline, Span, Transform};
pub use run::{RunOutcome, ScoutRun};
pub use schedule::{next_run_due, remaining_wait, Rotation, ScoutPhase};
pub use tally::RunTally;
