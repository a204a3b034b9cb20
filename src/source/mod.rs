//! Places reports are read from.

use crate::db::ReportStore;
use crate::error::Error;
use crate::pipeline::Pipeline;

pub mod file;
pub mod imap;
pub mod mbox;

/// Feeds every item it holds through the pipeline, then removes or moves items as the
/// pipeline decides.
pub trait Source {
	fn describe(&self) -> String;

	fn run<S: ReportStore>(&mut self, pipeline: &mut Pipeline<S>) -> Result<(), Error>;
}
