pub mod deletion_plan;
pub mod duplicates;

pub use deletion_plan::{DedupOutcome, DuplicateResolver};
pub use duplicates::{DuplicateFinder, DuplicateGroup, DuplicateReport, GroupMember, Signature};
