pub mod utils;
pub mod verdict;

pub use utils::compare_output;
pub use verdict::{ExecutionResult, ExecutionStatus, Verdict};
