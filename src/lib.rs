pub mod api;
pub mod driver;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod session;
pub mod utils;

// Re-export common items
pub use error::{AuthFailure, FailureKind, VerifyError};
pub use parser::{parse_suite_file, Suite};
pub use report::generate_report;
pub use runner::{run_suite, run_suite_with};
