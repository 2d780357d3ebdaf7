pub mod driver;

pub use driver::{WebConfig, WebDriver, WebEnvironment};
