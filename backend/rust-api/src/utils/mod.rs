pub mod retry;

pub use retry::{retry_if, RetryPolicy};
