mod clock;
mod retry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use retry::{retry_on_conflict, RetryPolicy};
