pub mod scheduler;

pub use scheduler::{run_janitor, BackgroundScheduler, JANITOR_SCHEDULE};
