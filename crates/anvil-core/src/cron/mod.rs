mod schedule;

pub use schedule::{CronParseError, CronSchedule};
