mod counters;

pub use counters::{count_missing, RunCounters};
