pub mod desired_state;
pub mod executor;
pub mod ical_parser;
pub mod reconciler;
pub mod recurrence;
pub mod report_sink;
pub mod slot_policy;
pub mod sync_flow;
