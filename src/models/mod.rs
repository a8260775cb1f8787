pub mod event;
pub mod plan;
pub mod report;
pub mod reservation;
