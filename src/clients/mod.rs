pub mod booking_client;
pub mod calendar_client;
