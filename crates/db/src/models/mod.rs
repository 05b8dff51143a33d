//! Row models and insert DTOs, one module per table.

pub mod alert;
pub mod notification;
pub mod reading;
pub mod sensor;
