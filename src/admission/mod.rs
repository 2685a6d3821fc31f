//! Admission module
//!
//! Capacity-limited event registration: per-event capacity tracking,
//! admission decisions and FIFO waitlist promotion.

mod capacity;
mod commands;
mod controller;
mod waitlist;

pub use capacity::{Availability, CapacityTracker, EventSection, Reservation};
pub use commands::{
    CancellationResult, CreateEventCommand, EventCancellationResult, RegisterCommand,
    RegistrationResult,
};
pub use controller::AdmissionController;
pub use waitlist::WaitlistPromoter;
