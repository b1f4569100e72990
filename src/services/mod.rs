pub mod checkin;
pub mod cleanup;
pub mod inventory;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod reservations;
pub mod tickets;
