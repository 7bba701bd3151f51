//! Safety and reclamation
//!
//! Every mapped range has exactly one owner; dropping the owner unmaps it.

pub mod reclaim;

pub use reclaim::ReclaimTicket;
