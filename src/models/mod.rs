pub mod assignment;
pub mod exam;
pub mod presence;
pub mod proctor_event;
pub mod signal;
