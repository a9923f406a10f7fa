pub mod assignment;
pub mod reminders;
pub mod settlement;
pub mod transitions;
