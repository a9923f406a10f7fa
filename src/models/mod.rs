pub mod driver;
pub mod order;
pub mod payment;
pub mod transaction;
pub mod vendor;
