pub mod booking;
pub mod meeting;
pub mod notification;
pub mod payment;
pub mod signature;
