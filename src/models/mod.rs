pub mod booking;

pub use booking::{
    Booking, BookingFilter, BookingPatch, BookingRequest, BookingStatus, NewBooking, PaymentOrder,
    PaymentVerification, SortOrder,
};
