pub mod comment;
pub mod company;
pub mod delivery;
pub mod request;
