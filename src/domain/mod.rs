pub mod banned_video;
pub mod geo;
pub mod hall_of_fame;
pub mod user;
pub mod video;
pub mod vote;
