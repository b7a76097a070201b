pub mod auth;
pub mod feed;
pub mod hall_of_fame;
pub mod moderation;
pub mod scoring;
pub mod users;
pub mod videos;
pub mod votes;

/// Outcome of an operation only the resource owner may perform.
#[derive(Debug)]
pub enum OwnerScoped<T> {
    Done(T),
    NotFound,
    NotOwner,
}
