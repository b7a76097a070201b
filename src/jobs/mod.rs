pub mod retirement;
