pub mod activities;
pub mod activity;
pub mod auth;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod retention;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
