pub mod connection;
pub mod dispatcher;
pub mod messenger;
