mod client;

pub use client::{StreamClient, StreamClientError, CLIENT_ID_LEN};
