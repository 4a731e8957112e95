pub mod messages;
pub mod rest;
pub mod stream;

pub use rest::AlpacaRestClient;
pub use stream::AlpacaStreamClient;
