pub mod dialer;
pub mod request;

pub use dialer::{ProxyDialer, ProxyStream};
pub use request::RequestFactory;
