use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request};

use crate::domain::Result;

/// Port for building the outbound request of one tunnel round trip.
///
/// The engine adds the tunnel headers afterwards, so implementations only
/// decide the method, target and any extra headers.
pub trait RequestFactory: Send + Sync {
    fn new_request(&self, host: &str, method: Method, body: Bytes) -> Result<Request<Full<Bytes>>>;
}

impl<F> RequestFactory for F
where
    F: Fn(&str, Method, Bytes) -> Result<Request<Full<Bytes>>> + Send + Sync,
{
    fn new_request(&self, host: &str, method: Method, body: Bytes) -> Result<Request<Full<Bytes>>> {
        self(host, method, body)
    }
}
