use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Method, Request};

use crate::domain::{Result, TunnelError};
use crate::ports::RequestFactory;

/// Builds `<method> http://<host>/` with a matching `Host` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRequestFactory;

impl RequestFactory for DefaultRequestFactory {
    fn new_request(&self, host: &str, method: Method, body: Bytes) -> Result<Request<Full<Bytes>>> {
        Request::builder()
            .method(method)
            .uri(format!("http://{}/", host))
            .header(HOST, host)
            .body(Full::new(body))
            .map_err(|e| TunnelError::RequestConstruction(format!("{}", e)))
    }
}
