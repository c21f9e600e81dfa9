pub mod request_factory;
pub mod tcp_dialer;

pub use request_factory::DefaultRequestFactory;
pub use tcp_dialer::TcpProxyDialer;
