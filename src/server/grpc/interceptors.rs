use crate::core::config::REAL_IP_METADATA;
use crate::server::RequestId;
use ipnet::IpNet;
use std::net::IpAddr;
use tonic::service::Interceptor;
use tonic::{Request, Status};

/// Logging then trusted subnet validation for every call.
#[derive(Debug, Clone, Default)]
pub struct Interceptors {
    trusted_subnet: Option<IpNet>,
}

impl Interceptors {
    pub fn new(trusted_subnet: Option<IpNet>) -> Self {
        Self { trusted_subnet }
    }

    fn check_subnet(&self, id: RequestId, request: &Request<()>) -> Result<(), Status> {
        let Some(subnet) = self.trusted_subnet else {
            return Ok(());
        };

        let declared = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());

        match declared {
            Some(ip) if subnet.contains(&ip) => Ok(()),
            _ => {
                tracing::debug!("[{}] access is denied by IP: {:?}", id, declared);
                Err(Status::permission_denied("access is denied by IP"))
            },
        }
    }
}

impl Interceptor for Interceptors {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let id = RequestId::new();
        request.extensions_mut().insert(id);
        tracing::info!("[{}] received gRPC request", id);

        self.check_subnet(id, &request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ip: Option<&str>) -> Request<()> {
        let mut request = Request::new(());
        if let Some(ip) = ip {
            request
                .metadata_mut()
                .insert(REAL_IP_METADATA, ip.parse().unwrap());
        }
        request
    }

    #[test]
    fn test_request_gets_correlation_id() {
        let mut interceptors = Interceptors::default();
        let request = interceptors.call(request(None)).unwrap();
        assert!(request.extensions().get::<RequestId>().is_some());
    }

    #[test]
    fn test_subnet_check() {
        let mut interceptors = Interceptors::new(Some("192.168.0.0/16".parse().unwrap()));

        assert!(interceptors.call(request(Some("192.168.3.4"))).is_ok());

        let denied = interceptors.call(request(Some("10.0.0.1"))).unwrap_err();
        assert_eq!(denied.code(), tonic::Code::PermissionDenied);

        let missing = interceptors.call(request(None)).unwrap_err();
        assert_eq!(missing.code(), tonic::Code::PermissionDenied);
    }
}
