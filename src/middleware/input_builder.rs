use crate::coordinator::RequestKind;
use crate::middleware::AdmissionInput;
use actix_web::dev::ServiceRequest;
use actix_web::ResponseError;
use std::future::{ready, Ready};
use std::net::{AddrParseError, IpAddr, Ipv6Addr};
use thiserror::Error;

type CustomFn = Box<dyn Fn(&ServiceRequest) -> Result<String, actix_web::Error>>;

pub type AdmissionInputFuture = Ready<Result<AdmissionInput, actix_web::Error>>;

/// Utility to create an input function that produces an [AdmissionInput].
///
/// The resource identity is the given name followed by the selected request components, joined
/// with `-`. Every distinct identity gets its own ceilings, so the components decide what is
/// limited together: e.g. adding the peer IP limits each client separately.
pub struct AdmissionInputBuilder {
    resource: String,
    kind: RequestKind,
    real_ip_key: bool,
    peer_ip_key: bool,
    path_key: bool,
    custom_fn: Option<CustomFn>,
}

impl AdmissionInputBuilder {
    /// Admissions are counted as [RequestKind::Requests] unless [AdmissionInputBuilder::kind] is
    /// called.
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_owned(),
            kind: RequestKind::Requests,
            real_ip_key: false,
            peer_ip_key: false,
            path_key: false,
            custom_fn: None,
        }
    }

    pub fn kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    /// Adds the client's real IP to the resource identity.
    ///
    /// # Security
    ///
    /// This calls
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// internally which is only suitable for Actix applications deployed behind a proxy that you
    /// control.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single identity per /64
    pub fn real_ip_key(mut self) -> Self {
        self.real_ip_key = true;
        self
    }

    /// Adds the connection peer IP to the resource identity.
    ///
    /// This is suitable when clients connect directly to the Actix application.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single identity per /64
    pub fn peer_ip_key(mut self) -> Self {
        self.peer_ip_key = true;
        self
    }

    /// Add the request path to the resource identity
    pub fn path_key(mut self) -> Self {
        self.path_key = true;
        self
    }

    /// Dynamically add a custom component to the resource identity
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, actix_web::Error> + 'static,
    {
        self.custom_fn = Some(Box::new(f));
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> AdmissionInputFuture + 'static {
        move |req| {
            ready((|| {
                let mut components = vec![self.resource.clone()];
                let info = req.connection_info();
                if self.real_ip_key {
                    let addr = info.realip_remote_addr().ok_or(Error::MissingAddress)?;
                    components.push(ip_key(addr)?)
                }
                if self.peer_ip_key {
                    let addr = info.peer_addr().ok_or(Error::MissingAddress)?;
                    components.push(ip_key(addr)?)
                }
                if self.path_key {
                    components.push(req.path().to_owned());
                }
                if let Some(f) = &self.custom_fn {
                    components.push(f(req)?)
                }

                Ok(AdmissionInput {
                    resource: components.join("-"),
                    kind: self.kind,
                })
            })())
        }
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("Unable to parse remote IP address: {0}")]
    InvalidIpError(
        #[source]
        #[from]
        AddrParseError,
    ),
    #[error("Remote address is not available")]
    MissingAddress,
}

impl ResponseError for Error {}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(ip_str: &str) -> Result<String, Error> {
    // Peer addresses may carry a port
    let ip = match ip_str.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(e) => ip_str
            .parse::<std::net::SocketAddr>()
            .map(|s| s.ip())
            .map_err(|_| e)?,
    };
    Ok(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return Ok(v4.to_string());
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{subnet}/64")
        }
    })
}
