//! Status HTTP endpoint (spec §6 "Status HTTP"): IP-gated `GET /networks`
//! dump of the current networks map, obtained via a serialized `networks` op
//! so readers see a consistent snapshot.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse};
use cidr::IpCidr;

use crate::model::NetworkState;
use crate::serializer::OpSender;

pub struct StatusConfig {
    pub auth_cidrs: Vec<IpCidr>,
}

impl StatusConfig {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let auth_cidrs = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| IpCidr::from_str(s).map_err(|e| format!("invalid auth CIDR {:?}: {}", s, e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { auth_cidrs })
    }

    pub fn default_cidrs() -> Self {
        Self::parse("127.0.0.0/8,::1/128").expect("default auth CIDRs are valid")
    }

    pub fn authorized(&self, addr: IpAddr) -> bool {
        self.auth_cidrs.iter().any(|cidr| cidr.contains(&addr))
    }
}

/// Extract the first parseable candidate client address from
/// `X-REAL-IP`, `X-FORWARDED-FOR`, or the connection peer address.
fn client_addr(req: &HttpRequest) -> Option<IpAddr> {
    let header_addr = |name: &str| -> Option<IpAddr> {
        req.headers()
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .split(':')
            .next()?
            .parse()
            .ok()
    };
    header_addr("X-REAL-IP")
        .or_else(|| header_addr("X-FORWARDED-FOR"))
        .or_else(|| req.peer_addr().map(|a| a.ip()))
}

pub async fn networks_handler(
    req: HttpRequest,
    config: web::Data<StatusConfig>,
    ops: web::Data<OpSender>,
) -> HttpResponse {
    let authorized = client_addr(&req).is_some_and(|addr| config.authorized(addr));
    if !authorized {
        return HttpResponse::Unauthorized().body("not authorized");
    }
    match ops.get_ref().networks().await {
        Ok(networks) => HttpResponse::Ok().json(networks),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

pub type NetworksSnapshot = HashMap<String, NetworkState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cidrs_allow_loopback() {
        let config = StatusConfig::default_cidrs();
        assert!(config.authorized("127.0.0.1".parse().unwrap()));
        assert!(config.authorized("::1".parse().unwrap()));
        assert!(!config.authorized("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn custom_cidrs_parse_and_match() {
        let config = StatusConfig::parse("10.0.0.0/24").unwrap();
        assert!(config.authorized("10.0.0.5".parse().unwrap()));
        assert!(!config.authorized("192.0.2.1".parse().unwrap()));
    }
}
