//! inet and cidr codecs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::protocol::codec::as_utf8;
use crate::value::Value;

/// Address family bytes used by the server (not the socket API values).
const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

fn parse_addr_prefix(s: &str) -> Result<(IpAddr, Option<u8>)> {
    let (addr_str, prefix) = match s.split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u8 = prefix
                .parse()
                .map_err(|e| Error::Decode(format!("invalid network prefix: {e}")))?;
            (addr, Some(prefix))
        }
        None => (s, None),
    };
    let addr: IpAddr = addr_str
        .parse()
        .map_err(|e| Error::Decode(format!("invalid network address: {e}")))?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if let Some(prefix) = prefix {
        if prefix > max {
            return Err(Error::Decode(format!("invalid network prefix: {prefix}")));
        }
    }
    Ok((addr, prefix))
}

pub fn txt_inet(raw: &[u8]) -> Result<Value> {
    let (addr, prefix) = parse_addr_prefix(as_utf8(raw)?)?;
    let full = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    Ok(Value::Inet {
        addr,
        prefix: prefix.unwrap_or(full),
    })
}

pub fn txt_cidr(raw: &[u8]) -> Result<Value> {
    let (addr, prefix) = parse_addr_prefix(as_utf8(raw)?)?;
    let full = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    Ok(Value::Cidr {
        addr,
        prefix: prefix.unwrap_or(full),
    })
}

/// Binary layout: `(family:u8, prefix:u8, is_cidr:u8, size:u8, addr bytes)`.
fn bin_ip(raw: &[u8], expect_cidr: bool) -> Result<(IpAddr, u8)> {
    let [family, prefix, is_cidr, size, addr @ ..] = raw else {
        return Err(Error::Decode("invalid network value".into()));
    };
    if (*is_cidr != 0) != expect_cidr {
        return Err(Error::Decode("wrong value for cidr flag".into()));
    }
    if *size as usize != addr.len() {
        return Err(Error::Decode("invalid network value length".into()));
    }
    let addr = match (*family, addr.len()) {
        (PGSQL_AF_INET, 4) => {
            if *prefix > 32 {
                return Err(Error::Decode("invalid IPv4 prefix".into()));
            }
            IpAddr::V4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]))
        }
        (PGSQL_AF_INET6, 16) => {
            if *prefix > 128 {
                return Err(Error::Decode("invalid IPv6 prefix".into()));
            }
            let octets: [u8; 16] = addr.try_into().expect("length checked");
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        (PGSQL_AF_INET, _) => return Err(Error::Decode("invalid IPv4 value".into())),
        (PGSQL_AF_INET6, _) => return Err(Error::Decode("invalid IPv6 value".into())),
        _ => return Err(Error::Decode("invalid address family".into())),
    };
    Ok((addr, *prefix))
}

pub fn bin_inet(raw: &[u8]) -> Result<Value> {
    let (addr, prefix) = bin_ip(raw, false)?;
    Ok(Value::Inet { addr, prefix })
}

pub fn bin_cidr(raw: &[u8]) -> Result<Value> {
    let (addr, prefix) = bin_ip(raw, true)?;
    Ok(Value::Cidr { addr, prefix })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txt_inet() {
        assert_eq!(
            txt_inet(b"192.168.0.1").unwrap(),
            Value::Inet {
                addr: "192.168.0.1".parse().unwrap(),
                prefix: 32
            }
        );
        assert_eq!(
            txt_inet(b"10.0.0.0/8").unwrap(),
            Value::Inet {
                addr: "10.0.0.0".parse().unwrap(),
                prefix: 8
            }
        );
        assert!(txt_inet(b"10.0.0.0/33").is_err());
    }

    #[test]
    fn test_bin_inet_v4() {
        let raw = [PGSQL_AF_INET, 24, 0, 4, 192, 168, 0, 1];
        assert_eq!(
            bin_inet(&raw).unwrap(),
            Value::Inet {
                addr: "192.168.0.1".parse().unwrap(),
                prefix: 24
            }
        );
        // cidr flag mismatch
        assert!(bin_cidr(&raw).is_err());
    }

    #[test]
    fn test_bin_cidr_v6() {
        let mut raw = vec![PGSQL_AF_INET6, 64, 1, 16];
        raw.extend_from_slice(&"2001:db8::".parse::<Ipv6Addr>().unwrap().octets());
        assert_eq!(
            bin_cidr(&raw).unwrap(),
            Value::Cidr {
                addr: "2001:db8::".parse().unwrap(),
                prefix: 64
            }
        );
    }

    #[test]
    fn test_bin_inet_bad_family() {
        assert!(bin_inet(&[9, 0, 0, 4, 1, 2, 3, 4]).is_err());
    }
}
