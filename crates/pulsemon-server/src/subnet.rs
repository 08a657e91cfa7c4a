use std::net::IpAddr;

/// A CIDR block the collector accepts source IPs from. Parsed once at
/// startup, consulted on every inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

impl std::str::FromStr for TrustedSubnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid CIDR '{s}': missing prefix"))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| format!("invalid CIDR '{s}': bad address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("invalid CIDR '{s}': bad prefix"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(format!("invalid CIDR '{s}': prefix > {max}"));
        }
        Ok(Self {
            network: mask(addr, prefix),
            prefix,
        })
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u32::MAX << (32 - u32::from(prefix)))
            };
            IpAddr::V4(masked.into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u128::MAX << (128 - u32::from(prefix)))
            };
            IpAddr::V6(masked.into())
        }
    }
}

impl TrustedSubnet {
    /// Whether `ip` falls inside the block. Addresses of the other family
    /// are never contained.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(ip, self.prefix) == self.network
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
