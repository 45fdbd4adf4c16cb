use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use simple_dns::{rdata::RData, Name, Packet};

/// Address family of the addresses in a [`HostRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4 addresses, 4 bytes each
    Inet,
    /// IPv6 addresses, 16 bytes each
    Inet6,
}

impl AddressFamily {
    /// Length in bytes of one address of this family
    pub fn address_length(&self) -> usize {
        match self {
            AddressFamily::Inet => 4,
            AddressFamily::Inet6 => 16,
        }
    }

    fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }
}

/// Result of a successful resolution
///
/// Holds only owned data, nothing borrows from the response that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    name: String,
    aliases: Vec<String>,
    family: AddressFamily,
    addresses: Vec<IpAddr>,
}

impl HostRecord {
    /// Canonical name of the host
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names that lead to the canonical name through CNAME records
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Address family of every address in this record
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Length in bytes of each address
    pub fn address_length(&self) -> usize {
        self.family.address_length()
    }

    /// Addresses in the order the nameserver returned them, never empty
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Addresses as network order bytes, each [`address_length`](Self::address_length) long
    pub fn raw_addresses(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.addresses.iter().map(|address| match address {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        })
    }

    /// Copies the host information for `query_name` out of an answer packet.
    ///
    /// CNAME records are followed starting at `query_name`, every name visited before the last
    /// one becomes an alias. Returns `None` when no address for the final name is present.
    pub(crate) fn from_answer(query_name: &str, packet: &Packet) -> Option<Self> {
        let mut canonical = query_name.trim_end_matches('.').to_string();
        let mut aliases = Vec::new();

        // Bounded by the answer count, so a CNAME loop can't spin forever
        for _ in 0..packet.answers.len() {
            let target = packet.answers.iter().find_map(|answer| match &answer.rdata {
                RData::CNAME(cname) if same_name(&answer.name, &canonical) => {
                    Some(cname.0.to_string())
                }
                _ => None,
            });

            match target {
                Some(target) => {
                    log::trace!("following alias {} -> {}", canonical, target);
                    aliases.push(std::mem::replace(&mut canonical, target));
                }
                None => break,
            }
        }

        let mut addresses: Vec<IpAddr> = Vec::new();
        for answer in packet.answers.iter() {
            if !same_name(&answer.name, &canonical) {
                continue;
            }

            let address = match &answer.rdata {
                RData::A(a) => IpAddr::V4(Ipv4Addr::from(a.address)),
                RData::AAAA(aaaa) => IpAddr::V6(Ipv6Addr::from(aaaa.address)),
                _ => continue,
            };

            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        let family = AddressFamily::of(addresses.first()?);
        addresses.retain(|address| AddressFamily::of(address) == family);

        Some(Self {
            name: canonical,
            aliases,
            family,
            addresses,
        })
    }
}

fn same_name(name: &Name, other: &str) -> bool {
    name.to_string().eq_ignore_ascii_case(other.trim_end_matches('.'))
}
