use crate::metrics::global;
use crate::resolver::NameResolver;
use log::warn;
use moka::sync::Cache;
use std::ffi::CStr;
use std::net::IpAddr;
use std::time::Duration;
use std::{mem, ptr};

/// Large enough for any fully qualified name, matches NI_MAXHOST
const MAX_HOST_LEN: usize = 1025;

type Lookup = dyn Fn(IpAddr) -> Result<Option<String>, String> + Send + Sync;

/// Reverse dns with a ttl cache in front. Addresses without a name
/// are cached as empty, failed lookups are retried next time
pub struct DnsCache {
    cache: Cache<IpAddr, String>,
    lookup: Box<Lookup>,
}

impl DnsCache {
    pub fn new(ttl: Duration, size: u64) -> Self {
        Self::with_lookup(ttl, size, reverse_lookup)
    }

    fn with_lookup<F>(ttl: Duration, size: u64, lookup: F) -> Self
    where
        F: Fn(IpAddr) -> Result<Option<String>, String> + Send + Sync + 'static,
    {
        Self {
            cache: Cache::builder().max_capacity(size).time_to_live(ttl).build(),
            lookup: Box::new(lookup),
        }
    }
}

impl NameResolver for DnsCache {
    fn resolve(&self, ip: IpAddr) -> String {
        if let Some(name) = self.cache.get(&ip) {
            global::record_dns_call("hit");
            return name;
        }
        global::record_dns_call("miss");

        match (self.lookup)(ip) {
            Ok(name) => {
                let name = name.unwrap_or_default();
                self.cache.insert(ip, name.clone());
                name
            }
            Err(e) => {
                global::record_dns_error();
                warn!("Could not resolve {} addr: {}", ip, e);
                String::new()
            }
        }
    }
}

/// Blocking `getnameinfo` lookup. `Ok(None)` when the resolver
/// answered but knows no name for the address
fn reverse_lookup(ip: IpAddr) -> Result<Option<String>, String> {
    let mut host = [0 as libc::c_char; MAX_HOST_LEN];

    let rc = match ip {
        IpAddr::V4(v4) => {
            // SAFETY: sockaddr_in is plain data, all zero is a valid value
            let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.octets()),
            };

            // SAFETY: sa and host outlive the call and their lengths are passed along
            unsafe {
                libc::getnameinfo(
                    &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        IpAddr::V6(v6) => {
            // SAFETY: sockaddr_in6 is plain data, all zero is a valid value
            let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_addr = libc::in6_addr {
                s6_addr: v6.octets(),
            };

            // SAFETY: as above
            unsafe {
                libc::getnameinfo(
                    &sa as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };

    match rc {
        0 => {
            // SAFETY: getnameinfo nul terminates host on success
            let name = unsafe { CStr::from_ptr(host.as_ptr()) };
            Ok(Some(name.to_string_lossy().into_owned()))
        }
        libc::EAI_NONAME => Ok(None),
        code => {
            // SAFETY: gai_strerror returns a static nul terminated string
            let reason = unsafe { CStr::from_ptr(libc::gai_strerror(code)) };
            Err(reason.to_string_lossy().into_owned())
        }
    }
}
