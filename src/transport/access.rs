use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::utils::{Error, Result};

/// A mutable set of IP addresses used as an allow or deny list.
#[derive(Debug, Default)]
pub struct AccessControlList {
    addresses: Mutex<HashSet<IpAddr>>,
}

impl AccessControlList {
    /// Build a list from textual addresses. Fails on the first address that
    /// does not parse.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self> {
        let list = Self::default();
        list.add(addresses)?;
        Ok(list)
    }

    fn state(&self) -> MutexGuard<'_, HashSet<IpAddr>> {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add every address; nothing is added if one of them is invalid.
    pub fn add<S: AsRef<str>>(&self, addresses: &[S]) -> Result<()> {
        let parsed = parse_all(addresses)?;
        self.state().extend(parsed);
        Ok(())
    }

    pub fn remove<S: AsRef<str>>(&self, addresses: &[S]) -> Result<()> {
        let parsed = parse_all(addresses)?;
        let mut state = self.state();
        for address in parsed {
            state.remove(&address);
        }
        Ok(())
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.state().contains(address)
    }

    pub fn is_empty(&self) -> bool {
        self.state().is_empty()
    }

    pub fn addresses(&self) -> Vec<IpAddr> {
        self.state().iter().copied().collect()
    }
}

fn parse_all<S: AsRef<str>>(addresses: &[S]) -> Result<Vec<IpAddr>> {
    addresses
        .iter()
        .map(|address| {
            address
                .as_ref()
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| Error::validation(format!("invalid ip address: {}", address.as_ref())))
        })
        .collect()
}

/// An address is accepted when it is not denied and the allow list is
/// either empty or contains it.
pub fn check(allow: &AccessControlList, deny: &AccessControlList, address: IpAddr) -> Result<()> {
    if deny.contains(&address) {
        return Err(Error::AccessDenied(address.to_string()));
    }
    if !allow.is_empty() && !allow.contains(&address) {
        return Err(Error::AccessDenied(address.to_string()));
    }
    Ok(())
}
