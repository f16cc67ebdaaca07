//! IP protocol number registry backed by the system protocol database.

use std::collections::BTreeMap;

use tracing::debug;

/// Mapping from protocol number to its canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolTable {
    entries: BTreeMap<u8, String>,
}

impl ProtocolTable {
    /// Ask `lookup` about every protocol number.
    pub fn from_lookup(mut lookup: impl FnMut(u8) -> Option<String>) -> Self {
        Self {
            entries: (0..=u8::MAX)
                .filter_map(|n| lookup(n).map(|name| (n, name)))
                .collect(),
        }
    }

    pub fn from_entries<S: Into<String>>(entries: impl IntoIterator<Item = (u8, S)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(n, name)| (n, name.into()))
                .collect(),
        }
    }

    /// Query the C library protocol database. A missing or empty database
    /// yields an empty table.
    pub fn system() -> Self {
        #[cfg(target_os = "linux")]
        let table = {
            let _guard = netdb::lock();
            Self::from_lookup(netdb::protocol_name)
        };
        #[cfg(not(target_os = "linux"))]
        let table = Self::default();

        debug!(known = table.len(), "loaded protocol database");
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_registered(&self, number: u8) -> bool {
        self.entries.contains_key(&number)
    }

    pub fn name(&self, number: u8) -> Option<&str> {
        self.entries.get(&number).map(String::as_str)
    }

    /// Lowest protocol number with no registry entry.
    pub fn first_unregistered(&self) -> Option<u8> {
        (0..=u8::MAX).find(|n| !self.is_registered(*n))
    }
}

#[cfg(target_os = "linux")]
mod netdb {
    use std::ffi::CStr;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    // getprotobynumber returns a pointer into static storage.
    static NETDB: Mutex<()> = Mutex::new(());

    pub(super) fn lock() -> MutexGuard<'static, ()> {
        NETDB.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller must hold [`lock`].
    pub(super) fn protocol_name(number: u8) -> Option<String> {
        let entry = unsafe { libc::getprotobynumber(libc::c_int::from(number)) };
        if entry.is_null() {
            return None;
        }
        let name = unsafe { (*entry).p_name };
        if name.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_gap_follows_registered_numbers() {
        let table = ProtocolTable::from_entries([(0, "ip"), (1, "icmp"), (2, "igmp"), (6, "tcp")]);
        assert_eq!(table.len(), 4);
        assert_eq!(table.name(6), Some("tcp"));
        assert!(!table.is_registered(3));
        assert_eq!(table.first_unregistered(), Some(3));
    }

    #[test]
    fn full_table_has_no_gap() {
        let table = ProtocolTable::from_lookup(|n| Some(format!("p{n}")));
        assert_eq!(table.len(), 256);
        assert_eq!(table.first_unregistered(), None);
    }

    #[test]
    fn empty_database_starts_at_zero() {
        let table = ProtocolTable::from_lookup(|_| None);
        assert!(table.is_empty());
        assert_eq!(table.first_unregistered(), Some(0));
        assert_eq!(ProtocolTable::default(), table);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_table_matches_getprotobynumber() {
        let table = ProtocolTable::system();
        let first_null = {
            let _guard = netdb::lock();
            (0..=u8::MAX).find(|n| netdb::protocol_name(*n).is_none())
        };
        assert_eq!(table.first_unregistered(), first_null);
        let _guard = netdb::lock();
        for n in 0..=u8::MAX {
            assert_eq!(table.name(n).map(str::to_owned), netdb::protocol_name(n), "protocol {n}");
        }
    }
}
