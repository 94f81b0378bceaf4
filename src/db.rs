use crate::constants::BUILTIN_OUI;
use crate::model::MacAddr;
use ::oui::OuiDatabase;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// OUI (Organizationally Unique Identifier) database for MAC address vendor lookup
pub mod oui {
    use super::*;

    /// Global OUI database instance, loaded lazily on first use
    static OUI_DB: OnceCell<Option<Arc<OuiDatabase>>> = OnceCell::new();

    /// MAC address vendor database with a per-prefix cache
    pub struct MacVendorDatabase {
        manuf_path: PathBuf,
        vendor_cache: HashMap<String, Option<String>>,
    }

    impl Default for MacVendorDatabase {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MacVendorDatabase {
        /// The Wireshark `manuf.txt` file is read on first lookup when
        /// present; otherwise the built-in table is used.
        pub fn new() -> Self {
            Self::with_manuf_path("manuf.txt")
        }

        pub fn with_manuf_path(path: impl Into<PathBuf>) -> Self {
            Self {
                manuf_path: path.into(),
                vendor_cache: HashMap::new(),
            }
        }

        /// Look up the vendor for a hardware address. Locally administered
        /// addresses have no registered vendor.
        pub fn lookup_vendor(&mut self, mac: &MacAddr) -> Option<String> {
            if mac.is_locally_administered() {
                return None;
            }

            let prefix = mac.oui_prefix().to_string();
            if let Some(cached) = self.vendor_cache.get(&prefix) {
                return cached.clone();
            }

            let vendor = self.query(mac);
            self.vendor_cache.insert(prefix, vendor.clone());
            vendor
        }

        fn query(&self, mac: &MacAddr) -> Option<String> {
            let db = OUI_DB
                .get_or_init(|| {
                    let loaded = OuiDatabase::new_from_file(&self.manuf_path)
                        .or_else(|_| {
                            tracing::debug!(
                                path = %self.manuf_path.display(),
                                "manuf file unavailable, using built-in OUI table"
                            );
                            OuiDatabase::new_from_str(BUILTIN_OUI)
                        });
                    match loaded {
                        Ok(db) => Some(Arc::new(db)),
                        Err(_) => {
                            tracing::warn!("OUI database could not be loaded");
                            None
                        }
                    }
                })
                .as_ref()?;

            let eui = mac.to_eui48()?;
            match db.query_by_mac(&eui) {
                Ok(Some(entry)) => entry
                    .name_long
                    .clone()
                    .or_else(|| Some(entry.name_short.clone()))
                    .filter(|v| !v.is_empty()),
                _ => None,
            }
        }
    }
}
