//! Parser registry membership.
//!
//! The field parsers live downstream; detection only needs to know whether a
//! key has one, so the registry is a membership test and nothing more.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Keys with a field parser in the original parser table.
const BUILTIN_KEYS: &[&str] = &[
    "GARANTI",
    "GARANTI_FAST",
    "GARANTI_HAVALE",
    "ENPARA",
    "AKBANK",
    "DENIZBANK",
    "YAPIKREDI",
    "YAPIKREDI_FAST",
    "YAPIKREDI_HAVALE",
    "KuveytTurk",
    "KUVEYT_TURK",
    "KUVEYT_TURK_EN",
    "KUVEYT_TURK_TR",
    "ZIRAAT",
    "ZIRAAT_FAST",
    "ZIRAAT_HAVALE",
    "ISBANK",
    "TOM",
    "TOMBANK",
    "TEB",
    "PTT",
    "PTTBANK",
    "TURKIYEFINANS",
    "TURKIYE_FINANS",
    "VAKIFKATILIM",
    "VAKIF_KATILIM",
    "VAKIFBANK",
    "HALKBANK",
    "ING",
    "QNB",
];

/// Membership test against the set of parser keys.
pub trait ParserRegistry: Send + Sync {
    fn contains(&self, key: &str) -> bool;
}

impl ParserRegistry for HashSet<String> {
    fn contains(&self, key: &str) -> bool {
        HashSet::contains(self, key)
    }
}

/// Registry backed by a fixed key set.
#[derive(Debug, Clone)]
pub struct KnownParsers {
    keys: HashSet<String>,
}

impl KnownParsers {
    pub fn builtin() -> Self {
        Self {
            keys: BUILTIN_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Load a JSON array of keys.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parser registry: {:?}", path))?;
        let keys: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse parser registry: {:?}", path))?;

        info!("Loaded {} parser keys from {:?}", keys.len(), path);
        Ok(Self {
            keys: keys.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ParserRegistry for KnownParsers {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Stand-in when the registry could not be built: nothing is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRegistry;

impl ParserRegistry for UnavailableRegistry {
    fn contains(&self, _key: &str) -> bool {
        false
    }
}

/// Build the registry named by `path` (or the built-in one). A failed load
/// degrades to [`UnavailableRegistry`] instead of aborting startup.
pub fn open(path: Option<&Path>) -> Box<dyn ParserRegistry> {
    match path {
        None => Box::new(KnownParsers::builtin()),
        Some(p) => match KnownParsers::load_from_file(p) {
            Ok(known) => Box::new(known),
            Err(e) => {
                warn!("Parser registry unavailable, treating every key as unregistered: {:#}", e);
                Box::new(UnavailableRegistry)
            }
        },
    }
}
