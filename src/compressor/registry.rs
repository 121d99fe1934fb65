//! Process-wide compressor registry.
//!
//! String-keyed construction lets the training driver ship a compressor
//! *choice* over the wire during session setup without compiling the list
//! of schemes into the call site. The global table is built once behind a
//! `OnceLock` and is read-only afterwards, so lookups take no lock.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{BitgradError, Result};

use super::{
    Compressor, OneBitCompressor, OneBitCompressorV2, OneBitCompressorV2Fused, TwoBitCompressor,
    TwoBitCompressorV2,
};

/// Constructor for a fresh, uninitialized compressor instance.
pub type Factory = fn() -> Box<dyn Compressor>;

/// Name → factory table.
pub struct Registry {
    entries: HashMap<&'static str, Factory>,
}

impl Registry {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entry.
    ///
    /// # Panics
    /// Registration happens at process start and failures are programmer
    /// errors: an empty name, a duplicate name, or a factory whose product
    /// reports a different type string all panic.
    pub fn register(&mut self, name: &'static str, factory: Factory) {
        assert!(!name.is_empty(), "compressor name must not be empty");
        let type_string = factory().type_string();
        assert_eq!(
            name, type_string,
            "register name and type string mismatch: name={name:?} but type string={type_string:?}"
        );
        let prev = self.entries.insert(name, factory);
        assert!(prev.is_none(), "compressor {name:?} is already registered");
        tracing::debug!(name, "registered compressor");
    }

    /// Construct a fresh instance of the named scheme.
    pub fn create(&self, name: &str) -> Result<Box<dyn Compressor>> {
        match self.entries.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(BitgradError::UnknownCompressor {
                name: name.to_string(),
            }),
        }
    }

    /// Whether a scheme is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted. For diagnostics and error messages.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// The process-wide registry with the built-in schemes.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let mut registry = Registry::new();
            registry.register("OneBitCompressor", || -> Box<dyn Compressor> {
                Box::new(OneBitCompressor::default())
            });
            registry.register("OneBitCompressorV2", || -> Box<dyn Compressor> {
                Box::new(OneBitCompressorV2::default())
            });
            registry.register("OneBitCompressorV2Fused", || -> Box<dyn Compressor> {
                Box::new(OneBitCompressorV2Fused::default())
            });
            registry.register("TwoBitCompressor", || -> Box<dyn Compressor> {
                Box::new(TwoBitCompressor::default())
            });
            registry.register("TwoBitCompressorV2", || -> Box<dyn Compressor> {
                Box::new(TwoBitCompressorV2::default())
            });
            registry
        })
    }
}
