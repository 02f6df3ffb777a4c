//! The compiled pattern table

use indexmap::IndexMap;

use std::{
    collections::HashMap,
    sync::Arc,
};

use crate::{
    error::Error,
    handler::RouteHandler,
    routing::RoutePattern,
};

struct RouteEntry {
    pattern: RoutePattern,
    handler: Arc<RouteHandler>,
}

/// The compiled route-template → handler map.
///
/// Static patterns are indexed for O(1) exact lookup; dynamic patterns are
/// scanned in insertion order and the first match wins. Inserting a pattern
/// whose segment list equals an existing one replaces that entry
/// (last-write-wins), so the invariant that all stored segment lists are
/// distinct holds by construction.
#[derive(Default)]
pub struct RouteTable {
    /// Name-erased segment shape → entry, in insertion order.
    routes: IndexMap<String, RouteEntry>,
    /// Decoded literal path → shape key, for the static fast path.
    static_index: HashMap<String, String>,
}

/// A successful resolution: the handler plus bound parameters.
#[derive(Clone)]
pub struct RouteMatch {
    /// The matched route's handler record.
    pub handler: Arc<RouteHandler>,
    /// Parameters bound from the request path.
    pub params: HashMap<String, String>,
    /// The matched pattern's template.
    pub template: String,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, replacing any existing pattern with the same segment
    /// list.
    pub fn insert(&mut self, pattern: RoutePattern, handler: RouteHandler) -> Result<(), Error> {
        let shape = pattern.shape();
        if pattern.is_static() {
            self.static_index
                .insert(pattern.template().to_owned(), shape.clone());
        }
        let entry = RouteEntry { pattern, handler: Arc::new(handler) };
        self.routes.insert(shape, entry);
        Ok(())
    }

    /// Adds a route derived from a scanned handler file path.
    pub fn insert_file_path(&mut self, path: &str, handler: RouteHandler) -> Result<(), Error> {
        self.insert(RoutePattern::from_file_path(path)?, handler)
    }

    /// Resolves a decoded request path. Deterministic and side-effect-free.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let normalized = if segments.is_empty() {
            "/".to_owned()
        } else {
            segments.iter().fold(String::new(), |mut acc, s| {
                acc.push('/');
                acc.push_str(s);
                acc
            })
        };

        if let Some(shape) = self.static_index.get(&normalized) {
            if let Some(entry) = self.routes.get(shape) {
                return Some(RouteMatch {
                    handler: entry.handler.clone(),
                    params: HashMap::new(),
                    template: entry.pattern.template().to_owned(),
                });
            }
        }

        self.routes
            .values()
            .filter(|entry| !entry.pattern.is_static())
            .find_map(|entry| {
                entry.pattern.matches(&segments).map(|params| RouteMatch {
                    handler: entry.handler.clone(),
                    params: params.into_iter().collect(),
                    template: entry.pattern.template().to_owned(),
                })
            })
    }

    /// Number of stored patterns.
    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Templates in table order.
    pub fn templates(&self) -> Vec<String> {
        self.routes
            .values()
            .map(|entry| entry.pattern.template().to_owned())
            .collect()
    }
}
