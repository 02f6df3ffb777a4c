//! Pattern-based route resolution
//!
//! Route templates are compiled into a [`RouteTable`]; the [`Resolver`]
//! serves lookups from an immutable snapshot of that table and swaps the
//! whole snapshot on reload, so readers never observe a partial merge.

use percent_encoding::percent_decode_str;

use std::sync::{Arc, RwLock};

pub use pattern::RoutePattern;
pub use table::{RouteMatch, RouteTable};

pub mod pattern;
pub mod table;

/// Resolves request paths against the installed pattern table.
pub struct Resolver {
    table: RwLock<Arc<RouteTable>>,
}

impl Resolver {
    /// Creates a resolver serving `table`.
    pub(crate) fn new(table: RouteTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Matches `path` against the current table snapshot.
    ///
    /// The path is percent-decoded once before matching; segments compare
    /// byte-wise after that.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        self.snapshot().resolve(&decoded)
    }

    /// Atomically replaces the pattern table.
    ///
    /// In-flight requests that already resolved keep their handler
    /// reference from the previous snapshot.
    pub fn install(&self, table: RouteTable) {
        let table = Arc::new(table);
        if let Ok(mut current) = self.table.write() {
            *current = table;
        }
    }

    /// The current table snapshot.
    pub(crate) fn snapshot(&self) -> Arc<RouteTable> {
        self.table
            .read()
            .map(|table| table.clone())
            .unwrap_or_default()
    }

    /// Templates of the installed patterns, in table order.
    pub fn templates(&self) -> Vec<String> {
        self.snapshot().templates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RouteHandler;

    fn table_with(templates: &[&str]) -> RouteTable {
        let mut table = RouteTable::new();
        for template in templates {
            table
                .insert(RoutePattern::parse(template).unwrap(), RouteHandler::new())
                .unwrap();
        }
        table
    }

    #[test]
    fn it_resolves_through_snapshot() {
        let resolver = Resolver::new(table_with(&["/api/users/:id"]));

        let matched = resolver.resolve("/api/users/42").unwrap();

        assert_eq!(matched.params["id"], "42");
    }

    #[test]
    fn it_percent_decodes_before_matching() {
        let resolver = Resolver::new(table_with(&["/api/files/:name"]));

        let matched = resolver.resolve("/api/files/a%20b").unwrap();

        assert_eq!(matched.params["name"], "a b");
    }

    #[test]
    fn it_swaps_tables_atomically() {
        let resolver = Resolver::new(table_with(&["/api/old"]));
        assert!(resolver.resolve("/api/old").is_some());

        resolver.install(table_with(&["/api/new"]));

        assert!(resolver.resolve("/api/old").is_none());
        assert!(resolver.resolve("/api/new").is_some());
    }

    #[test]
    fn it_keeps_resolved_handler_across_reload() {
        let resolver = Resolver::new(table_with(&["/api/users/:id"]));
        let matched = resolver.resolve("/api/users/1").unwrap();

        resolver.install(RouteTable::new());

        // The handler reference obtained before the swap stays usable.
        assert_eq!(matched.template, "/api/users/:id");
    }
}
