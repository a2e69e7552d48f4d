//! Import normalization for submitted function source.
//!
//! Submitted modules may reference host helpers under specifiers that
//! predate the current `host/*` namespace, or point straight at
//! host-internal modules. Rewriting substitutes the approved alias so
//! the source resolves against what the runtime actually exposes.
//! Unknown specifiers pass through untouched; this is best-effort
//! normalization, not enforcement.

/// Legacy or internal specifier -> approved equivalent. Targets must
/// never appear as keys, which keeps rewriting idempotent.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("utils", "host/utils"),
    ("utils/misc", "host/utils"),
    ("internal/db", "host/store"),
    ("internal/config", "host/config"),
    ("kernel/api", "host/api"),
];

pub struct ImportRewriter {
    aliases: Vec<(String, String)>,
}

impl Default for ImportRewriter {
    fn default() -> Self {
        Self::with_aliases(
            DEFAULT_ALIASES
                .iter()
                .map(|(from, to)| ((*from).to_string(), (*to).to_string())),
        )
    }
}

impl ImportRewriter {
    pub fn with_aliases(aliases: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            aliases: aliases.into_iter().collect(),
        }
    }

    /// Rewrite every import/require statement whose specifier matches a
    /// known alias. Never fails.
    pub fn rewrite(&self, source: &str) -> String {
        let mut out = source.to_string();
        for (from, to) in &self.aliases {
            for (open, close) in [("'", "'"), ("\"", "\"")] {
                let quoted_from = format!("{open}{from}{close}");
                let quoted_to = format!("{open}{to}{close}");
                out = out.replace(
                    &format!("from {quoted_from}"),
                    &format!("from {quoted_to}"),
                );
                out = out.replace(
                    &format!("require({quoted_from})"),
                    &format!("require({quoted_to})"),
                );
                out = out.replace(
                    &format!("import {quoted_from}"),
                    &format!("import {quoted_to}"),
                );
            }
        }
        out
    }
}
