//! Picking the primary module out of a package's module files.

use tracing::warn;

use super::GrammarModule;

const PACKAGE_PREFIX: &str = "tree-sitter-";

/// Logical name of a module file: `tree-sitter-foo-bar.wasm` -> `foo-bar`.
pub fn derive_module_name(file_name: &str) -> String {
    let stem = file_name.strip_prefix(PACKAGE_PREFIX).unwrap_or(file_name);
    match stem.rsplit_once('.') {
        Some((name, _ext)) => name.to_string(),
        None => stem.to_string(),
    }
}

/// Split `modules` into the one whose derived name equals `name` and the rest.
///
/// Only the first matching module is primary. Later modules deriving the same
/// name are dropped, so no extension shares the container's name.
pub fn split_primary(
    name: &str,
    modules: Vec<GrammarModule>,
) -> (Option<GrammarModule>, Vec<GrammarModule>) {
    let mut primary: Option<GrammarModule> = None;
    let mut rest = Vec::new();
    for module in modules {
        if module.name != name {
            rest.push(module);
            continue;
        }
        match &primary {
            None => primary = Some(module),
            Some(kept) => warn!(
                grammar = %name,
                kept = %kept.file_name,
                ignored = %module.file_name,
                "Ambiguous primary module"
            ),
        }
    }
    (primary, rest)
}
