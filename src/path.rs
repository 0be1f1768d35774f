//! Locating referenced templates: namespaces and relative paths.

use indexmap::IndexMap;

/// Resolve a template reference (`extends`, `include`, ...) to a locator.
///
/// `@ns/file` and `ns::file` expand through `namespaces`. References that
/// start with `./` or `../` are relative to the directory of `base`.
/// Everything else is used as given.
pub fn resolve(base: Option<&str>, reference: &str, namespaces: &IndexMap<String, String>) -> String {
    if let Some(path) = expand_namespace(reference, namespaces) {
        return path;
    }
    if !reference.starts_with("./") && !reference.starts_with("../") {
        return reference.to_string();
    }

    let mut parts: Vec<&str> = match base {
        Some(base) => {
            let mut parts: Vec<&str> = base.split('/').collect();
            // Drop the file name.
            parts.pop();
            parts
        }
        None => Vec::new(),
    };
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    parts.join("/")
}

fn expand_namespace(reference: &str, namespaces: &IndexMap<String, String>) -> Option<String> {
    let (name, rest) = match reference.strip_prefix('@') {
        Some(tail) => tail.split_once('/')?,
        None => reference.split_once("::")?,
    };
    let prefix = namespaces.get(name)?;
    Some(format!("{}/{}", prefix.trim_end_matches('/'), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespaces() -> IndexMap<String, String> {
        let mut ns = IndexMap::new();
        ns.insert("layouts".to_string(), "views/layouts/".to_string());
        ns.insert("mail".to_string(), "views/mail".to_string());
        ns
    }

    #[test]
    fn namespaces_expand_in_both_forms() {
        assert_eq!(resolve(None, "@layouts/base.twig", &namespaces()), "views/layouts/base.twig");
        assert_eq!(resolve(None, "mail::welcome.twig", &namespaces()), "views/mail/welcome.twig");
    }

    #[test]
    fn unknown_namespace_is_left_alone() {
        assert_eq!(resolve(None, "@other/x.twig", &namespaces()), "@other/x.twig");
    }

    #[test]
    fn relative_to_base_directory() {
        let base = Some("views/pages/home.twig");
        assert_eq!(resolve(base, "./part.twig", &IndexMap::new()), "views/pages/part.twig");
        assert_eq!(resolve(base, "../base.twig", &IndexMap::new()), "views/base.twig");
        assert_eq!(resolve(Some("home.twig"), "./part.twig", &IndexMap::new()), "part.twig");
    }

    #[test]
    fn plain_names_are_used_as_given() {
        let base = Some("views/pages/home.twig");
        assert_eq!(resolve(base, "base.twig", &IndexMap::new()), "base.twig");
    }
}
