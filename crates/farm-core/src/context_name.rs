//! Mapping between deployment target names and on-disk base names.
//!
//! A target named `/shop/admin##2` lives on disk as `shop#admin##2` (plus an
//! archive suffix, a directory, or a `.xml` descriptor). The empty path is the
//! root target and uses the base name `ROOT`.

const ROOT_NAME: &str = "ROOT";
const VERSION_MARKER: &str = "##";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextName {
    base_name: String,
    path: String,
    version: String,
    name: String,
}

impl ContextName {
    /// Parse a target name, path or base name. Nothing is stripped.
    pub fn new(name: &str) -> Self {
        Self::parse(name, None)
    }

    /// Parse a file name, stripping `.<archive_suffix>` or `.xml`.
    pub fn from_file_name(file_name: &str, archive_suffix: &str) -> Self {
        Self::parse(file_name, Some(archive_suffix))
    }

    fn parse(raw: &str, strip_suffix: Option<&str>) -> Self {
        let mut base = raw.strip_prefix('/').unwrap_or(raw).replace('/', "#");
        if base.is_empty() || base.starts_with(VERSION_MARKER) {
            base = format!("{ROOT_NAME}{base}");
        }
        if let Some(suffix) = strip_suffix {
            base = strip_extension(&base, suffix)
                .or_else(|| strip_extension(&base, "xml"))
                .unwrap_or(base);
        }

        let (stem, version) = match base.find(VERSION_MARKER) {
            Some(idx) => (
                base[..idx].to_string(),
                base[idx + VERSION_MARKER.len()..].to_string(),
            ),
            None => (base.clone(), String::new()),
        };

        let path = if stem == ROOT_NAME {
            String::new()
        } else {
            format!("/{}", stem.replace('#', "/"))
        };
        let name = if base.contains(VERSION_MARKER) {
            format!("{path}{VERSION_MARKER}{version}")
        } else {
            path.clone()
        };

        Self {
            base_name: base,
            path,
            version,
            name,
        }
    }

    /// Name the target is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File-system safe name: `<base>.war`, `<base>/`, `<base>.xml`.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl std::fmt::Display for ContextName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

fn strip_extension(name: &str, suffix: &str) -> Option<String> {
    let dotted = format!(".{}", suffix.to_ascii_lowercase());
    if name.len() > dotted.len() && name.to_ascii_lowercase().ends_with(&dotted) {
        Some(name[..name.len() - dotted.len()].to_string())
    } else {
        None
    }
}
