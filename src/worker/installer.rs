use url::Url;

use super::Outbound;
use crate::backend::RenderBackend;

/// A single dependency of the render program. Order matters: specs are
/// installed strictly in sequence because later entries may assume earlier
/// ones are already importable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    /// Plain registry identifier, resolved by the backend's package index.
    Registry(String),
    /// Direct archive URL (a wheel-style bundle).
    ArchiveUrl(String),
}

impl PackageSpec {
    /// Classify a raw requirement string the way the host configuration
    /// writes them: anything with a scheme is an archive, the rest are
    /// registry names.
    pub fn from_requirement(requirement: &str) -> Self {
        if requirement.contains("://") {
            Self::ArchiveUrl(requirement.to_string())
        } else {
            Self::Registry(requirement.to_string())
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Registry(name) | Self::ArchiveUrl(name) => name,
        }
    }

    /// Name used in status reporting. Archive URLs reduce to the final path
    /// segment up to its first hyphen (`.../name-1.2.3-any.whl` → `name`);
    /// registry specs report their identifier as-is.
    pub fn display_name(&self) -> String {
        match self {
            Self::Registry(name) => name.clone(),
            Self::ArchiveUrl(raw) => archive_display_name(raw),
        }
    }
}

fn archive_display_name(raw: &str) -> String {
    let segment = match Url::parse(raw) {
        Ok(url) => url
            .path_segments()
            .and_then(|segments| segments.last().map(str::to_owned))
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.rsplit('/').next().unwrap_or(raw).to_string(),
    };
    segment
        .split('-')
        .next()
        .unwrap_or(segment.as_str())
        .to_string()
}

/// Install every spec in order, one attempt each. A failed install is logged
/// and reported as a status line, then the next spec is tried anyway: a
/// missing optional dependency must not abort bootstrap. Returns how many
/// specs installed cleanly.
pub async fn install_all<B: RenderBackend>(
    backend: &mut B,
    specs: &[PackageSpec],
    outbound: &Outbound,
) -> usize {
    let mut installed = 0;
    for spec in specs {
        let name = spec.display_name();
        outbound.status(format!("installing {name}"));
        match backend.install(spec).await {
            Ok(()) => installed += 1,
            Err(err) => {
                tracing::error!(
                    target = "worker",
                    package = %name,
                    error = %err,
                    "package install failed"
                );
                outbound.status(format!("error installing {name}"));
            }
        }
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_specs_reduce_to_the_leading_name_segment() {
        let spec =
            PackageSpec::from_requirement("https://host/path/name-1.2.3-suffix.whl");
        assert_eq!(spec, PackageSpec::ArchiveUrl("https://host/path/name-1.2.3-suffix.whl".into()));
        assert_eq!(spec.display_name(), "name");
    }

    #[test]
    fn registry_specs_report_their_identifier() {
        let spec = PackageSpec::from_requirement("networkx");
        assert_eq!(spec, PackageSpec::Registry("networkx".into()));
        assert_eq!(spec.display_name(), "networkx");
    }

    #[test]
    fn malformed_archive_urls_still_derive_a_name() {
        let spec = PackageSpec::ArchiveUrl("not a url/bundle-0.1.whl".into());
        assert_eq!(spec.display_name(), "bundle");
    }
}
