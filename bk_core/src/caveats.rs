use crate::formula::FormulaSpec;
use crate::roots::{InstallRoots, TemplateVars};
use crate::service::{DescriptorFormat, descriptor_file_name, descriptor_path};

/// Render a formula's post-install guidance for the given roots.
///
/// Besides the usual install placeholders, caveats may use `{service_path}`
/// and `{service_file}` for the generated service descriptor.
pub fn render_caveats(spec: &FormulaSpec, roots: &InstallRoots, format: DescriptorFormat) -> Option<String> {
    let template = spec.caveats.as_deref()?;

    let version = spec
        .default_variant()
        .and_then(|v| v.effective_version())
        .unwrap_or_default();
    let service_path = descriptor_path(roots, &spec.name, format);

    let vars = TemplateVars::for_install(&spec.name, &version, roots)
        .with("service_path", service_path.to_string_lossy())
        .with("service_file", descriptor_file_name(&service_path));

    let text = vars.render(&unindent(template));
    let text = text.trim_matches('\n');
    if text.trim().is_empty() {
        None
    } else {
        Some(format!("{}\n", text))
    }
}

/// Strip the common leading indentation, like a squiggly heredoc.
fn unindent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Checksum, SourceVariant};
    use std::path::Path;

    fn spec(caveats: Option<&str>) -> FormulaSpec {
        FormulaSpec {
            name: "nginx".to_string(),
            variants: vec![SourceVariant {
                id: "stable".to_string(),
                url: "http://nginx.org/download/nginx-1.0.14.tar.gz".to_string(),
                checksum: Checksum::sha256("aa"),
                version: None,
                default: true,
            }],
            caveats: caveats.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn no_caveats_renders_nothing() {
        let roots = InstallRoots::under_prefix(Path::new("/usr/local"));
        assert_eq!(render_caveats(&spec(None), &roots, DescriptorFormat::Launchd), None);
        assert_eq!(render_caveats(&spec(Some("  \n ")), &roots, DescriptorFormat::Launchd), None);
    }

    #[test]
    fn caveats_reference_service_descriptor() {
        let roots = InstallRoots::under_prefix(Path::new("/usr/local"));
        let text = "
    The default port is 8080.

    To start {name} at login:
      cp {service_path} ~/Library/LaunchAgents/
      launchctl load -w ~/Library/LaunchAgents/{service_file}
";
        let rendered = render_caveats(&spec(Some(text)), &roots, DescriptorFormat::Launchd).unwrap();

        assert!(rendered.starts_with("The default port is 8080.\n"));
        assert!(rendered.contains("To start nginx at login:"));
        assert!(rendered.contains("  cp /usr/local/org.brewkit.nginx.plist ~/Library/LaunchAgents/"));
        assert!(rendered.contains("launchctl load -w ~/Library/LaunchAgents/org.brewkit.nginx.plist"));
        assert!(rendered.ends_with("org.brewkit.nginx.plist\n"));
    }

    #[test]
    fn unindent_keeps_relative_indentation() {
        assert_eq!(unindent("    a\n      b\n\n    c"), "a\n  b\n\nc");
    }
}
