//! Service descriptor generation.
//!
//! A formula that declares a `service` block gets a descriptor file written
//! next to its prefix after a successful install. Two formats are supported:
//! - macOS: launchd property list
//! - everything else: systemd unit
//!
//! Loading the descriptor into a supervisor is left to the user (see caveats).

use std::path::{Path, PathBuf};

use crate::formula::ServiceSpec;
use crate::roots::{InstallRoots, TemplateVars};

/// Permissions of the written descriptor file.
pub const DESCRIPTOR_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Launchd,
    Systemd,
}

impl DescriptorFormat {
    /// The format the current platform's supervisor understands.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            DescriptorFormat::Launchd
        } else {
            DescriptorFormat::Systemd
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DescriptorFormat::Launchd => "plist",
            DescriptorFormat::Systemd => "service",
        }
    }
}

/// A fully rendered service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub label: String,
    pub user: String,
    pub program_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub run_at_load: bool,
    pub keep_alive: bool,
}

pub fn service_label(formula: &str) -> String {
    format!("org.brewkit.{}", formula)
}

/// Fixed location of a formula's descriptor: directly under the prefix.
pub fn descriptor_path(roots: &InstallRoots, formula: &str, format: DescriptorFormat) -> PathBuf {
    roots
        .prefix
        .join(format!("{}.{}", service_label(formula), format.extension()))
}

impl ServiceDescriptor {
    pub fn from_spec(formula: &str, spec: &ServiceSpec, vars: &TemplateVars, user: &str) -> Self {
        Self {
            label: service_label(formula),
            user: user.to_string(),
            program_args: spec.program_args.iter().map(|a| vars.render(a)).collect(),
            working_dir: spec.working_dir.as_ref().map(|d| PathBuf::from(vars.render(d))),
            run_at_load: spec.run_at_load,
            keep_alive: spec.keep_alive,
        }
    }

    pub fn render(&self, format: DescriptorFormat) -> String {
        match format {
            DescriptorFormat::Launchd => self.render_plist(),
            DescriptorFormat::Systemd => self.render_systemd(),
        }
    }

    fn render_plist(&self) -> String {
        let mut plist = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>RunAtLoad</key>
    <{run_at_load}/>
    <key>KeepAlive</key>
    <{keep_alive}/>
    <key>UserName</key>
    <string>{user}</string>
    <key>ProgramArguments</key>
    <array>"#,
            label = xml_escape(&self.label),
            run_at_load = self.run_at_load,
            keep_alive = self.keep_alive,
            user = xml_escape(&self.user),
        );

        for arg in &self.program_args {
            plist.push_str(&format!("\n        <string>{}</string>", xml_escape(arg)));
        }
        plist.push_str("\n    </array>\n");

        if let Some(ref wd) = self.working_dir {
            plist.push_str(&format!(
                "    <key>WorkingDirectory</key>\n    <string>{}</string>\n",
                xml_escape(&wd.to_string_lossy())
            ));
        }

        plist.push_str("</dict>\n</plist>\n");
        plist
    }

    fn render_systemd(&self) -> String {
        let exec: Vec<String> = self.program_args.iter().map(|a| systemd_quote(a)).collect();

        let mut unit = format!(
            "[Unit]\nDescription={label}\nAfter=network.target\n\n[Service]\nType=simple\nUser={user}\nExecStart={exec}\n",
            label = self.label,
            user = self.user,
            exec = exec.join(" "),
        );

        if let Some(ref wd) = self.working_dir {
            unit.push_str(&format!("WorkingDirectory={}\n", wd.display()));
        }

        if self.keep_alive {
            unit.push_str("Restart=always\n");
            unit.push_str("RestartSec=3\n");
        }

        unit.push_str("\n[Install]\n");
        if self.run_at_load {
            unit.push_str("WantedBy=default.target\n");
        }

        unit
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn systemd_quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == ';' || c == '\\') {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Descriptor file name as shown to users, e.g. `org.brewkit.nginx.plist`.
pub fn descriptor_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nginx_descriptor() -> ServiceDescriptor {
        let roots = InstallRoots::under_prefix(Path::new("/usr/local"));
        let vars = TemplateVars::for_install("nginx", "1.0.14", &roots);
        let spec = ServiceSpec {
            program_args: vec![
                "{prefix}/sbin/nginx".to_string(),
                "-g".to_string(),
                "daemon off;".to_string(),
            ],
            working_dir: Some("{prefix}".to_string()),
            run_at_load: true,
            keep_alive: true,
        };
        ServiceDescriptor::from_spec("nginx", &spec, &vars, "alice")
    }

    #[test]
    fn descriptor_path_is_under_prefix() {
        let roots = InstallRoots::under_prefix(Path::new("/usr/local"));
        assert_eq!(
            descriptor_path(&roots, "nginx", DescriptorFormat::Launchd),
            PathBuf::from("/usr/local/org.brewkit.nginx.plist")
        );
        assert_eq!(
            descriptor_path(&roots, "nginx", DescriptorFormat::Systemd),
            PathBuf::from("/usr/local/org.brewkit.nginx.service")
        );
    }

    #[test]
    fn from_spec_renders_templates() {
        let d = nginx_descriptor();
        assert_eq!(d.label, "org.brewkit.nginx");
        assert_eq!(d.program_args[0], "/usr/local/sbin/nginx");
        assert_eq!(d.working_dir, Some(PathBuf::from("/usr/local")));
    }

    #[test]
    fn plist_contains_required_keys() {
        let plist = nginx_descriptor().render(DescriptorFormat::Launchd);

        assert!(plist.starts_with("<?xml"));
        assert!(plist.contains("<string>org.brewkit.nginx</string>"));
        assert!(plist.contains("<key>RunAtLoad</key>\n    <true/>"));
        assert!(plist.contains("<key>KeepAlive</key>\n    <true/>"));
        assert!(plist.contains("<key>UserName</key>\n    <string>alice</string>"));
        assert!(plist.contains("<string>/usr/local/sbin/nginx</string>"));
        assert!(plist.contains("<string>daemon off;</string>"));
        assert!(plist.contains("<key>WorkingDirectory</key>\n    <string>/usr/local</string>"));
        assert!(plist.ends_with("</plist>\n"));
    }

    #[test]
    fn plist_escapes_xml() {
        let mut d = nginx_descriptor();
        d.program_args = vec!["a&b<c>".to_string()];
        let plist = d.render(DescriptorFormat::Launchd);
        assert!(plist.contains("<string>a&amp;b&lt;c&gt;</string>"));
    }

    #[test]
    fn systemd_unit_quotes_arguments() {
        let unit = nginx_descriptor().render(DescriptorFormat::Systemd);

        assert!(unit.contains("User=alice\n"));
        assert!(unit.contains("ExecStart=/usr/local/sbin/nginx -g \"daemon off;\"\n"));
        assert!(unit.contains("WorkingDirectory=/usr/local\n"));
        assert!(unit.contains("Restart=always\n"));
        assert!(unit.contains("WantedBy=default.target\n"));
    }

    #[test]
    fn systemd_unit_without_run_at_load_has_no_wanted_by() {
        let mut d = nginx_descriptor();
        d.run_at_load = false;
        d.keep_alive = false;
        let unit = d.render(DescriptorFormat::Systemd);
        assert!(!unit.contains("WantedBy"));
        assert!(!unit.contains("Restart="));
    }
}
