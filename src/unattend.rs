// ============================================
// unattend.rs — Answer file preparation
// ============================================
//
// The answer file is a template the admin maintains. Four literal
// placeholder words are replaced before Setup sees it:
//
//   diskid          -> target disk number
//   partitionid     -> target partition number (offset order)
//   wineditionname  -> edition to install
//   newhostname     -> computer name
//
// Replacement is one left-to-right pass: text that came from a value is
// never scanned again, even if it happens to contain a placeholder word.
// ============================================

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the generated answer file inside the output directory.
pub const ANSWER_FILE_NAME: &str = "unattended.xml";

/// Values substituted into the template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    pub disk_id: String,
    pub partition_id: String,
    pub edition: String,
    pub hostname: String,
}

impl Substitutions {
    /// (placeholder, value) pairs in replacement priority order.
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("diskid", self.disk_id.as_str()),
            ("partitionid", self.partition_id.as_str()),
            ("wineditionname", self.edition.as_str()),
            ("newhostname", self.hostname.as_str()),
        ]
    }
}

/// Replace every placeholder in `template` in a single pass.
pub fn fill_placeholders(template: &str, subs: &Substitutions) -> String {
    let pairs = subs.pairs();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        // Earliest placeholder in what's left; ties go to the first listed
        let next = pairs
            .iter()
            .filter_map(|(token, value)| rest.find(token).map(|pos| (pos, *token, *value)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, token, value)) => {
                out.push_str(&rest[..pos]);
                out.push_str(value);
                rest = &rest[pos + token.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Read the template, fill it in, write `<output_dir>/unattended.xml`.
///
/// # Returns
/// Path of the written answer file.
pub fn render(template_path: &Path, subs: &Substitutions, output_dir: &Path) -> Result<PathBuf> {
    info!("[Unattend] Preparing answer file from: {}", template_path.display());
    debug!("[Unattend] {:?}", subs);

    let template = fs::read_to_string(template_path)
        .with_context(|| format!("Failed to read unattended template {}", template_path.display()))?;

    let xml = fill_placeholders(&template, subs);

    let out_path = output_dir.join(ANSWER_FILE_NAME);
    fs::write(&out_path, &xml)
        .with_context(|| format!("Failed to write answer file {}", out_path.display()))?;

    info!("[Unattend] Wrote answer file to: {} ({} bytes)", out_path.display(), xml.len());
    Ok(out_path)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = r#"<DiskConfiguration><Disk><DiskID>diskid</DiskID></Disk></DiskConfiguration>
<InstallTo><DiskID>diskid</DiskID><PartitionID>partitionid</PartitionID></InstallTo>
<MetaData><Key>/IMAGE/NAME</Key><Value>wineditionname</Value></MetaData>
<ComputerName>newhostname</ComputerName>"#;

    fn sample() -> Substitutions {
        Substitutions {
            disk_id: "0".to_string(),
            partition_id: "2".to_string(),
            edition: "Pro".to_string(),
            hostname: "HOST1".to_string(),
        }
    }

    #[test]
    fn test_all_placeholders_replaced() {
        let out = fill_placeholders(TEMPLATE, &sample());
        for (token, _) in sample().pairs() {
            assert!(!out.contains(token), "{} left in output", token);
        }
        assert!(out.contains("<DiskID>0</DiskID></Disk>"));
        assert!(out.contains("<DiskID>0</DiskID><PartitionID>2</PartitionID>"));
        assert!(out.contains("<Value>Pro</Value>"));
        assert!(out.contains("<ComputerName>HOST1</ComputerName>"));
    }

    #[test]
    fn test_value_containing_placeholder_not_reprocessed() {
        let subs = Substitutions {
            edition: "newhostname edition".to_string(),
            hostname: "HOST1".to_string(),
            ..sample()
        };
        let out = fill_placeholders("wineditionname|newhostname", &subs);
        assert_eq!(out, "newhostname edition|HOST1");
    }

    #[test]
    fn test_template_without_placeholders_unchanged() {
        assert_eq!(fill_placeholders("<unattend/>", &sample()), "<unattend/>");
        assert_eq!(fill_placeholders("", &sample()), "");
    }

    #[test]
    fn test_render_writes_into_output_dir() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("template.xml");
        fs::write(&template, TEMPLATE).unwrap();

        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        let out_path = render(&template, &sample(), &out_dir).unwrap();
        assert_eq!(out_path, out_dir.join(ANSWER_FILE_NAME));

        let written = fs::read_to_string(out_path).unwrap();
        assert_eq!(written, fill_placeholders(TEMPLATE, &sample()));
        // Template itself is untouched
        assert_eq!(fs::read_to_string(template).unwrap(), TEMPLATE);
    }

    #[test]
    fn test_shipped_template_has_every_placeholder() {
        let template = include_str!("../config/unattended.xml");
        for (token, _) in sample().pairs() {
            assert!(template.contains(token), "{} missing from template", token);
        }
        let out = fill_placeholders(template, &sample());
        assert!(out.contains("<ComputerName>HOST1</ComputerName>"));
        assert!(out.contains("<PartitionID>2</PartitionID>"));
    }

    #[test]
    fn test_render_missing_template() {
        let dir = TempDir::new().unwrap();
        assert!(render(&dir.path().join("missing.xml"), &sample(), dir.path()).is_err());
    }
}
