// ============================================
// editions.rs — Windows editions inside install.wim
// ============================================
//
// Runs: dism.exe /Get-WimInfo /WimFile:<path>
//
// Each image block in the report looks like:
//   Index : 1
//   Name : Windows 10 Pro
//   Description : Windows 10 Pro
//   Size : 15,156,846,170 bytes
//
// Only the Index and Description lines are used, paired in the order
// DISM prints them.
// ============================================

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::Path;

use crate::prompt::{self, Chooser};
use crate::shell;

/// One edition: DISM image index plus its description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimEdition {
    pub index: String,
    pub description: String,
}

/// Editions in the order DISM reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditionCatalog {
    editions: Vec<WimEdition>,
}

impl EditionCatalog {
    /// Build the catalog from DISM's text report.
    pub fn from_dism_output(output: &str) -> Self {
        let mut editions = Vec::new();
        let mut pending_index: Option<String> = None;

        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();

            match key.trim() {
                "Index" => {
                    if let Some(dropped) = pending_index.replace(value) {
                        warn!("[Editions] Index {} has no description, skipping", dropped);
                    }
                }
                "Description" => match pending_index.take() {
                    Some(index) => editions.push(WimEdition { index, description: value }),
                    None => warn!("[Editions] Description '{}' without an index, skipping", value),
                },
                _ => {}
            }
        }

        if let Some(dropped) = pending_index {
            warn!("[Editions] Index {} has no description, skipping", dropped);
        }

        EditionCatalog { editions }
    }

    pub fn len(&self) -> usize {
        self.editions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.editions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WimEdition> {
        self.editions.iter()
    }

    /// Description for an image index, e.g. "1" -> "Windows 10 Pro".
    #[cfg(test)]
    pub fn get(&self, index: &str) -> Option<&str> {
        self.editions
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.description.as_str())
    }

    /// Index -> description lookup table.
    #[cfg(test)]
    pub fn to_map(&self) -> std::collections::BTreeMap<String, String> {
        self.editions
            .iter()
            .map(|e| (e.index.clone(), e.description.clone()))
            .collect()
    }
}

/// Ask DISM which editions a WIM/ESD contains.
pub fn list_editions(image_path: &Path) -> Result<EditionCatalog> {
    info!("[Editions] Reading editions from: {}", image_path.display());

    let stdout = shell::run(
        "dism.exe",
        ["/Get-WimInfo".to_string(), format!("/WimFile:{}", image_path.display())],
    )
    .context("Failed to run DISM. Is DISM available?")?;

    let catalog = EditionCatalog::from_dism_output(&stdout);
    if catalog.is_empty() {
        bail!(
            "No Windows editions found in {}. Is this a valid install.wim or install.esd?",
            image_path.display()
        );
    }

    info!("[Editions] Found {} edition(s):", catalog.len());
    for e in catalog.iter() {
        info!("  {} - {}", e.index, e.description);
    }
    Ok(catalog)
}

/// Pick the edition to install and return its description.
/// One edition is taken as-is; otherwise the user chooses.
pub fn choose_edition(catalog: &EditionCatalog, chooser: &dyn Chooser) -> Result<String> {
    let items: Vec<String> = catalog
        .iter()
        .map(|e| format!("{} - {}", e.index, e.description))
        .collect();

    if items.len() > 1 {
        info!("[Editions] No edition specified, please choose one");
    }
    let picked = prompt::select_one(chooser, "Choose edition", &items)?;

    let edition = &catalog.editions[picked];
    info!("[Editions] Using edition {} ({})", edition.index, edition.description);
    Ok(edition.description.clone())
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::testing::ScriptedChooser;
    use std::collections::BTreeMap;

    const DISM_OUTPUT: &str = "\r\n\
Deployment Image Servicing and Management tool\r\n\
Version: 10.0.19041.844\r\n\
\r\n\
Details for image : D:\\sources\\install.wim\r\n\
\r\n\
Index : 1\r\n\
Name : Windows 10 Home\r\n\
Description : Windows 10 Home\r\n\
Size : 14,906,743,463 bytes\r\n\
\r\n\
Index : 2\r\n\
Name : Windows 10 Pro\r\n\
Description : Windows 10 Pro\r\n\
Size : 15,156,846,170 bytes\r\n\
\r\n\
The operation completed successfully.\r\n";

    #[test]
    fn test_pairs_index_with_description() {
        let catalog = EditionCatalog::from_dism_output("Index : 1\nDescription : Pro\nIndex : 2\nDescription : Home\n");
        let expected: BTreeMap<String, String> = [("1", "Pro"), ("2", "Home")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(catalog.to_map(), expected);
    }

    #[test]
    fn test_full_dism_report() {
        let catalog = EditionCatalog::from_dism_output(DISM_OUTPUT);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("1"), Some("Windows 10 Home"));
        assert_eq!(catalog.get("2"), Some("Windows 10 Pro"));
        assert_eq!(catalog.get("3"), None);
    }

    #[test]
    fn test_description_with_colon_kept_whole() {
        let catalog = EditionCatalog::from_dism_output("Index : 4\nDescription : Windows Server: Datacenter\n");
        assert_eq!(catalog.get("4"), Some("Windows Server: Datacenter"));
    }

    #[test]
    fn test_dangling_index_dropped() {
        let catalog = EditionCatalog::from_dism_output("Index : 1\nDescription : Pro\nIndex : 2\n");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_order_preserved() {
        let catalog = EditionCatalog::from_dism_output("Index : 10\nDescription : Ten\nIndex : 2\nDescription : Two\n");
        let order: Vec<&str> = catalog.iter().map(|e| e.index.as_str()).collect();
        assert_eq!(order, vec!["10", "2"]);
    }

    #[test]
    fn test_single_edition_needs_no_prompt() {
        let catalog = EditionCatalog::from_dism_output("Index : 1\nDescription : Windows 10 Pro\n");
        let chooser = ScriptedChooser::new(None);
        assert_eq!(choose_edition(&catalog, &chooser).unwrap(), "Windows 10 Pro");
        assert_eq!(chooser.asked.get(), 0);
    }

    #[test]
    fn test_choice_maps_to_description() {
        let catalog = EditionCatalog::from_dism_output(DISM_OUTPUT);
        let chooser = ScriptedChooser::new(Some(1));
        assert_eq!(choose_edition(&catalog, &chooser).unwrap(), "Windows 10 Pro");
    }

    #[test]
    fn test_cancelled_choice_fails() {
        let catalog = EditionCatalog::from_dism_output(DISM_OUTPUT);
        let chooser = ScriptedChooser::new(None);
        assert!(choose_edition(&catalog, &chooser).is_err());
    }
}
