// ============================================
// partition.rs — Target partition resolution
// ============================================
//
// Windows Setup needs a disk number and a partition number for
// <InstallTo>. The user only knows the volume label, so we look the
// label up across every disk.
//
// PowerShell's Get-Partition can't be trusted for the partition number
// on basic (MBR) disks: a primary partition that sits AFTER a logical
// partition gets reported as if it came before the extended container.
// Setup counts partitions in physical order, so we ignore the reported
// number and renumber each disk by byte offset, skipping the extended
// container itself.
//
// Example (disk 0):
//   reported #1  offset   1 MB  "System"    -> index 1
//   reported #2  (Extended container, dropped)
//   reported #3  offset 400 GB  "Data"      -> index 3 (logical)
//   reported #4  offset 100 GB  "Windows"   -> index 2
// ============================================

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::shell;

// ============================================
// RAW REPORT
// ============================================

/// One partition as reported by the OS, before any reordering.
/// Field names match the PowerShell objects so the JSON report
/// deserializes directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionReport {
    pub disk_number: u32,
    pub partition_number: u32,
    /// Get-Partition "Type" (Basic, IFS, Extended, XINT13 Extended, Logical, ...)
    #[serde(rename = "Type", default)]
    pub kind: String,
    pub offset: u64,
    #[serde(default)]
    pub drive_letter: Option<String>,
    /// Volume label via Get-Volume; only resolvable when a drive letter is assigned
    #[serde(default)]
    pub file_system_label: Option<String>,
}

impl PartitionReport {
    /// Extended partitions are containers for logical drives, not installable
    /// targets, and are not counted by Setup.
    pub fn is_extended(&self) -> bool {
        self.kind.to_ascii_lowercase().ends_with("extended")
    }
}

/// Anything that can describe the machine's current partition layout.
pub trait TopologySource {
    fn partitions(&self) -> Result<Vec<PartitionReport>>;
}

// ============================================
// POWERSHELL SOURCE
// ============================================

/// Queries Get-Partition/Get-Volume and returns one flat JSON array.
/// Drive letters that aren't real letters (PowerShell reports NUL for
/// "no letter") come back as null, and so does the label.
const TOPOLOGY_SCRIPT: &str = r#"$parts = @(Get-Partition | Where-Object { $_.Type -notlike '*Extended' } | ForEach-Object {
    $letter = if ([string]$_.DriveLetter -match '^[A-Za-z]$') { [string]$_.DriveLetter } else { $null }
    $label = if ($letter) { [string](Get-Volume -DriveLetter $letter -ErrorAction SilentlyContinue).FileSystemLabel } else { $null }
    [PSCustomObject]@{
        DiskNumber = $_.DiskNumber
        PartitionNumber = $_.PartitionNumber
        Type = [string]$_.Type
        Offset = $_.Offset
        DriveLetter = $letter
        FileSystemLabel = $label
    }
})
ConvertTo-Json -InputObject $parts -Depth 2 -Compress"#;

/// Live topology read through PowerShell storage cmdlets.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerShellTopology;

impl TopologySource for PowerShellTopology {
    fn partitions(&self) -> Result<Vec<PartitionReport>> {
        let stdout = shell::powershell(TOPOLOGY_SCRIPT).context("Failed to query partitions")?;
        parse_report(&stdout)
    }
}

/// Parse the JSON emitted by TOPOLOGY_SCRIPT.
/// Empty output means the machine has no partitions at all.
pub fn parse_report(json: &str) -> Result<Vec<PartitionReport>> {
    // Windows PowerShell may prepend a BOM when output is redirected
    let json = json.trim_start_matches('\u{feff}').trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).context("Failed to parse partition report from PowerShell")
}

// ============================================
// TOPOLOGY
// ============================================

/// A partition after reordering. Its position in the disk's list (1-based)
/// is the partition number Setup expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub reported_number: u32,
    pub drive_letter: Option<char>,
    pub offset: u64,
    pub label: String,
}

/// Partitions per disk, each disk's list sorted by physical offset.
#[derive(Debug, Clone, Default)]
pub struct DiskTopology {
    disks: BTreeMap<u32, Vec<PartitionRecord>>,
}

/// Where to install: disk number plus the offset-derived partition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub disk_number: u32,
    pub partition_index: u32,
    /// Letter of the matched volume, used to format exactly this volume
    pub drive_letter: Option<char>,
}

impl ResolvedTarget {
    /// (partition id, disk id) as the strings substituted into the answer file.
    pub fn ids(&self) -> (String, String) {
        (self.partition_index.to_string(), self.disk_number.to_string())
    }
}

impl DiskTopology {
    /// Rebuild per-disk ordering from an unordered report.
    pub fn from_reports<I>(reports: I) -> Self
    where
        I: IntoIterator<Item = PartitionReport>,
    {
        let mut disks: BTreeMap<u32, Vec<PartitionRecord>> = BTreeMap::new();

        for report in reports {
            if report.is_extended() {
                debug!(
                    "[Partition] Skipping extended partition {} on disk {}",
                    report.partition_number, report.disk_number
                );
                continue;
            }

            let drive_letter = report
                .drive_letter
                .as_deref()
                .and_then(|s| s.trim().chars().next())
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_uppercase());

            // No letter means Get-Volume couldn't be asked for a label
            let label = match drive_letter {
                Some(_) => report.file_system_label.unwrap_or_default(),
                None => String::new(),
            };

            disks.entry(report.disk_number).or_default().push(PartitionRecord {
                reported_number: report.partition_number,
                drive_letter,
                offset: report.offset,
                label,
            });
        }

        for partitions in disks.values_mut() {
            partitions.sort_by_key(|p| (p.offset, p.reported_number));
        }

        DiskTopology { disks }
    }

    /// Disk numbers in ascending order.
    pub fn disk_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.disks.keys().copied()
    }

    /// Partitions of a disk in physical order; index 0 is partition 1.
    pub fn partitions(&self, disk_number: u32) -> Option<&[PartitionRecord]> {
        self.disks.get(&disk_number).map(Vec::as_slice)
    }

    /// Every partition carrying exactly this label, disks ascending then
    /// partitions in physical order.
    pub fn find_all(&self, volume_label: &str) -> Vec<ResolvedTarget> {
        self.disks
            .iter()
            .flat_map(|(&disk_number, partitions)| {
                partitions
                    .iter()
                    .enumerate()
                    .filter(move |(_, p)| p.label == volume_label)
                    .map(move |(i, p)| ResolvedTarget {
                        disk_number,
                        partition_index: i as u32 + 1,
                        drive_letter: p.drive_letter,
                    })
            })
            .collect()
    }

    /// Look up a volume label. The first match wins; further matches are
    /// reported but not used.
    pub fn resolve(&self, volume_label: &str) -> Result<ResolvedTarget> {
        let matches = self.find_all(volume_label);

        let Some(first) = matches.first().copied() else {
            bail!("No such partition, please check volume label '{}'", volume_label);
        };

        if matches.len() > 1 {
            let others: Vec<String> = matches[1..]
                .iter()
                .map(|t| format!("disk {} partition {}", t.disk_number, t.partition_index))
                .collect();
            warn!(
                "[Partition] Label '{}' is on {} partitions; using disk {} partition {} (also on: {})",
                volume_label,
                matches.len(),
                first.disk_number,
                first.partition_index,
                others.join(", ")
            );
        }

        Ok(first)
    }
}

/// Resolve a volume label against a live topology. `ids()` on the result
/// gives the (partition id, disk id) pair for the answer file.
pub fn resolve_partition(source: &dyn TopologySource, volume_label: &str) -> Result<ResolvedTarget> {
    info!("[Partition] Looking up volume '{}'...", volume_label);

    let topology = DiskTopology::from_reports(source.partitions()?);
    for disk in topology.disk_numbers() {
        for (i, p) in topology.partitions(disk).unwrap_or_default().iter().enumerate() {
            debug!(
                "[Partition]   disk {} #{} (reported #{}) offset {} {}:'{}'",
                disk,
                i + 1,
                p.reported_number,
                p.offset,
                p.drive_letter.unwrap_or('-'),
                p.label
            );
        }
    }

    let target = topology.resolve(volume_label)?;
    info!(
        "[Partition] '{}' is disk {} partition {}",
        volume_label, target.disk_number, target.partition_index
    );
    Ok(target)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1_073_741_824;

    fn part(disk: u32, number: u32, kind: &str, offset: u64, letter: Option<&str>, label: &str) -> PartitionReport {
        PartitionReport {
            disk_number: disk,
            partition_number: number,
            kind: kind.to_string(),
            offset,
            drive_letter: letter.map(str::to_string),
            file_system_label: letter.map(|_| label.to_string()),
        }
    }

    struct FixedTopology(Vec<PartitionReport>);

    impl TopologySource for FixedTopology {
        fn partitions(&self) -> Result<Vec<PartitionReport>> {
            Ok(self.0.clone())
        }
    }

    /// MBR disk where a primary follows a logical drive: reported numbers
    /// put the primary before the logical one.
    fn mbr_with_logical() -> Vec<PartitionReport> {
        vec![
            part(0, 1, "IFS", 1_048_576, Some("C"), "System"),
            part(0, 2, "Extended", 200 * GB, None, ""),
            part(0, 3, "Logical", 200 * GB + 1_048_576, Some("E"), "Data"),
            part(0, 4, "IFS", 100 * GB, Some("D"), "Windows"),
        ]
    }

    #[test]
    fn test_offset_order_beats_reported_order() {
        let source = FixedTopology(mbr_with_logical());
        let (partition, disk) = resolve_partition(&source, "Windows").unwrap().ids();
        assert_eq!(partition, "2");
        assert_eq!(disk, "0");

        let (partition, _) = resolve_partition(&source, "Data").unwrap().ids();
        assert_eq!(partition, "3");
    }

    #[test]
    fn test_extended_container_is_not_counted() {
        let topology = DiskTopology::from_reports(mbr_with_logical());
        let disk0 = topology.partitions(0).unwrap();
        assert_eq!(disk0.len(), 3);
        assert!(disk0.iter().all(|p| p.reported_number != 2));
    }

    #[test]
    fn test_xint13_extended_is_filtered() {
        let report = part(0, 2, "XINT13 Extended", GB, None, "");
        assert!(report.is_extended());
        assert!(!part(0, 3, "Logical", GB, None, "").is_extended());
    }

    #[test]
    fn test_index_is_offset_rank_for_any_input_order() {
        let offsets = [50 * GB, 1_048_576, 300 * GB, 10 * GB, 120 * GB];
        let reports: Vec<PartitionReport> = offsets
            .iter()
            .enumerate()
            .map(|(i, &off)| {
                let letter = ((b'C' + i as u8) as char).to_string();
                part(1, i as u32 + 1, "Basic", off, Some(letter.as_str()), &format!("vol{}", i))
            })
            .collect();

        let mut sorted = offsets.to_vec();
        sorted.sort();

        // Feed the report in several orders; the rank must not change
        for rotation in 0..reports.len() {
            let mut shuffled = reports.clone();
            shuffled.rotate_left(rotation);
            shuffled.reverse();
            let topology = DiskTopology::from_reports(shuffled);

            for (i, &off) in offsets.iter().enumerate() {
                let expected = sorted.iter().position(|&o| o == off).unwrap() as u32 + 1;
                let target = topology.resolve(&format!("vol{}", i)).unwrap();
                assert_eq!(target.disk_number, 1);
                assert_eq!(target.partition_index, expected);
            }
        }
    }

    #[test]
    fn test_numbering_restarts_per_disk() {
        let topology = DiskTopology::from_reports(vec![
            part(0, 1, "Basic", 1_048_576, Some("C"), "OS"),
            part(0, 2, "Basic", 80 * GB, Some("D"), "Games"),
            part(1, 1, "Basic", 1_048_576, Some("F"), "Target"),
        ]);
        let target = topology.resolve("Target").unwrap();
        assert_eq!(
            target,
            ResolvedTarget { disk_number: 1, partition_index: 1, drive_letter: Some('F') }
        );
        assert_eq!(target.ids(), ("1".to_string(), "1".to_string()));
    }

    #[test]
    fn test_unknown_label_fails() {
        let source = FixedTopology(mbr_with_logical());
        let err = resolve_partition(&source, "Nope").unwrap_err();
        assert!(err.to_string().contains("No such partition"));
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        let topology = DiskTopology::from_reports(mbr_with_logical());
        assert!(topology.resolve("windows").is_err());
        assert!(topology.resolve("Windows").is_ok());
    }

    #[test]
    fn test_empty_label_does_not_match_letterless_partition() {
        // A partition without a drive letter has an empty label, and so does
        // an unlabelled volume; neither should be picked by a real label.
        let topology = DiskTopology::from_reports(vec![
            part(0, 1, "Recovery", 1_048_576, None, ""),
            part(0, 2, "Basic", GB, Some("C"), "Win"),
        ]);
        assert_eq!(topology.resolve("Win").unwrap().partition_index, 2);
    }

    #[test]
    fn test_label_ignored_without_drive_letter() {
        let mut hidden = part(0, 1, "Basic", GB, None, "");
        hidden.file_system_label = Some("Hidden".to_string());
        let topology = DiskTopology::from_reports(vec![hidden]);
        assert!(topology.resolve("Hidden").is_err());
    }

    #[test]
    fn test_duplicate_label_first_match_wins() {
        let topology = DiskTopology::from_reports(vec![
            part(1, 1, "Basic", 1_048_576, Some("F"), "Deploy"),
            part(0, 2, "Basic", 60 * GB, Some("E"), "Deploy"),
            part(0, 1, "Basic", 1_048_576, Some("C"), "OS"),
        ]);
        assert_eq!(topology.find_all("Deploy").len(), 2);
        assert_eq!(
            topology.resolve("Deploy").unwrap(),
            ResolvedTarget { disk_number: 0, partition_index: 2, drive_letter: Some('E') }
        );
    }

    #[test]
    fn test_resolved_target_carries_drive_letter() {
        let source = FixedTopology(vec![
            part(0, 1, "Basic", 1_048_576, Some("c"), "OS"),
            part(0, 2, "Basic", 60 * GB, Some("E"), "Deploy"),
            part(1, 1, "Basic", 1_048_576, Some("F"), "Deploy"),
        ]);
        let target = resolve_partition(&source, "Deploy").unwrap();
        assert_eq!(target.drive_letter, Some('E'));
        assert_eq!(target.ids(), ("2".to_string(), "0".to_string()));
    }

    #[test]
    fn test_disk_with_only_extended_contributes_nothing() {
        let topology = DiskTopology::from_reports(vec![part(2, 1, "Extended", GB, None, "")]);
        assert_eq!(topology.disk_numbers().count(), 0);
        assert!(topology.partitions(2).is_none());
    }

    #[test]
    fn test_parse_report_json() {
        let json = "\u{feff}[{\"DiskNumber\":0,\"PartitionNumber\":1,\"Type\":\"Reserved\",\"Offset\":17408,\"DriveLetter\":null,\"FileSystemLabel\":null},\
                    {\"DiskNumber\":0,\"PartitionNumber\":2,\"Type\":\"Basic\",\"Offset\":135266304,\"DriveLetter\":\"C\",\"FileSystemLabel\":\"OS\"}]\r\n";
        let reports = parse_report(json).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].drive_letter.as_deref(), Some("C"));
        assert_eq!(reports[1].file_system_label.as_deref(), Some("OS"));
        assert_eq!(reports[0].kind, "Reserved");
    }

    #[test]
    fn test_parse_report_empty_output() {
        assert!(parse_report("  \r\n").unwrap().is_empty());
        assert!(parse_report("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_report_garbage_is_error() {
        assert!(parse_report("Get-Partition : Access denied").is_err());
    }
}
