//! Load-order validation for a single extension.
//!
//! An extension's patches can succeed by accident: they target nodes that
//! only exist because some unrelated extension happens to load first. The
//! checker surfaces this by replaying the extension's files under
//! alternative load orders — as early as its dependencies allow, the
//! default alphabetical slot, and as late as possible — with the patch
//! applier in soft mode, and reporting every operation that failed under
//! each order.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::config::Config;
use crate::diff::PatchMode;
use crate::error::{ForgeError, Result};
use crate::vfs::{FileSystem, PatchReport};

/// One failed operation under one load order.
#[derive(Debug, Clone)]
pub struct CheckFailure {
    /// Which order produced the failure: `early`, `alphabetical`, `late`.
    pub order: String,
    pub virtual_path: String,
    /// Extension whose patch carried the failing op.
    pub extension_id: String,
    pub op_index: usize,
    pub sel: String,
    pub message: String,
}

/// The checker's verdict for one extension.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub extension_id: String,
    pub failures: Vec<CheckFailure>,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Validate one extension's patches under alternative load orders.
///
/// With `test_all_orders` the extension is additionally scheduled as early
/// and as late as its dependencies allow; otherwise only the default
/// alphabetical order is replayed. Failures attributable to the extension
/// are its own failing ops, plus other extensions' ops that only fail when
/// this extension moved.
pub fn check_extension(
    config: &Config,
    extension_id: &str,
    test_all_orders: bool,
) -> Result<CheckReport> {
    let ext_id = extension_id.to_ascii_lowercase();
    info!(extension = %ext_id, "checking extension");

    let orders: &[(&str, i32)] = if test_all_orders {
        &[("early", -1), ("alphabetical", 0), ("late", 1)]
    } else {
        &[("alphabetical", 0)]
    };

    let mut reports_per_order: Vec<(&str, Vec<PatchReport>)> = Vec::new();
    for &(label, priority) in orders {
        let mut priorities = HashMap::new();
        if priority != 0 {
            priorities.insert(ext_id.clone(), priority);
        }
        let mut fs = FileSystem::with_priorities(config.clone(), &priorities, PatchMode::Soft)?;
        if !fs.extension_ids().contains(&ext_id) {
            return Err(ForgeError::UnknownExtension(extension_id.to_string()));
        }

        for path in fs.extension_paths(&ext_id)? {
            // Force a full load; failures are collected, not raised. A
            // path that cannot even seed (missing base file) is itself
            // interesting but reported by the patch log, not here.
            if let Err(e) = fs.load_file_optional(&path) {
                warn!(path = %path, order = label, error = %e, "test load error");
            }
        }
        reports_per_order.push((label, fs.take_patch_reports()));
    }

    // Baseline: what already fails in the alphabetical order regardless of
    // this extension's own patches.
    let baseline: HashSet<(String, String, String)> = reports_per_order
        .iter()
        .find(|(label, _)| *label == "alphabetical")
        .map(|(_, reports)| {
            reports
                .iter()
                .filter(|r| r.extension_id != ext_id)
                .map(|r| (r.virtual_path.clone(), r.sel.clone(), r.message.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut failures = Vec::new();
    for (label, reports) in reports_per_order {
        for report in reports {
            let attributable = report.extension_id == ext_id
                || !baseline.contains(&(
                    report.virtual_path.clone(),
                    report.sel.clone(),
                    report.message.clone(),
                ));
            if !attributable {
                continue;
            }
            failures.push(CheckFailure {
                order: label.to_string(),
                virtual_path: report.virtual_path,
                extension_id: report.extension_id,
                op_index: report.op_index,
                sel: report.sel,
                message: report.message,
            });
        }
    }

    Ok(CheckReport {
        extension_id: ext_id,
        failures,
    })
}

/// Run [`check_extension`] over every enabled extension.
pub fn check_all_extensions(config: &Config, test_all_orders: bool) -> Result<Vec<CheckReport>> {
    let fs = FileSystem::new(config.clone())?;
    let ids = fs.extension_ids();
    drop(fs);

    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        reports.push(check_extension(config, &id, test_all_orders)?);
    }
    Ok(reports)
}
