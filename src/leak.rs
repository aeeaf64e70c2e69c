//! Leaked managed shell detection.
//!
//! Engine objects (types deriving from `UnityEngine.Object`) are thin managed wrappers around a
//! native object whose address lives in the `m_CachedPtr` field. When the native side is
//! destroyed the field is zeroed, and a wrapper that is still reachable afterwards is a
//! *leaked managed shell*. This module flags those shells, explains why each is still alive
//! through its retention path, and renders the plain-text report and per-object dumps.
//!
//! # Examples
//!
//! ```rust,no_run
//! use heapscope::{leak::LeakReport, CrawlConfig, HeapGraph, SnapshotFile};
//!
//! let snapshot = SnapshotFile::from_file("capture.snap")?;
//! let mut graph = HeapGraph::new(&snapshot, CrawlConfig::default());
//! graph.crawl()?;
//!
//! let report = LeakReport::collect(&graph)?;
//! print!("{report}");
//! # Ok::<(), heapscope::Error>(())
//! ```

use std::{collections::HashMap, fmt, fmt::Write, sync::Arc};

use crate::{
    crawler::{FieldValue, HeapGraph, InstanceId, LoadedReason, Target},
    Result,
};

/// Name of the field holding the native object address of an engine object.
pub const CACHED_PTR_FIELD: &str = "m_CachedPtr";

/// Separator between hops of a rendered retention path.
const PATH_SEPARATOR: &str = " -> ";

impl HeapGraph<'_> {
    /// Returns `true` if the instance is an engine object whose native counterpart is gone.
    ///
    /// Instances that do not derive from `UnityEngine.Object`, that have no `m_CachedPtr`
    /// field, or whose fields were never materialised are not flagged.
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn is_leaked_shell(&self, id: InstanceId) -> Result<bool> {
        let snapshot = self.snapshot();
        let Some(engine_object) = snapshot.well_known().unity_engine_object() else {
            return Ok(false);
        };
        if !self.inherits_from(id, engine_object) {
            return Ok(false);
        }

        let instance = self.instance(id);
        let layout = snapshot.instance_fields(instance.type_index())?;
        for (position, field) in layout.iter().enumerate() {
            if &*snapshot.field_name(field.field_index)? == CACHED_PTR_FIELD {
                return Ok(instance
                    .fields()
                    .get(position)
                    .and_then(FieldValue::as_integer)
                    == Some(0));
            }
        }

        Ok(false)
    }

    /// Renders the first observed chain of references keeping the instance alive.
    ///
    /// The path reads from the root to the target, hops separated by `" -> "`:
    ///
    /// ```text
    /// Static Field s_Cache of Game.Registry -> Field m_Owner of Game.Node at 0x1F00 -> Game.Player at 0x2A40 (target)
    /// ```
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn retention_path(&self, id: InstanceId) -> Result<String> {
        let mut hops = Vec::new();
        let mut current = id;
        loop {
            let instance = self.instance(current);
            hops.push(self.retention_hop(instance.reason(), instance.parent())?);
            match instance.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        hops.reverse();

        let target = self.instance(id);
        hops.push(format!(
            "{} at 0x{:X} (target)",
            self.snapshot().type_name(target.type_index())?,
            target.address()
        ));
        Ok(hops.join(PATH_SEPARATOR))
    }

    fn retention_hop(&self, reason: LoadedReason, parent: Option<InstanceId>) -> Result<String> {
        let snapshot = self.snapshot();
        match (reason, parent) {
            (LoadedReason::StaticField(field), _) => {
                let owner = match self.static_owner(field) {
                    Some(owner) => snapshot.type_name(owner)?,
                    None => Arc::from("<unknown type>"),
                };
                Ok(format!("Static Field {} of {}", snapshot.field_name(field)?, owner))
            }
            (LoadedReason::InstanceField(field), Some(parent)) => {
                let mut hop = format!(
                    "Field {} of {}",
                    snapshot.field_name(field)?,
                    self.owner_description(parent)?
                );
                if self.is_leaked_shell(parent)? {
                    hop.push_str(" (leaked shell)");
                }
                Ok(hop)
            }
            (LoadedReason::ArrayElement(index), Some(parent)) => {
                Ok(format!("Element {} of {}", index, self.owner_description(parent)?))
            }
            (LoadedReason::GcRoot, _) | (_, None) => Ok("GC Root".to_string()),
        }
    }

    fn owner_description(&self, id: InstanceId) -> Result<String> {
        let owner = self.instance(id);
        let name = self.snapshot().type_name(owner.type_index())?;
        Ok(if owner.is_inline() {
            format!("{name} (inline)")
        } else {
            format!("{} at 0x{:X}", name, owner.address())
        })
    }

    /// Renders the type, flags, retention path and decoded fields of an instance.
    ///
    /// Array instances list their elements by index instead of named fields.
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn dump_instance(&self, id: InstanceId) -> Result<String> {
        let snapshot = self.snapshot();
        let instance = self.instance(id);

        let mut out = String::new();
        let _ = writeln!(out, "Found object at address 0x{:08X}", instance.address());
        let _ = writeln!(out, "Type: {}", snapshot.type_name(instance.type_index())?);
        let _ = writeln!(out, "Flags: {:?}", instance.flags());
        let _ = writeln!(out, "Retention path: {}", self.retention_path(id)?);
        let _ = writeln!(out, "Fields:");

        if instance.is_array() {
            for (index, value) in instance.fields().iter().enumerate() {
                let _ = writeln!(out, "    [{}] = {}", index, self.describe_value(value)?);
            }
            return Ok(out);
        }

        let layout = snapshot.instance_fields(instance.type_index())?;
        for (field, value) in layout.iter().zip(instance.fields()) {
            let _ = writeln!(
                out,
                "    {} {} = {}",
                snapshot.type_name(field.type_index)?,
                snapshot.field_name(field.field_index)?,
                self.describe_value(value)?
            );
        }
        Ok(out)
    }

    fn describe_value(&self, value: &FieldValue) -> Result<String> {
        match value {
            FieldValue::Reference(Target::Resolved(id)) => self.owner_description(*id),
            FieldValue::Enum { type_index, value } => {
                Ok(format!("{} ({})", value, self.snapshot().type_name(*type_index)?))
            }
            other => Ok(other.to_string()),
        }
    }
}

/// A leaked managed shell found by [`LeakReport::collect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedShell {
    /// The leaked instance
    pub id: InstanceId,
    /// Its heap address
    pub address: u64,
    /// Name of its type
    pub type_name: Arc<str>,
    /// Rendered retention path
    pub retention_path: String,
}

/// Result of scanning a crawled graph for leaked managed shells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Addressed instances in the graph
    pub total_instances: usize,
    /// Instances deriving from `UnityEngine.Object`
    pub engine_objects: usize,
    /// Every leaked shell, in discovery order
    pub leaked: Vec<LeakedShell>,
    /// Leaked shells per type name, most frequent first
    pub leaked_by_type: Vec<(Arc<str>, usize)>,
}

impl LeakReport {
    /// Scans every addressed instance of a crawled graph.
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn collect(graph: &HeapGraph<'_>) -> Result<LeakReport> {
        let snapshot = graph.snapshot();
        let mut report = LeakReport {
            total_instances: graph.instance_count(),
            ..LeakReport::default()
        };

        let Some(engine_object) = snapshot.well_known().unity_engine_object() else {
            log::warn!("UnityEngine.Object is not part of this capture, no leaks can be detected");
            return Ok(report);
        };

        let mut per_type: HashMap<Arc<str>, usize> = HashMap::new();
        for id in graph.instance_ids() {
            if !graph.inherits_from(id, engine_object) {
                continue;
            }
            report.engine_objects += 1;

            if !graph.is_leaked_shell(id)? {
                continue;
            }
            let instance = graph.instance(id);
            let type_name = snapshot.type_name(instance.type_index())?;
            *per_type.entry(Arc::clone(&type_name)).or_default() += 1;
            report.leaked.push(LeakedShell {
                id,
                address: instance.address(),
                type_name,
                retention_path: graph.retention_path(id)?,
            });
        }

        let mut leaked_by_type: Vec<(Arc<str>, usize)> = per_type.into_iter().collect();
        leaked_by_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        report.leaked_by_type = leaked_by_type;

        log::info!(
            "{} of {} engine objects are leaked managed shells",
            report.leaked.len(),
            report.engine_objects
        );
        Ok(report)
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Snapshot contains {} managed objects", self.total_instances)?;
        writeln!(f, "Of those, {} inherit from UnityEngine.Object", self.engine_objects)?;
        for shell in &self.leaked {
            writeln!(
                f,
                "Found leaked managed object of type: {} at memory address 0x{:X}",
                shell.type_name, shell.address
            )?;
            writeln!(f, "    Retention Path: {}", shell.retention_path)?;
        }
        writeln!(f, "{} of those are leaked managed shells", self.leaked.len())?;
        writeln!(f, "Leaked types by count:")?;
        for (type_name, count) in &self.leaked_by_type {
            writeln!(f, "{count} x {type_name}")?;
        }
        Ok(())
    }
}
