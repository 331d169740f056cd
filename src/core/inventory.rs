/// Cluster inventory
///
/// Instances, their disks and their primary node, read from
/// `gnt-instance info` (YAML) once at the start of a run.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_yaml::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::core::exec::{CommandRunner, CommandSpec, Invocation};
use crate::utils::GNT_INSTANCE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("inventory is not valid YAML: {0}")]
    Yaml(String),
    #[error("inventory is not a list of instances")]
    NotAList,
    #[error("instance entry #{0} has no 'Instance name'")]
    MissingName(usize),
    #[error("instance {0} has no primary node")]
    MissingPrimary(String),
    #[error("instance {instance}: disk {index} is malformed ({reason})")]
    MalformedDisk {
        instance: String,
        index: usize,
        reason: &'static str,
    },
    #[error("instances not found in inventory: {0}")]
    UnknownInstances(String),
}

/// One disk of an instance, as seen on its primary node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub vg: String,
    pub lv: String,
    /// Device path on the primary node, the snapshot source
    pub device_path: String,
}

impl Disk {
    /// `vg/lv`, the Ganeti logical id
    pub fn logical_id(&self) -> String {
        format!("{}/{}", self.vg, self.lv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub name: String,
    pub primary_node: String,
    pub disks: Vec<Disk>,
}

#[async_trait]
pub trait InventorySource: Send + Sync {
    /// All instances, or only `names` when given
    async fn fetch(&self, names: Option<&[String]>) -> Result<Vec<Instance>>;
}

/// Inventory from `gnt-instance info` on the cluster master
pub struct GanetiInventory {
    runner: Arc<dyn CommandRunner>,
}

impl GanetiInventory {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn query(names: Option<&[String]>) -> CommandSpec {
        let spec = CommandSpec::new(GNT_INSTANCE).arg("info");
        match names {
            Some(names) => spec.args(names.iter().cloned()),
            None => spec.arg("--all"),
        }
    }
}

#[async_trait]
impl InventorySource for GanetiInventory {
    async fn fetch(&self, names: Option<&[String]>) -> Result<Vec<Instance>> {
        let invocation = Invocation::local("inventory", Self::query(names));
        let output = self
            .runner
            .run(&invocation)
            .await
            .context("Failed to run gnt-instance info")?;

        if !output.success() {
            return Err(anyhow!(
                "gnt-instance info exited with {:?}: {}",
                output.code,
                output.stderr
            ));
        }

        let instances = parse_instances(&output.stdout)?;
        if let Some(names) = names {
            ensure_all_found(names, &instances)?;
        }

        tracing::info!(instances = instances.len(), "inventory loaded");
        Ok(instances)
    }
}

/// Fixed inventory, for tests and dry runs against a saved document
pub struct StaticInventory {
    instances: Vec<Instance>,
}

impl StaticInventory {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn fetch(&self, names: Option<&[String]>) -> Result<Vec<Instance>> {
        let instances: Vec<Instance> = match names {
            Some(names) => self
                .instances
                .iter()
                .filter(|i| names.contains(&i.name))
                .cloned()
                .collect(),
            None => self.instances.clone(),
        };

        if let Some(names) = names {
            ensure_all_found(names, &instances)?;
        }
        Ok(instances)
    }
}

fn ensure_all_found(names: &[String], instances: &[Instance]) -> Result<(), InventoryError> {
    let missing: Vec<&str> = names
        .iter()
        .filter(|name| !instances.iter().any(|i| &i.name == *name))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(InventoryError::UnknownInstances(missing.join(", ")))
    }
}

/// Parse `gnt-instance info` YAML output
pub fn parse_instances(yaml: &str) -> Result<Vec<Instance>, InventoryError> {
    let document: Value =
        serde_yaml::from_str(yaml).map_err(|e| InventoryError::Yaml(e.to_string()))?;

    let entries: &[Value] = match &document {
        Value::Sequence(entries) => entries.as_slice(),
        Value::Null => &[],
        _ => return Err(InventoryError::NotAList),
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_instance(index, entry))
        .collect()
}

fn parse_instance(index: usize, entry: &Value) -> Result<Instance, InventoryError> {
    let name = entry
        .get("Instance name")
        .and_then(|n| n.as_str())
        .ok_or(InventoryError::MissingName(index))?
        .to_string();

    // Nodes: [{primary: node1, group: ...}, {secondaries: ...}]
    let primary_node = entry
        .get("Nodes")
        .and_then(|n| n.as_sequence())
        .and_then(|nodes| {
            nodes
                .iter()
                .find_map(|node| node.get("primary").and_then(|p| p.as_str()))
        })
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| InventoryError::MissingPrimary(name.clone()))?;

    let disks = entry
        .get("Disks")
        .and_then(|d| d.as_sequence())
        .map(|disks| {
            disks
                .iter()
                .enumerate()
                .map(|(i, disk)| parse_disk(&name, i, disk))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(Instance {
        name,
        primary_node,
        disks,
    })
}

fn parse_disk(instance: &str, index: usize, disk: &Value) -> Result<Disk, InventoryError> {
    let malformed = |reason| InventoryError::MalformedDisk {
        instance: instance.to_string(),
        index,
        reason,
    };

    let logical_id = disk
        .get("logical_id")
        .and_then(|l| l.as_str())
        .ok_or_else(|| malformed("no logical_id"))?;

    let (vg, lv) = logical_id
        .trim()
        .split_once('/')
        .filter(|(vg, lv)| !vg.is_empty() && !lv.is_empty() && !lv.contains('/'))
        .ok_or_else(|| malformed("logical_id is not vg/lv"))?;

    // "on primary: /dev/xenvg/<lv> (253:0)"
    let device_path = disk
        .get("on primary")
        .and_then(|p| p.as_str())
        .and_then(|p| p.split_whitespace().next())
        .ok_or_else(|| malformed("no 'on primary' device"))?;

    Ok(Disk {
        vg: vg.to_string(),
        lv: lv.to_string(),
        device_path: device_path.to_string(),
    })
}
