// src/schema.rs

//! Per-project schema store.
//!
//! A [`SchemaCache`] is an ordinary value: create one per consumer (or
//! share one behind the control context) and register the task managers it
//! may use to refresh schemas. Nothing about it is process-global.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::engine::{ManagerId, TaskEvent, TaskManager};
use crate::errors::CacheError;
use crate::retriever::{Query, RemoteSource, SCHEMA_PRIORITY};
use crate::scheduler::{TaskBody, TaskOptions};
use crate::types::{Payload, TaskId};

/// Format version of persisted schema files.
pub const SCHEMA_GENERATION: u32 = 1;

/// Query method used to read a project's schema from the remote source.
pub const SCHEMA_QUERY_METHOD: &str = "schema_read";

/// Entity types of one project, each mapping field names to field info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSchema {
    pub entities: Payload,
}

impl ProjectSchema {
    /// Merge the records returned by a schema query.
    pub fn from_records(records: Vec<Payload>) -> Self {
        let mut entities = Payload::new();
        for record in records {
            entities.extend(record);
        }
        Self { entities }
    }

    pub fn is_valid_entity_type(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// Field names of `entity_type`, sorted.
    pub fn entity_fields(&self, entity_type: &str) -> Vec<String> {
        let mut fields: Vec<String> = self
            .entities
            .get(entity_type)
            .and_then(Value::as_object)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }

    /// Display name of a field, from either `"name": "..."` or
    /// `"name": {"value": "..."}` in the field info.
    pub fn field_display_name(&self, entity_type: &str, field: &str) -> Option<String> {
        let name = self.entities.get(entity_type)?.get(field)?.get("name")?;
        name.as_str()
            .or_else(|| name.get("value").and_then(Value::as_str))
            .map(str::to_string)
    }
}

#[derive(Serialize)]
struct SchemaFileRef<'a> {
    generation: u32,
    schema: &'a ProjectSchema,
}

#[derive(Deserialize)]
struct SchemaFile {
    generation: u32,
    schema: ProjectSchema,
}

struct Registration {
    manager: TaskManager,
    source: Arc<dyn RemoteSource>,
}

/// Schemas of several projects, refreshed in the background.
pub struct SchemaCache {
    dir: PathBuf,
    registrations: Vec<Registration>,
    schemas: HashMap<String, ProjectSchema>,
    pending: HashMap<(ManagerId, TaskId), String>,
}

impl SchemaCache {
    /// Schemas are persisted as `<dir>/<project>.cbor`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registrations: Vec::new(),
            schemas: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Allow refreshes to run on `manager`, querying `source`.
    pub fn register(&mut self, manager: &TaskManager, source: Arc<dyn RemoteSource>) {
        if self.is_registered(manager.id()) {
            debug!(manager = %manager.id(), "task manager already registered with schema cache");
            return;
        }
        self.registrations.push(Registration {
            manager: manager.clone(),
            source,
        });
        debug!(manager = %manager.id(), "task manager registered with schema cache");
    }

    /// Forget a manager and any refresh still running on it.
    pub fn unregister(&mut self, manager: ManagerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|reg| reg.manager.id() != manager);
        self.pending.retain(|(owner, _), _| *owner != manager);
        let removed = self.registrations.len() != before;
        if removed {
            debug!(manager = %manager, "task manager unregistered from schema cache");
        }
        removed
    }

    pub fn is_registered(&self, manager: ManagerId) -> bool {
        self.registrations.iter().any(|reg| reg.manager.id() == manager)
    }

    /// Queue a schema read for `project` on the first usable registered
    /// manager. Returns `None` if no manager can take it.
    pub fn refresh(&mut self, project: &str) -> Option<TaskId> {
        for reg in &self.registrations {
            if reg.manager.is_shut_down() {
                continue;
            }

            let source = Arc::clone(&reg.source);
            let query = Query::new(SCHEMA_QUERY_METHOD, json!({ "project": project }));
            let body = TaskBody::run(move || {
                let records = source.query(&query)?;
                Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
            });

            match reg
                .manager
                .add_task(body, TaskOptions::new().priority(SCHEMA_PRIORITY))
            {
                Ok(id) => {
                    self.pending.insert((reg.manager.id(), id), project.to_string());
                    debug!(project, task = id, manager = %reg.manager.id(), "schema refresh queued");
                    return Some(id);
                }
                Err(err) => {
                    warn!(project, manager = %reg.manager.id(), error = %err, "could not queue schema refresh");
                }
            }
        }

        warn!(project, "no task manager available to refresh schema");
        None
    }

    /// Apply an event from `manager`'s dispatcher. Returns `true` if the
    /// event belonged to a schema refresh.
    pub fn handle_event(&mut self, manager: ManagerId, event: &TaskEvent) -> bool {
        let Some(id) = event.task_id() else {
            return false;
        };
        let Some(project) = self.pending.remove(&(manager, id)) else {
            return false;
        };

        match event {
            TaskEvent::Completed { result, .. } => {
                let records = match result {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_object().cloned())
                        .collect(),
                    _ => Vec::new(),
                };
                let schema = ProjectSchema::from_records(records);
                if let Err(err) = self.persist(&project, &schema) {
                    warn!(project, error = %err, "failed to persist schema");
                }
                info!(project, entity_types = schema.entities.len(), "schema loaded");
                self.schemas.insert(project, schema);
            }
            TaskEvent::Failed { error, .. } => {
                warn!(project, error = %error.message, "schema refresh failed");
            }
            TaskEvent::Cancelled { .. } | TaskEvent::GroupFinished { .. } => {
                debug!(project, "schema refresh cancelled");
            }
        }
        true
    }

    /// Restore a persisted schema. Missing, corrupt or outdated files are
    /// ignored.
    pub fn load(&mut self, project: &str) -> bool {
        let path = self.schema_path(project);
        if !path.is_file() {
            return false;
        }

        match read_schema_file(&path) {
            Ok(schema) => {
                self.schemas.insert(project.to_string(), schema);
                debug!(project, path = ?path, "schema restored from disk");
                true
            }
            Err(err) => {
                debug!(project, path = ?path, error = %err, "discarding unusable schema file");
                false
            }
        }
    }

    pub fn schema(&self, project: &str) -> Option<&ProjectSchema> {
        self.schemas.get(project)
    }

    pub fn is_valid_entity_type(&self, project: &str, entity_type: &str) -> bool {
        self.schema(project)
            .is_some_and(|schema| schema.is_valid_entity_type(entity_type))
    }

    pub fn entity_fields(&self, project: &str, entity_type: &str) -> Vec<String> {
        self.schema(project)
            .map(|schema| schema.entity_fields(entity_type))
            .unwrap_or_default()
    }

    pub fn field_display_name(&self, project: &str, entity_type: &str, field: &str) -> Option<String> {
        self.schema(project)?.field_display_name(entity_type, field)
    }

    fn schema_path(&self, project: &str) -> PathBuf {
        let name: String = project
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.cbor"))
    }

    fn persist(&self, project: &str, schema: &ProjectSchema) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.schema_path(project);
        let file = SchemaFileRef {
            generation: SCHEMA_GENERATION,
            schema,
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        ciborium::into_writer(&file, &mut writer).map_err(|err| CacheError::Encode(err.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

fn read_schema_file(path: &Path) -> Result<ProjectSchema, CacheError> {
    let bytes = fs::read(path)?;
    let file: SchemaFile =
        ciborium::from_reader(bytes.as_slice()).map_err(|err| CacheError::Corrupt(err.to_string()))?;
    if file.generation != SCHEMA_GENERATION {
        return Err(CacheError::GenerationMismatch {
            found: file.generation,
            expected: SCHEMA_GENERATION,
        });
    }
    Ok(file.schema)
}
