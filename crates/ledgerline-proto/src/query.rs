use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClientId, ProjectId, TaskId};

pub const TASKS_PATH: &str = "/api/tasks";
pub const PROJECTS_PATH: &str = "/api/projects";
pub const MESSAGES_PATH: &str = "/api/messages";
pub const DOCUMENTS_PATH: &str = "/api/documents";
pub const CLIENTS_PATH: &str = "/api/clients";
const MILESTONES_SEGMENT: &str = "milestones";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySegment {
    Path(String),
    Id(i64),
}

impl From<&str> for QuerySegment {
    fn from(value: &str) -> Self {
        QuerySegment::Path(value.to_string())
    }
}

impl From<i64> for QuerySegment {
    fn from(value: i64) -> Self {
        QuerySegment::Id(value)
    }
}

/// Identifier of a cached read, shared with the REST layer.
///
/// Keys are ordered segments such as `["/api/tasks", 7]`. A key invalidates
/// every key it is a prefix of, so `["/api/tasks"]` covers the list and every
/// single-task read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<QuerySegment>);

impl QueryKey {
    pub fn new(segments: impl IntoIterator<Item = QuerySegment>) -> Self {
        Self(segments.into_iter().collect())
    }

    pub fn tasks() -> Self {
        Self::new([TASKS_PATH.into()])
    }

    pub fn task(id: TaskId) -> Self {
        Self::new([TASKS_PATH.into(), id.get().into()])
    }

    pub fn projects() -> Self {
        Self::new([PROJECTS_PATH.into()])
    }

    pub fn project(id: ProjectId) -> Self {
        Self::new([PROJECTS_PATH.into(), id.get().into()])
    }

    pub fn project_milestones(id: ProjectId) -> Self {
        Self::new([
            PROJECTS_PATH.into(),
            id.get().into(),
            MILESTONES_SEGMENT.into(),
        ])
    }

    pub fn messages() -> Self {
        Self::new([MESSAGES_PATH.into()])
    }

    pub fn documents() -> Self {
        Self::new([DOCUMENTS_PATH.into()])
    }

    pub fn clients() -> Self {
        Self::new([CLIENTS_PATH.into()])
    }

    pub fn client(id: ClientId) -> Self {
        Self::new([CLIENTS_PATH.into(), id.get().into()])
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, segment) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match segment {
                QuerySegment::Path(path) => write!(f, "{path:?}")?,
                QuerySegment::Id(id) => write!(f, "{id}")?,
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_serialize_as_mixed_arrays() {
        let key = QueryKey::task(TaskId(7));
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"["/api/tasks",7]"#);
        let parsed: QueryKey = serde_json::from_str(r#"["/api/projects",42,"milestones"]"#).unwrap();
        assert_eq!(parsed, QueryKey::project_milestones(ProjectId(42)));
    }

    #[test]
    fn prefix_matching_is_segment_wise() {
        let project = QueryKey::project(ProjectId(4));
        assert!(QueryKey::project_milestones(ProjectId(4)).starts_with(&project));
        assert!(!QueryKey::project(ProjectId(42)).starts_with(&project));
        assert!(QueryKey::task(TaskId(1)).starts_with(&QueryKey::tasks()));
        assert!(!QueryKey::tasks().starts_with(&QueryKey::task(TaskId(1))));
    }

    #[test]
    fn display_reads_like_the_wire_form() {
        assert_eq!(QueryKey::client(ClientId(3)).to_string(), r#"["/api/clients", 3]"#);
    }
}
