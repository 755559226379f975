//! Flow discovery and parsing.

use crate::paths::FastPaths;
use fast_flow::executor::strip_code_fence;
use fast_protocol::FlowDefinition;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Errors from locating or reading a flow
#[derive(Debug, Error)]
pub enum LoadError {
    /// No `<name>.json` in any flow folder
    #[error("Flow '{name}' not found")]
    NotFound {
        /// Requested flow name
        name: String,
        /// Paths that were tried
        searched: Vec<PathBuf>,
    },
    /// The file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// Flow file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid flow document
    #[error("Invalid flow JSON in {}: {source}", path.display())]
    Parse {
        /// Flow file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Where a flow was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlowSource {
    /// `./flows`
    Local,
    /// `~/fast-flows/flows`
    User,
}

impl fmt::Display for FlowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowSource::Local => write!(f, "local"),
            FlowSource::User => write!(f, "user"),
        }
    }
}

/// A discoverable flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    /// Name without `.json`
    pub name: String,
    /// Folder it came from
    pub source: FlowSource,
    /// Full path
    pub path: PathBuf,
}

fn candidates(paths: &FastPaths, name: &str) -> Vec<PathBuf> {
    let file = format!("{name}.json");
    vec![paths.local_flows.join(&file), paths.user_flows().join(&file)]
}

/// Path of flow `name`: the local folder first, then the user folder.
pub fn resolve(paths: &FastPaths, name: &str) -> Result<PathBuf, LoadError> {
    let searched = candidates(paths, name);
    match searched.iter().find(|p| p.is_file()) {
        Some(path) => {
            debug!(path = %path.display(), "Resolved flow");
            Ok(path.clone())
        }
        None => Err(LoadError::NotFound {
            name: name.to_string(),
            searched,
        }),
    }
}

fn scan(dir: &Path, source: FlowSource) -> Vec<FlowEntry> {
    let mut entries: Vec<FlowEntry> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let name = e.path().file_stem()?.to_string_lossy().into_owned();
            Some(FlowEntry {
                name,
                source,
                path: e.into_path(),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Every flow in both folders, local ones first, each group sorted by name.
pub fn list_flows(paths: &FastPaths) -> Vec<FlowEntry> {
    let mut flows = scan(&paths.local_flows, FlowSource::Local);
    flows.extend(scan(&paths.user_flows(), FlowSource::User));
    flows
}

/// Parse a flow document, tolerating a surrounding Markdown code fence.
pub fn parse_flow(text: &str) -> Result<FlowDefinition, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}

/// Resolve, read and parse flow `name`.
#[instrument(skip(paths))]
pub async fn load_flow(paths: &FastPaths, name: &str) -> Result<(PathBuf, FlowDefinition), LoadError> {
    let path = resolve(paths, name)?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| LoadError::Read {
            path: path.clone(),
            source,
        })?;
    let flow = parse_flow(&text).map_err(|source| LoadError::Parse {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), steps = flow.steps.len(), "Loaded flow");
    Ok((path, flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FLOW: &str = r#"{"model": "m", "steps": [{"id": "a", "prompt": "hi"}]}"#;

    fn layout() -> (tempfile::TempDir, FastPaths) {
        let root = tempfile::tempdir().expect("tempdir");
        let paths = FastPaths::with_roots(&root.path().join("work"), &root.path().join("home"));
        std::fs::create_dir_all(&paths.local_flows).expect("local flows");
        std::fs::create_dir_all(paths.user_flows()).expect("user flows");
        (root, paths)
    }

    #[test]
    fn test_parse_fenced_flow() {
        let fenced = format!("```json\n{FLOW}\n```");
        let flow = parse_flow(&fenced).expect("fenced flow");
        assert_eq!(flow.model, "m");
        assert_eq!(flow.steps.len(), 1);
        assert!(parse_flow("not json").is_err());
    }

    #[test]
    fn test_local_shadows_user() {
        let (_root, paths) = layout();
        std::fs::write(paths.local_flows.join("draft.json"), FLOW).expect("write");
        std::fs::write(paths.user_flows().join("draft.json"), FLOW).expect("write");
        std::fs::write(paths.user_flows().join("mail.json"), FLOW).expect("write");

        assert_eq!(
            resolve(&paths, "draft").expect("draft"),
            paths.local_flows.join("draft.json")
        );
        assert_eq!(
            resolve(&paths, "mail").expect("mail"),
            paths.user_flows().join("mail.json")
        );
    }

    #[test]
    fn test_not_found_lists_searched_paths() {
        let (_root, paths) = layout();
        match resolve(&paths, "ghost") {
            Err(LoadError::NotFound { name, searched }) => {
                assert_eq!(name, "ghost");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_list_flows_tags_sources() {
        let (_root, paths) = layout();
        std::fs::write(paths.local_flows.join("b.json"), FLOW).expect("write");
        std::fs::write(paths.local_flows.join("notes.txt"), "x").expect("write");
        std::fs::write(paths.user_flows().join("a.json"), FLOW).expect("write");

        let listed: Vec<_> = list_flows(&paths)
            .into_iter()
            .map(|e| (e.name, e.source))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("b".to_string(), FlowSource::Local),
                ("a".to_string(), FlowSource::User)
            ]
        );
    }

    #[test]
    fn test_missing_folders_list_nothing() {
        let paths = FastPaths::with_roots(Path::new("/no/such/work"), Path::new("/no/such/home"));
        assert!(list_flows(&paths).is_empty());
    }

    #[tokio::test]
    async fn test_load_flow_reports_parse_errors() {
        let (_root, paths) = layout();
        std::fs::write(paths.local_flows.join("bad.json"), "{").expect("write");
        assert!(matches!(
            load_flow(&paths, "bad").await,
            Err(LoadError::Parse { .. })
        ));
    }
}
