//! Scenario lookup and file-based scenario loading.
//!
//! The loader scans directories for `.json5`/`.json` scenario files. It supports
//! multiple source directories with priority ordering (user scenarios can
//! override system ones).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use swarmhive_shared::ScenarioPlan;
use swarmhive_shared::swarm_plan::parse_scenario_file;

/// Default system scenario directory (installed via package)
pub const SYSTEM_SCENARIO_DIR: &str = "/usr/share/swarmhive/scenarios";

/// Default user scenario directory
pub const USER_SCENARIO_DIR: &str = ".config/swarmhive/scenarios";

/// Where the lifecycle coordinator resolves scenario ids
pub trait ScenarioRepository: Send + Sync {
    fn find(&self, scenario_id: &str) -> Option<ScenarioPlan>;
}

/// Map-backed repository, filled once at startup or by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScenarios {
    scenarios: HashMap<String, ScenarioPlan>,
}

impl InMemoryScenarios {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scenario: ScenarioPlan) {
        self.scenarios.insert(scenario.id.clone(), scenario);
    }

    pub fn with(mut self, scenario: ScenarioPlan) -> Self {
        self.insert(scenario);
        self
    }

    /// Snapshot everything the loader can see
    pub fn from_loader(loader: &ScenarioLoader) -> Self {
        let mut repository = Self::new();
        for scenario in loader.load_all() {
            repository.insert(scenario);
        }
        repository
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.scenarios.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl ScenarioRepository for InMemoryScenarios {
    fn find(&self, scenario_id: &str) -> Option<ScenarioPlan> {
        self.scenarios.get(scenario_id).cloned()
    }
}

/// Scenario loader that scans directories for scenario files.
///
/// Directories are scanned in priority order - later directories can override
/// scenarios with the same ID from earlier directories.
#[derive(Debug, Clone)]
pub struct ScenarioLoader {
    /// Directories to scan, in priority order (later overrides earlier)
    directories: Vec<PathBuf>,
}

impl Default for ScenarioLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioLoader {
    /// Create a new scenario loader with default directories.
    ///
    /// Default directories (in priority order):
    /// 1. System: `/usr/share/swarmhive/scenarios`
    /// 2. User: `~/.config/swarmhive/scenarios`
    /// 3. Local: `./scenarios`
    pub fn new() -> Self {
        let mut directories = vec![PathBuf::from(SYSTEM_SCENARIO_DIR)];
        if let Some(home) = dirs::home_dir() {
            directories.push(home.join(USER_SCENARIO_DIR));
        }
        directories.push(PathBuf::from("./scenarios"));
        Self { directories }
    }

    /// Default directories unless disabled, then `extra` with highest priority.
    pub fn with_options(extra: Vec<PathBuf>, include_defaults: bool) -> Self {
        let mut loader = if include_defaults {
            Self::new()
        } else {
            Self::with_directories(Vec::new())
        };
        loader.add_directories(extra);
        loader
    }

    /// Create a scenario loader with custom directories only.
    pub fn with_directories(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    /// Add additional directories to scan (appended with highest priority).
    pub fn add_directories(&mut self, dirs: impl IntoIterator<Item = PathBuf>) {
        self.directories.extend(dirs);
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Load all scenarios from configured directories.
    pub fn load_all(&self) -> Vec<ScenarioPlan> {
        let mut scenarios: HashMap<String, ScenarioPlan> = HashMap::new();

        for dir in &self.directories {
            if !dir.exists() {
                debug!("Scenario directory does not exist, skipping: {:?}", dir);
                continue;
            }

            match self.load_from_directory(dir) {
                Ok(loaded) => {
                    let count = loaded.len();
                    for scenario in loaded {
                        let id = scenario.id.clone();
                        if scenarios.contains_key(&id) {
                            debug!(
                                "Scenario '{}' from {:?} overrides previous definition",
                                id, dir
                            );
                        }
                        scenarios.insert(id, scenario);
                    }
                    if count > 0 {
                        info!("Loaded {} scenarios from {:?}", count, dir);
                    }
                }
                Err(e) => {
                    warn!("Failed to load scenarios from {:?}: {}", dir, e);
                }
            }
        }

        scenarios.into_values().collect()
    }

    fn load_from_directory(&self, dir: &Path) -> Result<Vec<ScenarioPlan>> {
        let mut scenarios = Vec::new();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json5") | Some("json")
                )
            })
            .collect();
        // Stable override order inside one directory
        paths.sort();

        for path in paths {
            match self.load_scenario_file(&path) {
                Ok(scenario) => scenarios.push(scenario),
                Err(e) => warn!("Failed to load scenario from {:?}: {:#}", path, e),
            }
        }

        Ok(scenarios)
    }

    fn load_scenario_file(&self, path: &Path) -> Result<ScenarioPlan> {
        debug!("Loading scenario from {:?}", path);
        parse_scenario_file(path)
            .with_context(|| format!("Failed to parse scenario file: {:?}", path))
    }
}

/// Re-scans the directories on every lookup so edited files apply to the
/// next swarm without a restart.
impl ScenarioRepository for ScenarioLoader {
    fn find(&self, scenario_id: &str) -> Option<ScenarioPlan> {
        self.load_all().into_iter().find(|s| s.id == scenario_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scenario_text(id: &str, image: &str) -> String {
        format!(
            r#"{{
    id: "{}",
    name: "Test scenario",
    bees: [ {{ role: "generator", image: "{}" }} ],
}}"#,
            id, image
        )
    }

    #[test]
    fn test_loader_with_custom_directories() {
        let dirs = vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")];
        let loader = ScenarioLoader::with_directories(dirs.clone());
        assert_eq!(loader.directories(), &dirs);
    }

    #[test]
    fn test_with_options_without_defaults() {
        let loader = ScenarioLoader::with_options(vec![PathBuf::from("/srv/x")], false);
        assert_eq!(loader.directories(), &[PathBuf::from("/srv/x")]);

        let loader = ScenarioLoader::with_options(vec![PathBuf::from("/srv/x")], true);
        assert_eq!(loader.directories().first(), Some(&PathBuf::from(SYSTEM_SCENARIO_DIR)));
        assert_eq!(loader.directories().last(), Some(&PathBuf::from("/srv/x")));
    }

    #[test]
    fn test_load_skips_invalid_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("good.json5"), scenario_text("good", "img:1")).unwrap();
        fs::write(temp_dir.path().join("broken.json5"), "{ id: ").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "not a scenario").unwrap();

        let loader = ScenarioLoader::with_directories(vec![temp_dir.path().to_path_buf()]);
        let scenarios = loader.load_all();
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].id, "good");
    }

    #[test]
    fn test_later_directory_overrides_earlier() {
        let system = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(system.path().join("s.json5"), scenario_text("shared", "img:old")).unwrap();
        fs::write(user.path().join("s.json5"), scenario_text("shared", "img:new")).unwrap();

        let loader = ScenarioLoader::with_directories(vec![
            system.path().to_path_buf(),
            user.path().to_path_buf(),
        ]);
        let scenario = loader.find("shared").unwrap();
        assert_eq!(scenario.bees[0].image, "img:new");
        assert!(loader.find("missing").is_none());
    }

    #[test]
    fn test_in_memory_from_loader() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.json5"), scenario_text("a", "img:1")).unwrap();
        fs::write(temp_dir.path().join("b.json"), scenario_text("b", "img:2")).unwrap();

        let loader = ScenarioLoader::with_directories(vec![temp_dir.path().to_path_buf()]);
        let repository = InMemoryScenarios::from_loader(&loader);
        assert_eq!(repository.ids(), vec!["a", "b"]);
        assert!(repository.find("a").is_some());
    }

    #[test]
    fn test_nonexistent_directory_is_skipped() {
        let loader = ScenarioLoader::with_directories(vec![PathBuf::from("/nonexistent/swarmhive")]);
        assert!(loader.load_all().is_empty());
    }
}
