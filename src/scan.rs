use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::classfile::parse_class;
use crate::ir::Class;
use crate::names::ClassIdentifier;
use crate::source::{ClassSet, ClassSource};

/// Classes loaded from the inputs and classpath of one run.
pub struct ClassPath {
    classes: ClassSet,
    /// Classes found in the analysis inputs, in load order.
    pub targets: Vec<ClassIdentifier>,
    pub artifacts: Vec<Artifact>,
}

impl ClassPath {
    /// Load every class under `inputs`, then every class under `classpath`.
    ///
    /// Inputs become analysis targets; classpath entries only resolve
    /// dependencies. When a name appears twice the first definition wins.
    pub fn load(inputs: &[PathBuf], classpath: &[PathBuf]) -> Result<Self> {
        let mut loader = Loader::default();
        for input in inputs {
            loader.path(input, Role::Input, true)?;
        }
        // Keep deterministic ordering by sorting classpath entries.
        let mut entries = classpath.to_vec();
        entries.sort();
        for entry in &entries {
            loader.path(entry, Role::Dependency, true)?;
        }
        info!(
            classes = loader.classes.len(),
            targets = loader.targets.len(),
            "class path loaded"
        );
        Ok(Self {
            classes: loader.classes,
            targets: loader.targets,
            artifacts: loader.artifacts,
        })
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn contains(&self, class: &ClassIdentifier) -> bool {
        self.classes.class(class).is_some()
    }
}

impl ClassSource for ClassPath {
    fn class(&self, name: &ClassIdentifier) -> Option<Arc<Class>> {
        self.classes.class(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Role {
    Input,
    Dependency,
}

#[derive(Default)]
struct Loader {
    classes: ClassSet,
    targets: Vec<ClassIdentifier>,
    artifacts: Vec<Artifact>,
}

impl Loader {
    fn path(&mut self, path: &Path, role: Role, strict: bool) -> Result<()> {
        if path.is_dir() {
            return self.dir(path, role);
        }
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match extension {
            "class" => self.class_file(path, role),
            "jar" => self.jar_file(path, role),
            _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
            _ => Ok(()),
        }
    }

    fn dir(&mut self, path: &Path, role: Role) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }
        entries.sort();

        for entry in entries {
            if entry.is_dir() {
                self.dir(&entry, role)?;
            } else {
                self.path(&entry, role, false)?;
            }
        }
        Ok(())
    }

    fn class_file(&mut self, path: &Path, role: Role) -> Result<()> {
        if is_module_info(&path.to_string_lossy()) {
            return Ok(());
        }
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let class = parse_class(&data).with_context(|| format!("failed to parse {}", path.display()))?;
        self.push_artifact(path.to_string_lossy().to_string(), data.len() as u64, None, role);
        self.add(class, role);
        Ok(())
    }

    fn jar_file(&mut self, path: &Path, role: Role) -> Result<()> {
        let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
        let jar_len = fs::metadata(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        let jar_index = self.push_artifact(path.to_string_lossy().to_string(), jar_len, None, role);

        let mut entry_names = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            if name.ends_with(".class") && !is_module_info(&name) {
                entry_names.push(name);
            }
        }
        entry_names.sort();

        for name in entry_names {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let class = parse_class(&data)
                .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
            let uri = format!("jar:{}!/{}", path.to_string_lossy(), name);
            self.push_artifact(uri, entry.size(), Some(jar_index), Role::Dependency);
            self.add(class, role);
        }
        Ok(())
    }

    fn add(&mut self, class: Class, role: Role) {
        let name = class.name.clone();
        if !self.classes.insert(class) {
            debug!(class = %name, "duplicate class ignored");
            return;
        }
        if role == Role::Input {
            self.targets.push(name);
        }
    }

    /// Push an artifact and return its index for parent linkage.
    fn push_artifact(&mut self, uri: String, len: u64, parent_index: Option<i64>, role: Role) -> i64 {
        let location = ArtifactLocation::builder().uri(uri).build();
        let roles = (role == Role::Input)
            .then(|| serde_json::to_value(ArtifactRoles::AnalysisTarget).ok())
            .flatten()
            .map(|value| vec![value]);
        let artifact = match (parent_index, roles) {
            (Some(parent_index), _) => Artifact::builder()
                .location(location)
                .length(len as i64)
                .parent_index(parent_index)
                .build(),
            (None, Some(roles)) => Artifact::builder()
                .location(location)
                .length(len as i64)
                .roles(roles)
                .build(),
            (None, None) => Artifact::builder()
                .location(location)
                .length(len as i64)
                .build(),
        };
        let index = self.artifacts.len() as i64;
        self.artifacts.push(artifact);
        index
    }
}

fn is_module_info(name: &str) -> bool {
    name.ends_with("module-info.class")
}
