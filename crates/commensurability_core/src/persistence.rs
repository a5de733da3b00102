//! Save and load of analyses through a bincode container.
//!
//! A container holds named datasets; each dataset is a dense row-major array
//! with typed attributes. An analysis is stored as one dataset named after
//! its evaluator, carrying the recipes of both generating functions, the run
//! parameters, the backend's implementation name and one attribute per axis.

use crate::analysis::Analysis;
use crate::backend::{BackendChoice, OrbitBackend};
use crate::error::{AnalysisError, AnalysisResult};
use crate::evaluation::Evaluator;
use crate::grid::AxisSet;
use crate::recipe::{decode_recipe, encode_recipe, IcRecipe, PotentialRecipe};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const FORMAT_TAG: &str = "commensurability-image";
const FORMAT_VERSION: u32 = 1;

/// Metadata keys written by [`Analysis::save`]; axes may not use them.
pub const RESERVED_KEYS: [&str; 6] = [
    "icfunc",
    "potfunc",
    "dt",
    "steps",
    "pattern_speed",
    "backend",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Blob(Vec<u8>),
    Text(String),
    Float(f64),
    UInt(u64),
    Floats(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub shape: Vec<usize>,
    /// Row-major values, `shape.iter().product()` of them.
    pub data: Vec<f64>,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Dataset {
    pub fn from_array(array: &ArrayD<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn to_array(&self) -> AnalysisResult<ArrayD<f64>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone()).map_err(|_| {
            AnalysisError::ShapeMismatch {
                expected: self.shape.clone(),
                found: vec![self.data.len()],
            }
        })
    }

    fn attr(&self, key: &str) -> AnalysisResult<&AttrValue> {
        self.attrs
            .get(key)
            .ok_or_else(|| AnalysisError::MissingAttribute(key.to_string()))
    }

    pub fn float(&self, key: &str) -> AnalysisResult<f64> {
        match self.attr(key)? {
            AttrValue::Float(value) => Ok(*value),
            _ => Err(AnalysisError::AttributeType(key.to_string())),
        }
    }

    pub fn uint(&self, key: &str) -> AnalysisResult<u64> {
        match self.attr(key)? {
            AttrValue::UInt(value) => Ok(*value),
            _ => Err(AnalysisError::AttributeType(key.to_string())),
        }
    }

    pub fn text(&self, key: &str) -> AnalysisResult<&str> {
        match self.attr(key)? {
            AttrValue::Text(value) => Ok(value),
            _ => Err(AnalysisError::AttributeType(key.to_string())),
        }
    }

    pub fn floats(&self, key: &str) -> AnalysisResult<&[f64]> {
        match self.attr(key)? {
            AttrValue::Floats(values) => Ok(values),
            _ => Err(AnalysisError::AttributeType(key.to_string())),
        }
    }

    /// The blob stored under `key`, if any.
    pub fn blob(&self, key: &str) -> AnalysisResult<Option<&[u8]>> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(AttrValue::Blob(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(AnalysisError::AttributeType(key.to_string())),
        }
    }
}

/// The on-disk container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    format: String,
    version: u32,
    pub datasets: BTreeMap<String, Dataset>,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            datasets: BTreeMap::new(),
        }
    }
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(&self, name: &str) -> AnalysisResult<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| AnalysisError::MissingDataset(name.to_string()))
    }

    pub fn read(path: &Path) -> AnalysisResult<Self> {
        let bytes = fs::read(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Container read");

        let container: Container = bincode::deserialize(&bytes).map_err(AnalysisError::Decode)?;
        if container.format != FORMAT_TAG || container.version != FORMAT_VERSION {
            return Err(AnalysisError::UnsupportedContainer {
                format: container.format,
                version: container.version,
            });
        }
        Ok(container)
    }

    /// Writes the whole container, replacing any existing file.
    pub fn write(&self, path: &Path) -> AnalysisResult<()> {
        let bytes = bincode::serialize(self).map_err(AnalysisError::Encode)?;
        fs::write(path, &bytes).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Container written");
        Ok(())
    }
}

fn recipe_error(what: &'static str) -> impl FnOnce(anyhow::Error) -> AnalysisError {
    move |source| AnalysisError::InvalidRecipe { what, source }
}

impl<E: Evaluator> Analysis<E> {
    /// Writes the image and everything needed to rebuild this analysis.
    ///
    /// A missing parent directory is created.
    pub fn save(&self, path: impl AsRef<Path>) -> AnalysisResult<()> {
        let path = path.as_ref();
        for name in self.axes().names() {
            if RESERVED_KEYS.contains(&name) {
                return Err(AnalysisError::ReservedAxisName(name.to_string()));
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!(path = %parent.display(), "Creating output directory");
                fs::create_dir_all(parent).map_err(|source| AnalysisError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let icfunc = encode_recipe(self.ic_recipe()).map_err(recipe_error("initial-condition"))?;
        let potfunc = encode_recipe(self.potential_recipe()).map_err(recipe_error("potential"))?;

        let mut dataset = Dataset::from_array(self.image());
        let attrs = &mut dataset.attrs;
        attrs.insert("icfunc".to_string(), AttrValue::Blob(icfunc));
        attrs.insert("potfunc".to_string(), AttrValue::Blob(potfunc));
        attrs.insert("dt".to_string(), AttrValue::Float(self.dt()));
        attrs.insert("steps".to_string(), AttrValue::UInt(self.steps() as u64));
        attrs.insert("pattern_speed".to_string(), AttrValue::Float(self.pattern_speed()));
        attrs.insert(
            "backend".to_string(),
            AttrValue::Text(self.backend().implementation_name().to_string()),
        );
        for axis in self.axes().iter() {
            attrs.insert(axis.name.clone(), AttrValue::Floats(axis.values.clone()));
        }

        let name = self.evaluator().name().to_string();
        let mut container = Container::new();
        container.datasets.insert(name.clone(), dataset);
        container.write(path)?;

        info!(path = %path.display(), dataset = %name, pixels = self.size(), "Analysis saved");
        Ok(())
    }

    /// Rebuilds an analysis saved by [`Analysis::save`] without integrating
    /// anything. The dataset is the one named after `evaluator`.
    ///
    /// Missing generating-function recipes are replaced by no-ops with a
    /// warning; the result then has no axes.
    pub fn load(path: impl AsRef<Path>, evaluator: E) -> AnalysisResult<Self> {
        Self::load_inner(path.as_ref(), evaluator, None)
    }

    /// Like [`Analysis::load`], but integrates with `backend` instead of the
    /// stored one. Needed for containers written with a custom backend.
    pub fn load_with_backend(
        path: impl AsRef<Path>,
        evaluator: E,
        backend: Box<dyn OrbitBackend>,
    ) -> AnalysisResult<Self> {
        Self::load_inner(path.as_ref(), evaluator, Some(backend))
    }

    fn load_inner(
        path: &Path,
        evaluator: E,
        backend: Option<Box<dyn OrbitBackend>>,
    ) -> AnalysisResult<Self> {
        let container = Container::read(path)?;
        let name = evaluator.name().to_string();
        let dataset = container.dataset(&name)?;

        let ic_recipe = match dataset.blob("icfunc")? {
            Some(bytes) => decode_recipe(bytes).map_err(recipe_error("initial-condition"))?,
            None => {
                warn!(
                    path = %path.display(),
                    "No initial-condition recipe stored; axes and parameters will be empty"
                );
                IcRecipe::noop()
            }
        };
        let potential_recipe = match dataset.blob("potfunc")? {
            Some(bytes) => decode_recipe(bytes).map_err(recipe_error("potential"))?,
            None => {
                warn!(
                    path = %path.display(),
                    "No potential recipe stored; using the null potential"
                );
                PotentialRecipe::Null
            }
        };
        let degraded = ic_recipe.parameters.is_empty() && !dataset.shape.is_empty();

        let mut axes = AxisSet::new();
        for parameter in &ic_recipe.parameters {
            axes.push(parameter.clone(), dataset.floats(parameter)?.to_vec());
        }
        let backend = match backend {
            Some(backend) => BackendChoice::Custom(backend),
            None => BackendChoice::Named(dataset.text("backend")?.to_string()),
        };

        let mut analysis = Analysis::blank(
            evaluator,
            ic_recipe,
            axes,
            potential_recipe,
            dataset.float("dt")?,
            dataset.uint("steps")? as usize,
            dataset.float("pattern_speed")?,
            backend,
            None,
        )?;

        let image = dataset.to_array()?;
        if !degraded && image.shape() != analysis.shape() {
            return Err(AnalysisError::ShapeMismatch {
                expected: analysis.shape().to_vec(),
                found: image.shape().to_vec(),
            });
        }
        analysis.set_image(image);

        info!(path = %path.display(), dataset = %name, "Analysis loaded");
        Ok(analysis)
    }
}
