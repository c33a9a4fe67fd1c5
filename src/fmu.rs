use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use fmi_sys::fmi2 as binding;

use crate::{
    component::Component,
    native::{LibraryRegistry, NativeApi},
    ComponentCS, ComponentME, Error, LoadError, ModelDescriptor, CS, ME,
};

/// A model description bound to the native library that implements it.
///
/// Instances borrow the `Fmu`, so the library outlives every component created from it.
#[derive(Debug)]
pub struct Fmu<L: NativeApi> {
    model_description: ModelDescriptor,
    library: L,
    library_path: PathBuf,
    resource_url: String,
    registry: Arc<LibraryRegistry>,
}

impl<L: NativeApi> Fmu<L> {
    /// Bind `library` (loaded from `library_path`) to `model_description`.
    ///
    /// The library must report FMI version `2.0` and the `default` types platform, and the model
    /// description must be a FMI 2.0 one. `resources_dir` is converted into the `file://` URL passed
    /// to `fmi2Instantiate`.
    pub fn new(
        model_description: ModelDescriptor,
        library: L,
        library_path: impl Into<PathBuf>,
        resources_dir: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        check_consistency(&library, &model_description)?;
        let resource_url = resource_url(resources_dir.as_ref())?;
        log::debug!(
            "Bound {} (guid {}) with resources at {resource_url}",
            model_description.model_name,
            model_description.guid,
        );

        Ok(Self {
            model_description,
            library,
            library_path: library_path.into(),
            resource_url,
            registry: LibraryRegistry::process(),
        })
    }

    /// Use `registry` instead of [`LibraryRegistry::process`] for single-instance bookkeeping.
    pub fn with_registry(mut self, registry: Arc<LibraryRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn model_description(&self) -> &ModelDescriptor {
        &self.model_description
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    pub fn registry(&self) -> &Arc<LibraryRegistry> {
        &self.registry
    }

    /// Create a Co-Simulation instance.
    ///
    /// Arguments:
    /// * `instance_name` - a unique identifier for the instance, also used as the log target.
    /// * `visible` - whether the FMU may show an interactive window.
    /// * `logging_on` - enables debug logging for all categories.
    pub fn instantiate_cs(
        &self,
        instance_name: &str,
        visible: bool,
        logging_on: bool,
    ) -> Result<ComponentCS<'_, L>, Error> {
        Component::<L, CS>::new(self, instance_name, visible, logging_on)
    }

    /// Create a Model Exchange instance.
    pub fn instantiate_me(
        &self,
        instance_name: &str,
        visible: bool,
        logging_on: bool,
    ) -> Result<ComponentME<'_, L>, Error> {
        Component::<L, ME>::new(self, instance_name, visible, logging_on)
    }
}

#[cfg(feature = "fmi2")]
impl Fmu<crate::native::Fmi2Library> {
    /// Load the shared library at `library_path` and bind it to `model_description`.
    pub fn load(
        model_description: ModelDescriptor,
        library_path: impl AsRef<Path>,
        resources_dir: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        let library_path = library_path.as_ref();
        // One registry key per loaded image
        let library_path =
            std::fs::canonicalize(library_path).unwrap_or_else(|_| library_path.to_path_buf());
        let library = crate::native::Fmi2Library::load(&library_path)?;
        Self::new(model_description, library, library_path, resources_dir)
    }
}

fn check_consistency(library: &impl NativeApi, md: &ModelDescriptor) -> Result<(), LoadError> {
    if library.version() != binding::fmi2Version {
        return Err(LoadError::FmiVersionMismatch {
            found: library.version().to_owned(),
            expected: binding::fmi2Version.to_owned(),
        });
    }

    if md.fmi_version != binding::fmi2Version {
        return Err(LoadError::FmiVersionMismatch {
            found: md.fmi_version.clone(),
            expected: binding::fmi2Version.to_owned(),
        });
    }

    if library.types_platform() != binding::fmi2TypesPlatform {
        return Err(LoadError::TypesPlatformMismatch(
            library.types_platform().to_owned(),
        ));
    }

    Ok(())
}

fn resource_url(resources_dir: &Path) -> Result<String, Error> {
    let absolute = if resources_dir.is_absolute() {
        resources_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(resources_dir)
    };
    url::Url::from_directory_path(&absolute)
        .map(String::from)
        .map_err(|_| {
            Error::Argument(format!(
                "Resources directory {} is not a valid URL path",
                absolute.display()
            ))
        })
}
