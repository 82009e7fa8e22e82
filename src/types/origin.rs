//! Origins: where a workload is defined and how to launch a worker that can
//! load it.
//!
//! Two families exist. *Python origins* ([`JobOrigin`],
//! [`RepositoryPythonOrigin`]) carry everything needed to build a worker
//! command line. *Location origins* ([`RepositoryOrigin`],
//! [`ExternalJobOrigin`]) identify a workload inside a code location that is
//! already being served.

use serde_json::Value;

use crate::error::{Error, Result, SerdesError};
use crate::serdes::{class_of, wire_record, FieldReader, FieldSpec, FieldWriter, Record, WireValue};
use crate::types::commands::ApiCommand;

/// Module run with `-m` when an origin does not name an explicit entry point.
pub const DEFAULT_WORKER_MODULE: &str = "stepwire_worker";

/// Subcommand group the worker exposes for protocol calls.
pub const API_SUBCOMMAND: &str = "api";

// ─── Code pointers ──────────────────────────────────────────────────────────

/// Points at an attribute defined in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCodePointer {
    /// Path to the defining file.
    pub python_file: String,
    /// Attribute name inside the file.
    pub fn_name: String,
    /// Directory to resolve relative imports from.
    pub working_directory: Option<String>,
}

impl Record for FileCodePointer {
    const STORAGE_NAME: &'static str = "FileCodePointer";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("python_file"),
        FieldSpec::required("fn_name"),
        FieldSpec::optional("working_directory"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("python_file", &self.python_file);
        fields.put("fn_name", &self.fn_name);
        fields.put("working_directory", &self.working_directory);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            python_file: fields.required("python_file")?,
            fn_name: fields.required("fn_name")?,
            working_directory: fields.optional("working_directory")?,
        })
    }
}

/// Points at an attribute of an importable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCodePointer {
    /// Dotted module path.
    pub module: String,
    /// Attribute name inside the module.
    pub fn_name: String,
    /// Directory to add to the import path.
    pub working_directory: Option<String>,
}

impl Record for ModuleCodePointer {
    const STORAGE_NAME: &'static str = "ModuleCodePointer";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("module"),
        FieldSpec::required("fn_name"),
        FieldSpec::optional("working_directory"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("module", &self.module);
        fields.put("fn_name", &self.fn_name);
        fields.put("working_directory", &self.working_directory);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            module: fields.required("module")?,
            fn_name: fields.required("fn_name")?,
            working_directory: fields.optional("working_directory")?,
        })
    }
}

/// Points at an attribute of an installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCodePointer {
    /// Package name.
    pub module: String,
    /// Attribute name inside the package.
    pub attribute: String,
    /// Directory to add to the import path.
    pub working_directory: Option<String>,
}

impl Record for PackageCodePointer {
    const STORAGE_NAME: &'static str = "PackageCodePointer";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("module"),
        FieldSpec::required("attribute"),
        FieldSpec::optional("working_directory"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("module", &self.module);
        fields.put("attribute", &self.attribute);
        fields.put("working_directory", &self.working_directory);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            module: fields.required("module")?,
            attribute: fields.required("attribute")?,
            working_directory: fields.optional("working_directory")?,
        })
    }
}

wire_record!(FileCodePointer, ModuleCodePointer, PackageCodePointer);

/// How to locate and import the code defining a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodePointer {
    /// Attribute in a file.
    File(FileCodePointer),
    /// Attribute in a module.
    Module(ModuleCodePointer),
    /// Attribute in a package.
    Package(PackageCodePointer),
}

impl CodePointer {
    /// Pointer to `fn_name` in `python_file`.
    pub fn file(python_file: impl Into<String>, fn_name: impl Into<String>) -> Self {
        Self::File(FileCodePointer {
            python_file: python_file.into(),
            fn_name: fn_name.into(),
            working_directory: None,
        })
    }

    /// Pointer to `fn_name` in `module`.
    pub fn module(module: impl Into<String>, fn_name: impl Into<String>) -> Self {
        Self::Module(ModuleCodePointer {
            module: module.into(),
            fn_name: fn_name.into(),
            working_directory: None,
        })
    }

    /// Pointer to `attribute` in `package`.
    pub fn package(package: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Package(PackageCodePointer {
            module: package.into(),
            attribute: attribute.into(),
            working_directory: None,
        })
    }

    /// Human readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::File(p) => format!("{}::{}", p.python_file, p.fn_name),
            Self::Module(p) => format!("{}::{}", p.module, p.fn_name),
            Self::Package(p) => format!("{}::{}", p.module, p.attribute),
        }
    }
}

impl WireValue for CodePointer {
    fn to_wire(&self) -> Value {
        match self {
            Self::File(p) => p.to_wire(),
            Self::Module(p) => p.to_wire(),
            Self::Package(p) => p.to_wire(),
        }
    }

    fn from_wire(value: &Value, path: &str) -> std::result::Result<Self, SerdesError> {
        match class_of(value) {
            Some(class) if FileCodePointer::accepts_class(class) => {
                FileCodePointer::from_wire(value, path).map(Self::File)
            },
            Some(class) if ModuleCodePointer::accepts_class(class) => {
                ModuleCodePointer::from_wire(value, path).map(Self::Module)
            },
            Some(class) if PackageCodePointer::accepts_class(class) => {
                PackageCodePointer::from_wire(value, path).map(Self::Package)
            },
            Some(class) => Err(SerdesError::UnknownVariant {
                class: class.to_string(),
            }),
            None => Err(SerdesError::mismatch(path, "code pointer")),
        }
    }
}

// ─── Python origins ─────────────────────────────────────────────────────────

/// Where a repository's code lives and which runtime can load it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryPythonOrigin {
    /// Interpreter or runtime executable.
    pub executable_path: String,
    /// Location of the repository definition.
    pub code_pointer: CodePointer,
    /// Image the code is packaged in, if containerized.
    pub container_image: Option<String>,
    /// Explicit argument vector that launches the worker runtime.
    pub entry_point: Option<Vec<String>>,
    /// Free-form container settings.
    pub container_context: Option<Value>,
}

impl RepositoryPythonOrigin {
    /// Create an origin with no container metadata and no explicit entry point.
    pub fn new(executable_path: impl Into<String>, code_pointer: CodePointer) -> Self {
        Self {
            executable_path: executable_path.into(),
            code_pointer,
            container_image: None,
            entry_point: None,
            container_context: None,
        }
    }

    /// Set an explicit entry point.
    pub fn with_entry_point<I, S>(mut self, entry_point: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_point = Some(entry_point.into_iter().map(Into::into).collect());
        self
    }

    /// Set the container image.
    pub fn with_container_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = Some(image.into());
        self
    }

    /// Set the container context.
    pub fn with_container_context(mut self, context: Value) -> Self {
        self.container_context = Some(context);
        self
    }

    /// Argument vector that launches a worker able to load this origin.
    ///
    /// An explicit, non-empty entry point is used verbatim. Otherwise the
    /// executable is invoked with `-m DEFAULT_WORKER_MODULE`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OriginResolution`] when there is neither an entry
    /// point nor an executable path.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepwire::types::{CodePointer, RepositoryPythonOrigin};
    ///
    /// let origin = RepositoryPythonOrigin::new("/usr/bin/python3", CodePointer::module("jobs", "defs"));
    /// assert_eq!(
    ///     origin.entry_point().unwrap(),
    ///     vec!["/usr/bin/python3", "-m", "stepwire_worker"]
    /// );
    ///
    /// let origin = origin.with_entry_point(["worker-bin", "--quiet"]);
    /// assert_eq!(origin.entry_point().unwrap(), vec!["worker-bin", "--quiet"]);
    /// ```
    pub fn entry_point(&self) -> Result<Vec<String>> {
        self.entry_point_for(DEFAULT_WORKER_MODULE)
    }

    /// Like [`entry_point`](Self::entry_point) with a configurable worker module.
    pub fn entry_point_for(&self, worker_module: &str) -> Result<Vec<String>> {
        if let Some(entry_point) = self.entry_point.as_ref().filter(|ep| !ep.is_empty()) {
            return Ok(entry_point.clone());
        }

        let executable = self.executable_path.trim();
        if executable.is_empty() {
            return Err(Error::origin_resolution(format!(
                "origin for {} has neither an entry point nor an executable path",
                self.code_pointer.describe()
            )));
        }
        Ok(vec![
            executable.to_string(),
            "-m".to_string(),
            worker_module.to_string(),
        ])
    }
}

impl Record for RepositoryPythonOrigin {
    const STORAGE_NAME: &'static str = "RepositoryPythonOrigin";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("executable_path"),
        FieldSpec::required("code_pointer"),
        FieldSpec::optional("container_image"),
        FieldSpec::optional("entry_point"),
        FieldSpec::optional("container_context"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("executable_path", &self.executable_path);
        fields.put("code_pointer", &self.code_pointer);
        fields.put("container_image", &self.container_image);
        fields.put("entry_point", &self.entry_point);
        fields.put("container_context", &self.container_context);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            executable_path: fields.required("executable_path")?,
            code_pointer: fields.required("code_pointer")?,
            container_image: fields.optional("container_image")?,
            entry_point: fields.optional("entry_point")?,
            container_context: fields.optional("container_context")?,
        })
    }
}

/// Identifies one job inside a repository reachable by a Python origin.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOrigin {
    /// Job name.
    pub job_name: String,
    /// Repository that defines the job.
    pub repository_origin: RepositoryPythonOrigin,
}

impl JobOrigin {
    /// Create a job origin.
    pub fn new(job_name: impl Into<String>, repository_origin: RepositoryPythonOrigin) -> Self {
        Self {
            job_name: job_name.into(),
            repository_origin,
        }
    }

    /// Entry point of the owning repository origin.
    pub fn entry_point(&self) -> Result<Vec<String>> {
        self.repository_origin.entry_point()
    }

    /// Full worker argument vector: entry point, `api`, subcommand, payload.
    pub fn command_args(
        &self,
        worker_module: &str,
        command: ApiCommand,
        payload_args: impl IntoIterator<Item = String>,
    ) -> Result<Vec<String>> {
        let mut args = self.repository_origin.entry_point_for(worker_module)?;
        args.push(API_SUBCOMMAND.to_string());
        args.push(command.as_str().to_string());
        args.extend(payload_args);
        Ok(args)
    }
}

impl Record for JobOrigin {
    const STORAGE_NAME: &'static str = "PipelinePythonOrigin";
    const LEGACY_NAMES: &'static [&'static str] = &["JobPythonOrigin"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("job_name").stored_as("pipeline_name"),
        FieldSpec::required("repository_origin"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("job_name", &self.job_name);
        fields.put("repository_origin", &self.repository_origin);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            job_name: fields.required("job_name")?,
            repository_origin: fields.required("repository_origin")?,
        })
    }
}

// ─── Location origins ───────────────────────────────────────────────────────

/// A code location loaded inside the orchestrator's own process.
#[derive(Debug, Clone, PartialEq)]
pub struct InProcessCodeLocationOrigin {
    /// Origin of the code loaded in-process.
    pub loadable_target_origin: RepositoryPythonOrigin,
    /// Display name of the location.
    pub location_name: Option<String>,
}

impl Record for InProcessCodeLocationOrigin {
    const STORAGE_NAME: &'static str = "InProcessRepositoryLocationOrigin";
    const LEGACY_NAMES: &'static [&'static str] = &["InProcessCodeLocationOrigin"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("loadable_target_origin"),
        FieldSpec::optional("location_name"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("loadable_target_origin", &self.loadable_target_origin);
        fields.put("location_name", &self.location_name);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            loadable_target_origin: fields.required("loadable_target_origin")?,
            location_name: fields.optional("location_name")?,
        })
    }
}

/// A code location served by a long-running worker server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcServerCodeLocationOrigin {
    /// Host the server listens on.
    pub host: String,
    /// TCP port, if listening on one.
    pub port: Option<u32>,
    /// Unix socket path, if listening on one.
    pub socket: Option<String>,
    /// Display name of the location.
    pub location_name: Option<String>,
    /// Whether the channel uses TLS.
    pub use_ssl: Option<bool>,
}

impl Record for GrpcServerCodeLocationOrigin {
    const STORAGE_NAME: &'static str = "GrpcServerRepositoryLocationOrigin";
    const LEGACY_NAMES: &'static [&'static str] = &["GrpcServerCodeLocationOrigin"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("host"),
        FieldSpec::optional("port"),
        FieldSpec::optional("socket"),
        FieldSpec::optional("location_name"),
        FieldSpec::optional("use_ssl"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("host", &self.host);
        fields.put("port", &self.port);
        fields.put("socket", &self.socket);
        fields.put("location_name", &self.location_name);
        fields.put("use_ssl", &self.use_ssl);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            host: fields.required("host")?,
            port: fields.optional("port")?,
            socket: fields.optional("socket")?,
            location_name: fields.optional("location_name")?,
            use_ssl: fields.optional("use_ssl")?,
        })
    }
}

wire_record!(
    RepositoryPythonOrigin,
    JobOrigin,
    InProcessCodeLocationOrigin,
    GrpcServerCodeLocationOrigin
);

/// Where a code location is served from.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeLocationOrigin {
    /// Loaded in the orchestrator process.
    InProcess(InProcessCodeLocationOrigin),
    /// Served by a worker server.
    GrpcServer(GrpcServerCodeLocationOrigin),
}

impl CodeLocationOrigin {
    /// Name of the location, if known.
    pub fn location_name(&self) -> Option<&str> {
        match self {
            Self::InProcess(o) => o.location_name.as_deref(),
            Self::GrpcServer(o) => o.location_name.as_deref(),
        }
    }
}

impl WireValue for CodeLocationOrigin {
    fn to_wire(&self) -> Value {
        match self {
            Self::InProcess(o) => o.to_wire(),
            Self::GrpcServer(o) => o.to_wire(),
        }
    }

    fn from_wire(value: &Value, path: &str) -> std::result::Result<Self, SerdesError> {
        match class_of(value) {
            Some(class) if InProcessCodeLocationOrigin::accepts_class(class) => {
                InProcessCodeLocationOrigin::from_wire(value, path).map(Self::InProcess)
            },
            Some(class) if GrpcServerCodeLocationOrigin::accepts_class(class) => {
                GrpcServerCodeLocationOrigin::from_wire(value, path).map(Self::GrpcServer)
            },
            Some(class) => Err(SerdesError::UnknownVariant {
                class: class.to_string(),
            }),
            None => Err(SerdesError::mismatch(path, "code location origin")),
        }
    }
}

/// Identifies a repository (jobs, schedules, sensors, partition sets) inside
/// one code location.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryOrigin {
    /// Location serving the repository.
    pub code_location_origin: CodeLocationOrigin,
    /// Repository name inside the location.
    pub repository_name: String,
}

impl RepositoryOrigin {
    /// Create a repository origin.
    pub fn new(code_location_origin: CodeLocationOrigin, repository_name: impl Into<String>) -> Self {
        Self {
            code_location_origin,
            repository_name: repository_name.into(),
        }
    }
}

impl Record for RepositoryOrigin {
    const STORAGE_NAME: &'static str = "ExternalRepositoryOrigin";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("code_location_origin").stored_as("repository_location_origin"),
        FieldSpec::required("repository_name"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("code_location_origin", &self.code_location_origin);
        fields.put("repository_name", &self.repository_name);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            code_location_origin: fields.required("code_location_origin")?,
            repository_name: fields.required("repository_name")?,
        })
    }
}

/// Identifies a job inside a served repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalJobOrigin {
    /// Repository containing the job.
    pub repository_origin: RepositoryOrigin,
    /// Job name.
    pub job_name: String,
}

impl ExternalJobOrigin {
    /// Create an external job origin.
    pub fn new(repository_origin: RepositoryOrigin, job_name: impl Into<String>) -> Self {
        Self {
            repository_origin,
            job_name: job_name.into(),
        }
    }
}

impl Record for ExternalJobOrigin {
    const STORAGE_NAME: &'static str = "ExternalPipelineOrigin";
    const LEGACY_NAMES: &'static [&'static str] = &["ExternalJobOrigin"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin").stored_as("external_repository_origin"),
        FieldSpec::required("job_name").stored_as("pipeline_name"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("job_name", &self.job_name);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            job_name: fields.required("job_name")?,
        })
    }
}

wire_record!(RepositoryOrigin, ExternalJobOrigin);
