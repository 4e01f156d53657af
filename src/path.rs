use snafu::Snafu;

const SEGMENT_NAMES: [&str; 4] = ["cluster_id", "namespace", "application", "pod_name"];

#[derive(Debug, Snafu)]
pub enum PathError {
    #[snafu(display(
        "Invalid object key format. Expected at least 5 path segments, got {segments}: {key}"
    ))]
    WrongArity { segments: usize, key: String },
    #[snafu(display(
        "Invalid object key format. {name} (segment {index}) cannot be empty: {key}"
    ))]
    EmptySegment {
        name: &'static str,
        index: usize,
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }
}

/// Tenant attributes carried positionally in the object key:
/// `<cluster_id>/<namespace>/<application>/<pod_name>/<filename>`.
///
/// The `namespace` segment doubles as the tenant identifier for configuration
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogObjectPath {
    pub cluster_id: String,
    pub namespace: String,
    pub application: String,
    pub pod_name: String,
    pub file_name: String,
    pub environment: Environment,
}

impl LogObjectPath {
    /// Parse an object key into tenant attributes.
    ///
    /// Fewer than five segments, or an empty or whitespace-only value in any
    /// of the first four, is a poison input: the key can never resolve to a
    /// tenant and must not reach the configuration store.
    pub fn parse(key: &str) -> Result<Self, PathError> {
        let parts: Vec<&str> = key.split('/').collect();

        if parts.len() < 5 {
            return Err(PathError::WrongArity {
                segments: parts.len(),
                key: key.to_owned(),
            });
        }

        for (index, name) in SEGMENT_NAMES.into_iter().enumerate() {
            if parts[index].trim().is_empty() {
                return Err(PathError::EmptySegment {
                    name,
                    index,
                    key: key.to_owned(),
                });
            }
        }

        let cluster_id = parts[0].to_owned();
        let environment = infer_environment(&cluster_id);

        Ok(Self {
            cluster_id,
            namespace: parts[1].to_owned(),
            application: parts[2].to_owned(),
            pod_name: parts[3].to_owned(),
            file_name: parts[parts.len() - 1].to_owned(),
            environment,
        })
    }

    /// The namespace segment is the tenant identifier.
    pub fn tenant_id(&self) -> &str {
        &self.namespace
    }
}

fn infer_environment(cluster_id: &str) -> Environment {
    match cluster_id.split('-').next() {
        Some("prod") => Environment::Production,
        Some("stg") => Environment::Staging,
        Some("dev") => Environment::Development,
        _ => Environment::Production,
    }
}
