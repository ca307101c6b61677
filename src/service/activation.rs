//! Activation pipeline.
//!
//! One activation walks `SchemaLoaded → Merged → ArtifactWritten →
//! SecretInjected → DescriptorsBuilt → Ready`. A failure aborts the run; the
//! next activation starts over from the schema.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::artifact::{self, Owner};
use crate::domain::descriptor::{self, ServiceDescriptor};
use crate::domain::network::{self, NetworkPlan};
use crate::domain::options::slskd_schema;
use crate::domain::schema::Schema;
use crate::domain::secret::{SecretInjector, SecretRef};
use crate::domain::value;
use crate::domain::{ConfigMerger, MergedConfig, Overlay, ProvisionError};

/// Stages of one activation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Started,
    SchemaLoaded,
    Merged,
    ArtifactWritten,
    SecretInjected,
    DescriptorsBuilt,
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Started => "started",
            Stage::SchemaLoaded => "schema-loaded",
            Stage::Merged => "merged",
            Stage::ArtifactWritten => "artifact-written",
            Stage::SecretInjected => "secret-injected",
            Stage::DescriptorsBuilt => "descriptors-built",
            Stage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// An aborted activation.
#[derive(Debug, Error)]
#[error("activation aborted after stage '{completed}': {source}")]
pub struct ActivationError {
    pub completed: Stage,
    #[source]
    pub source: ProvisionError,
}

/// Suffixes of the files written to the output directory, after the unit name.
const UNIT_SUFFIX: &str = ".service";
const DESCRIPTOR_SUFFIX: &str = "-descriptor.json";
const FIREWALL_SUFFIX: &str = "-firewall.json";
const PROXY_SUFFIX: &str = "-nginx.conf";

const OUTPUT_MODE: u32 = 0o644;

/// Result of a successful activation.
#[derive(Debug, Clone)]
pub struct Activation {
    pub stage: Stage,
    pub merged: MergedConfig,
    pub artifact: String,
    pub secret_injected: bool,
    pub descriptor: ServiceDescriptor,
    pub network: NetworkPlan,
    pub written: Vec<PathBuf>,
}

/// Pure part of an activation: everything derived, nothing written.
#[derive(Debug, Clone)]
pub struct Plan {
    pub merged: MergedConfig,
    pub artifact: String,
    pub descriptor: ServiceDescriptor,
    pub network: NetworkPlan,
}

/// Service running activations for one configuration.
pub struct ActivationService {
    config: Config,
    schema: Schema,
}

impl ActivationService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            schema: slskd_schema(),
        }
    }

    /// Merge the configured settings onto the schema defaults.
    pub fn merge(&self) -> Result<MergedConfig, ProvisionError> {
        let settings = value::from_toml_table(&self.config.settings, "")?;
        let overlay: Overlay = self
            .config
            .overlay
            .iter()
            .map(|(key, v)| value::from_toml(v, key).map(|v| (key.clone(), v)))
            .collect::<Result<_, _>>()?;
        Ok(ConfigMerger::new(&self.schema).merge(&settings, &overlay)?)
    }

    /// Write the pre-injection settings file alone, handed to the service
    /// identity. Run by the unit before every start.
    pub fn write_settings(&self) -> Result<String, ProvisionError> {
        let owner = self.config.require_owner()?;
        let merged = self.merge()?;
        artifact::write_artifact(&merged, &self.config.settings_path, Some(owner))
    }

    /// Derive every artifact without touching the filesystem.
    pub fn plan(&self) -> Result<Plan, ProvisionError> {
        let merged = self.merge()?;
        let artifact = artifact::render(&merged)?;
        let descriptor = descriptor::build(&merged, &self.config.service_options())?;
        let network = network::build(&merged, &self.config.exposure_options())?;
        Ok(Plan {
            merged,
            artifact,
            descriptor,
            network,
        })
    }

    /// Run the full activation, writing descriptor outputs below `out_dir`.
    pub fn activate(&self, out_dir: &Path) -> Result<Activation, ActivationError> {
        let mut stage = Stage::Started;
        let abort = |completed: Stage| move |source: ProvisionError| ActivationError { completed, source };

        // The schema is compiled in; loading cannot fail.
        stage = advance(stage, Stage::SchemaLoaded);

        // Nothing is written unless it can be handed to the service identity.
        let owner = Some(self.config.require_owner().map_err(|e| abort(stage)(e.into()))?);

        let merged = self.merge().map_err(abort(stage))?;
        stage = advance(stage, Stage::Merged);

        let settings_path = &self.config.settings_path;
        let rendered = artifact::write_artifact(&merged, settings_path, owner).map_err(abort(stage))?;
        stage = advance(stage, Stage::ArtifactWritten);

        let secret_injected = match &self.config.secret_file {
            Some(secret_file) => {
                inject(secret_file, settings_path, &self.schema, owner).map_err(abort(stage))?;
                true
            }
            None => {
                debug!("No secret_file configured; settings stay without a password");
                false
            }
        };
        stage = advance(stage, Stage::SecretInjected);

        let descriptor = descriptor::build(&merged, &self.config.service_options())
            .map_err(|e| abort(stage)(e.into()))?;
        let network = network::build(&merged, &self.config.exposure_options())
            .map_err(|e| abort(stage)(e.into()))?;
        descriptor
            .state
            .prepare(owner)
            .map_err(|e| abort(stage)(ProvisionError::io(&descriptor.state.root, e)))?;
        let written = write_outputs(out_dir, &descriptor, &network).map_err(abort(stage))?;
        stage = advance(stage, Stage::DescriptorsBuilt);

        stage = advance(stage, Stage::Ready);
        info!(
            "Activation of {} ready: settings {}, {} output files",
            self.config.name,
            settings_path.display(),
            written.len()
        );

        Ok(Activation {
            stage,
            merged,
            artifact: rendered,
            secret_injected,
            descriptor,
            network,
            written,
        })
    }
}

fn advance(from: Stage, to: Stage) -> Stage {
    debug!("Activation stage {} -> {}", from, to);
    to
}

/// Run the secret injection protocol for the schema's secret path.
pub fn inject(
    secret_file: &Path,
    settings_path: &Path,
    schema: &Schema,
    owner: Option<Owner>,
) -> Result<(), ProvisionError> {
    SecretInjector::new(SecretRef::new(secret_file), schema.secret_path())
        .with_owner(owner)
        .inject(settings_path)?;
    Ok(())
}

/// Write unit, descriptor and exposure files. Files for disabled exposure are
/// removed so a stale route or port never outlives its switch.
fn write_outputs(
    out_dir: &Path,
    descriptor: &ServiceDescriptor,
    network: &NetworkPlan,
) -> Result<Vec<PathBuf>, ProvisionError> {
    let name = descriptor.name.as_str();
    let mut written = Vec::new();

    let mut write = |suffix: &str, contents: String| -> Result<(), ProvisionError> {
        let path = output_path(out_dir, name, suffix);
        artifact::write_atomic(&path, contents.as_bytes(), OUTPUT_MODE, None)
            .map_err(|e| ProvisionError::io(&path, e))?;
        written.push(path);
        Ok(())
    };

    write(UNIT_SUFFIX, descriptor.render_unit())?;
    write(DESCRIPTOR_SUFFIX, to_json(descriptor, out_dir)?)?;

    match &network.firewall {
        Some(rule) => write(FIREWALL_SUFFIX, to_json(rule, out_dir)?)?,
        None => remove_stale(&output_path(out_dir, name, FIREWALL_SUFFIX))?,
    }
    match &network.proxy {
        Some(route) => write(PROXY_SUFFIX, route.render_nginx())?,
        None => remove_stale(&output_path(out_dir, name, PROXY_SUFFIX))?,
    }

    Ok(written)
}

/// `<out_dir>/<name><suffix>`
fn output_path(out_dir: &Path, name: &str, suffix: &str) -> PathBuf {
    out_dir.join(format!("{name}{suffix}"))
}

fn to_json<T: serde::Serialize>(value: &T, out_dir: &Path) -> Result<String, ProvisionError> {
    serde_json::to_string_pretty(value)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| ProvisionError::io(out_dir, e.into()))
}

fn remove_stale(path: &Path) -> Result<(), ProvisionError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigService;
    use crate::domain::{ConfigurationError, SchemaError, SecretError};
    use serde_json::Value;
    use std::os::unix::fs::MetadataExt;

    /// Ids of the test process, the only owner it may chown to.
    fn own_ids(dir: &Path) -> (u32, u32) {
        let meta = fs::metadata(dir).unwrap();
        (meta.uid(), meta.gid())
    }

    fn config(dir: &Path, extra: &str) -> Config {
        let (uid, gid) = own_ids(dir);
        config_without_owner(dir, &format!("uid = {uid}\ngid = {gid}\n{extra}"))
    }

    fn config_without_owner(dir: &Path, extra: &str) -> Config {
        let content = format!(
            r#"
state_dir = "{dir}/state"
settings_path = "{dir}/run/slskd.yml"
output_dir = "{dir}/out"
{extra}
"#,
            dir = dir.display()
        );
        let config = ConfigService::parse(&content).unwrap();
        config.validate().unwrap();
        config
    }

    const SETTINGS: &str = r#"
[settings.web]
port = 5030
[settings.soulseek]
username = "alice"
[settings.shares]
directories = ["/srv/music"]
"#;

    #[test]
    fn test_end_to_end_with_secret() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("password");
        fs::write(&secret, "secret123\n").unwrap();
        let config = config(
            dir.path(),
            &format!("secret_file = \"{}\"\n{SETTINGS}", secret.display()),
        );
        let out = config.output_dir.clone();
        let service = ActivationService::new(config.clone());

        let activation = service.activate(&out).unwrap();
        assert_eq!(activation.stage, Stage::Ready);
        assert!(activation.secret_injected);

        // The pre-injection artifact has no password
        assert!(!activation.artifact.contains("secret123"));
        assert!(!activation.artifact.contains("password"));

        let yaml = fs::read_to_string(&config.settings_path).unwrap();
        let doc: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["web"]["port"], 5030);
        assert_eq!(doc["soulseek"]["username"], "alice");
        assert_eq!(doc["soulseek"]["password"], "secret123");

        assert_eq!(
            activation.descriptor.read_only_paths,
            vec![PathBuf::from("/srv/music")]
        );
        assert!(output_path(&out, "slskd", UNIT_SUFFIX).exists());
        assert!(output_path(&out, "slskd", DESCRIPTOR_SUFFIX).exists());
        assert!(!output_path(&out, "slskd", FIREWALL_SUFFIX).exists());
        assert!(!output_path(&out, "slskd", PROXY_SUFFIX).exists());

        // Nothing derived from the merged tree may carry the secret either.
        let unit = fs::read_to_string(output_path(&out, "slskd", UNIT_SUFFIX)).unwrap();
        let descriptor = fs::read_to_string(output_path(&out, "slskd", DESCRIPTOR_SUFFIX)).unwrap();
        assert!(!unit.contains("secret123"));
        assert!(!descriptor.contains("secret123"));

        assert!(config.state_dir.join("data").is_dir());
        assert!(config.state_dir.join("logs").is_dir());

        let expected = (config.uid.unwrap(), config.gid.unwrap());
        for path in [
            config.state_dir.join("data"),
            config.state_dir.join("logs"),
            config.settings_path.clone(),
        ] {
            let meta = fs::metadata(&path).unwrap();
            assert_eq!((meta.uid(), meta.gid()), expected, "{}", path.display());
        }

        // The unit hands the re-injected file to the same owner
        let inject = &activation.descriptor.lifecycle[1].command;
        assert_eq!(
            &inject[inject.len() - 4..],
            [
                "--uid".to_string(),
                expected.0.to_string(),
                "--gid".to_string(),
                expected.1.to_string()
            ]
        );
    }

    #[test]
    fn test_missing_owner_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_without_owner(dir.path(), SETTINGS);
        let err = ActivationService::new(config.clone())
            .activate(&config.output_dir)
            .unwrap_err();

        assert_eq!(err.completed, Stage::SchemaLoaded);
        assert!(matches!(
            err.source,
            ProvisionError::Configuration(ConfigurationError::MissingOwner { .. })
        ));
        assert!(!config.settings_path.exists());
        assert!(!config.state_dir.exists());
        assert!(!config.output_dir.exists());

        assert!(ActivationService::new(config.clone()).write_settings().is_err());
        assert!(!config.settings_path.exists());
    }

    #[test]
    fn test_write_settings_recreates_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), SETTINGS);
        let service = ActivationService::new(config.clone());

        let activation = service.activate(&config.output_dir).unwrap();
        fs::remove_file(&config.settings_path).unwrap();

        let rendered = service.write_settings().unwrap();
        assert_eq!(rendered, activation.artifact);
        assert_eq!(fs::read_to_string(&config.settings_path).unwrap(), rendered);
    }

    #[test]
    fn test_activation_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("password");
        fs::write(&secret, "secret123\n").unwrap();
        let config = config(
            dir.path(),
            &format!("secret_file = \"{}\"\n{SETTINGS}", secret.display()),
        );
        let service = ActivationService::new(config.clone());

        service.activate(&config.output_dir).unwrap();
        let first = fs::read(&config.settings_path).unwrap();
        service.activate(&config.output_dir).unwrap();
        let second = fs::read(&config.settings_path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_disabling_exposure_removes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let enabled = config(
            dir.path(),
            &format!("open_firewall = true\n[proxy]\nenable = true\ndomain = \"music.example.org\"\n{SETTINGS}"),
        );
        let out = enabled.output_dir.clone();
        let activation = ActivationService::new(enabled).activate(&out).unwrap();
        assert!(activation.network.proxy.is_some());
        assert!(output_path(&out, "slskd", FIREWALL_SUFFIX).exists());
        assert!(output_path(&out, "slskd", PROXY_SUFFIX).exists());

        let disabled = config(dir.path(), SETTINGS);
        let activation = ActivationService::new(disabled).activate(&out).unwrap();
        assert_eq!(activation.network, NetworkPlan::default());
        assert!(!output_path(&out, "slskd", FIREWALL_SUFFIX).exists());
        assert!(!output_path(&out, "slskd", PROXY_SUFFIX).exists());
    }

    #[test]
    fn test_schema_error_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "[settings.web]\nport = \"high\"\n");
        let err = ActivationService::new(config.clone())
            .activate(&config.output_dir)
            .unwrap_err();

        assert_eq!(err.completed, Stage::SchemaLoaded);
        assert!(matches!(
            err.source,
            ProvisionError::Schema(SchemaError::TypeMismatch { .. })
        ));
        assert!(!config.settings_path.exists());
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn test_missing_secret_aborts_before_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            &format!("secret_file = \"{}/missing\"\n{SETTINGS}", dir.path().display()),
        );
        let err = ActivationService::new(config.clone())
            .activate(&config.output_dir)
            .unwrap_err();

        assert_eq!(err.completed, Stage::ArtifactWritten);
        assert!(matches!(
            err.source,
            ProvisionError::Secret(SecretError::Read { .. })
        ));
        assert!(!output_path(&config.output_dir, "slskd", UNIT_SUFFIX).exists());
    }

    #[test]
    fn test_plan_matches_activation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), SETTINGS);
        let service = ActivationService::new(config.clone());

        let plan = service.plan().unwrap();
        let activation = service.activate(&config.output_dir).unwrap();
        assert_eq!(plan.artifact, activation.artifact);
        assert_eq!(plan.descriptor, activation.descriptor);
        assert_eq!(plan.merged, activation.merged);
    }
}
